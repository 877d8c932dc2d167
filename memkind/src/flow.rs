//! 从请求到回收的完整协商流程。

use crate::{
    all_reduce::ReduceOp,
    fallback::{FallbackSelector, Support},
    group_disagreement,
    negotiator::{CapabilityNegotiator, CommunicationContext, Config},
    stager::{Path, TransferStager},
    unsupported_device_runtime, CapabilitySet, Device, DeviceMem, MemoryKind, Messaging,
    NegotiationError,
};
use digit_layout::DigitLayout;
use log::{debug, info, warn};

/// 流程所处的阶段。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    Init,
    Requested,
    ProvidedKnown,
    LocalCheck(MemoryKind),
    GroupConfirm(MemoryKind),
    Asserted(MemoryKind),
    Active,
    Teardown,
    Closed,
}

#[derive(Default, Debug)]
struct Trail(Vec<Phase>);

impl Trail {
    fn enter(&mut self, phase: Phase) {
        debug!("enter {phase:?}");
        self.0.push(phase)
    }
}

/// 协商完成后的状态，持有会话和通信上下文。
pub struct Active<M: Messaging> {
    negotiator: CapabilityNegotiator<M>,
    session: M::Session,
    provided: CapabilitySet,
    system: CommunicationContext<M::Comm>,
    accelerated: Option<CommunicationContext<M::Comm>>,
    selected: MemoryKind,
    trail: Trail,
    rejections: Vec<(MemoryKind, NegotiationError)>,
}

/// 请求 `selector` 的全部候选，选出所有参与者都支持的最强种类并为它创建通信上下文。
///
/// 总会创建一个 `system` 上下文，用于确认和中转。
/// 所有参与者必须以相同的 `selector` 和 `config` 调用。
pub fn negotiate<M: Messaging, D: Device>(
    messaging: M,
    device: &D,
    selector: &FallbackSelector,
    config: Config,
) -> Result<Active<M>, NegotiationError> {
    let mut trail = Trail::default();
    trail.enter(Phase::Init);

    let negotiator = CapabilityNegotiator::new(messaging, config);
    let session = negotiator.request(&selector.requested())?;
    trail.enter(Phase::Requested);

    let provided = negotiator.query_provided(&session);
    trail.enter(Phase::ProvidedKnown);

    let group = negotiator.group(&session)?;
    let system_tag = negotiator.config().tag(&MemoryKind::SYSTEM);
    let system = negotiator.assert_kind(&group, MemoryKind::SYSTEM, &system_tag)?;

    let mut rejections = Vec::new();
    let mut accelerated = None;
    let selected = selector.select(|kind| {
        trail.enter(Phase::LocalCheck(*kind));
        let local = device.supports(kind) && provided.supports(kind);
        if !local {
            let reason = if device.supports(kind) {
                format!("{kind} not provided by the messaging runtime")
            } else {
                format!("{kind} not supported by {:?}", device.backend())
            };
            rejections.push((*kind, unsupported_device_runtime(reason)));
        }

        trail.enter(Phase::GroupConfirm(*kind));
        if !negotiator.confirm_all_participants(&system, local)? {
            if local {
                rejections.push((
                    *kind,
                    group_disagreement(format!("{kind} not supported by every participant")),
                ));
            }
            return Ok(Support { local, group: false });
        }

        let tag = negotiator.config().tag(kind);
        match negotiator.assert_kind(&group, *kind, &tag) {
            Ok(context) => {
                trail.enter(Phase::Asserted(*kind));
                accelerated = Some(context);
                Ok(Support { local, group: true })
            }
            Err(e) if e.is_recoverable() => {
                warn!("{e}");
                rejections.push((*kind, e));
                Ok(Support { local, group: false })
            }
            Err(e) => Err(e),
        }
    });
    let selected = match selected {
        Ok(kind) => kind,
        Err(e) => {
            // 集合操作中的致命错误在所有参与者上一致，仍可以集合地断开
            if let Some(context) = accelerated {
                abandon(context.release())
            }
            abandon(system.release());
            abandon(negotiator.finalize(session));
            return Err(e);
        }
    };
    if selected.is_system() {
        trail.enter(Phase::Asserted(selected));
    }

    info!("selected memory alloc kind {selected}");
    trail.enter(Phase::Active);
    Ok(Active {
        negotiator,
        session,
        provided,
        system,
        accelerated,
        selected,
        trail,
        rejections,
    })
}

fn abandon(result: Result<(), NegotiationError>) {
    if let Err(e) = result {
        warn!("teardown after fatal error failed: {e}")
    }
}

impl<M: Messaging> Active<M> {
    #[inline]
    pub fn selected(&self) -> MemoryKind {
        self.selected
    }

    /// 运行时给出的种类。
    #[inline]
    pub fn provided(&self) -> &CapabilitySet {
        &self.provided
    }

    #[inline]
    pub fn system(&self) -> &CommunicationContext<M::Comm> {
        &self.system
    }

    /// 选中非 `system` 种类时的上下文。
    #[inline]
    pub fn accelerated(&self) -> Option<&CommunicationContext<M::Comm>> {
        self.accelerated.as_ref()
    }

    #[inline]
    pub fn phases(&self) -> &[Phase] {
        &self.trail.0
    }

    /// 被放弃的候选及原因，按探测顺序排列。
    #[inline]
    pub fn rejections(&self) -> &[(MemoryKind, NegotiationError)] {
        &self.rejections
    }

    #[inline]
    pub fn negotiator(&self) -> &CapabilityNegotiator<M> {
        &self.negotiator
    }

    /// 能直接访问 `kind` 种类缓冲区的上下文，没有则是 `system` 上下文。
    pub fn context_for(&self, kind: &MemoryKind) -> &CommunicationContext<M::Comm> {
        match &self.accelerated {
            Some(ctx) if ctx.kind().covers(kind) => ctx,
            _ => &self.system,
        }
    }

    /// 对 `buf` 做集合规约，需要时经过主存中转。
    pub fn transfer<D: Device>(
        &self,
        device: &D,
        buf: &mut D::Mem,
        dt: DigitLayout,
        op: ReduceOp,
    ) -> Result<Path, NegotiationError> {
        let context = self.context_for(&buf.kind());
        TransferStager::new(device).send(context, buf, dt, op)
    }

    /// 依次释放上下文并结束会话，返回经过的全部阶段。
    pub fn close(self) -> Result<Vec<Phase>, NegotiationError> {
        let Self {
            negotiator,
            session,
            system,
            accelerated,
            mut trail,
            ..
        } = self;
        trail.enter(Phase::Teardown);
        if let Some(context) = accelerated {
            context.release()?
        }
        system.release()?;
        negotiator.finalize(session)?;
        trail.enter(Phase::Closed);
        Ok(trail.0)
    }
}
