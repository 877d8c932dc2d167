//! 存储种类的握手协议：请求、查询、断言，以及全体参与者的一致性确认。

use crate::{
    all_reduce::{Args, ReduceOp},
    CapabilitySet, Communicator, MemoryKind, Messaging, NegotiationError, OptionMap,
};
use digit_layout::types;
use log::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct Config {
    /// 创建进程组使用的进程集合。
    pub pset: String,
    /// 通信器标签前缀，后接种类的域和限定词。
    pub tag_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pset: "mpi://WORLD".into(),
            tag_prefix: "org.mpi-side-doc.mem-kind.example".into(),
        }
    }
}

impl Config {
    #[inline]
    pub fn with_pset(mut self, pset: impl Into<String>) -> Self {
        self.pset = pset.into();
        self
    }

    #[inline]
    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = prefix.into();
        self
    }

    /// 断言 `kind` 的通信器使用的标签。
    pub fn tag(&self, kind: &MemoryKind) -> String {
        match kind.restrictor() {
            Some(r) => format!("{}.{}.{}", self.tag_prefix, kind.domain().name(), r.name()),
            None => format!("{}.{}", self.tag_prefix, kind.domain().name()),
        }
    }
}

/// 一次协商的结果。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NegotiationOutcome {
    Provided(MemoryKind),
    NotProvided,
}

/// 绑定到一个断言种类的通信上下文。
pub struct CommunicationContext<C> {
    comm: C,
    kind: MemoryKind,
}

impl<C: Communicator> CommunicationContext<C> {
    #[inline]
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    #[inline]
    pub fn communicator(&self) -> &C {
        &self.comm
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    #[inline]
    pub fn group_size(&self) -> usize {
        self.comm.group_size()
    }

    #[inline]
    pub fn all_reduce(&self, args: &Args) -> Result<(), NegotiationError> {
        self.comm.all_reduce(args)
    }

    /// 断开通信器。
    pub fn release(self) -> Result<(), NegotiationError> {
        debug!("release {} context", self.kind);
        self.comm.disconnect()
    }
}

pub struct CapabilityNegotiator<M> {
    messaging: M,
    config: Config,
}

impl<M: Messaging> CapabilityNegotiator<M> {
    #[inline]
    pub fn new(messaging: M, config: Config) -> Self {
        Self { messaging, config }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn messaging(&self) -> &M {
        &self.messaging
    }

    /// 以请求的种类启动会话，运行时无法启动是致命错误。
    pub fn request(&self, desired: &CapabilitySet) -> Result<M::Session, NegotiationError> {
        info!("request memory alloc kinds: {desired}");
        self.messaging.session_init(&OptionMap::requesting(desired))
    }

    /// 读出运行时实际支持的种类，键缺失时为空集合。
    pub fn query_provided(&self, session: &M::Session) -> CapabilitySet {
        let provided = self.messaging.session_info(session).alloc_kinds();
        if provided.is_empty() {
            warn!("runtime reports no memory alloc kinds, only system is guaranteed");
        } else {
            info!("provided memory alloc kinds: {provided}");
        }
        provided
    }

    /// 配置的进程集合对应的进程组。
    #[inline]
    pub fn group(&self, session: &M::Session) -> Result<M::Group, NegotiationError> {
        self.messaging.group_from_pset(session, &self.config.pset)
    }

    /// 创建断言 `kind` 的通信上下文，运行时拒绝时返回错误，调用方必须检查。
    pub fn assert_kind(
        &self,
        group: &M::Group,
        kind: MemoryKind,
        tag: &str,
    ) -> Result<CommunicationContext<M::Comm>, NegotiationError> {
        let comm = self
            .messaging
            .comm_create_from_group(group, tag, &OptionMap::asserting(kind))?;
        debug!("asserted {kind} on {tag}");
        Ok(CommunicationContext { comm, kind })
    }

    /// 集合地对每个参与者的布尔值做逻辑与，所有参与者得到相同的答案。
    pub fn confirm_all_participants(
        &self,
        context: &CommunicationContext<M::Comm>,
        local: bool,
    ) -> Result<bool, NegotiationError> {
        let mut flag = (local as i32).to_ne_bytes();
        context.all_reduce(&Args {
            base: flag.as_mut_ptr(),
            len: 1,
            dt: types::I32,
            op: ReduceOp::LogicalAnd,
        })?;
        Ok(i32::from_ne_bytes(flag) != 0)
    }

    /// 种类是否在运行时给出的集合中。
    #[inline]
    pub fn outcome(provided: &CapabilitySet, kind: MemoryKind) -> NegotiationOutcome {
        if provided.supports(&kind) {
            NegotiationOutcome::Provided(kind)
        } else {
            NegotiationOutcome::NotProvided
        }
    }

    #[inline]
    pub fn finalize(&self, session: M::Session) -> Result<(), NegotiationError> {
        self.messaging.session_finalize(session)
    }
}

#[cfg(test)]
mod test {
    use super::{CapabilityNegotiator, Config, NegotiationOutcome};
    use crate::{
        common_cpu::InprocWorld, CapabilitySet, Domain, MemoryKind, NegotiationErrorKind,
        Restrictor,
    };
    use std::thread;

    #[test]
    fn test_tag() {
        let config = Config::default();
        assert_eq!(
            config.tag(&MemoryKind::SYSTEM),
            "org.mpi-side-doc.mem-kind.example.system"
        );
        assert_eq!(
            config
                .with_tag_prefix("x")
                .tag(&MemoryKind::new(Domain::Cuda, Restrictor::Managed).unwrap()),
            "x.cuda.managed"
        );
    }

    #[test]
    fn test_outcome() {
        type N = CapabilityNegotiator<crate::common_cpu::InprocRuntime>;
        let provided = CapabilitySet::parse("system,cuda:device");
        let device = MemoryKind::new(Domain::Cuda, Restrictor::Device).unwrap();
        let managed = MemoryKind::new(Domain::Cuda, Restrictor::Managed).unwrap();
        assert_eq!(N::outcome(&provided, device), NegotiationOutcome::Provided(device));
        assert_eq!(N::outcome(&provided, managed), NegotiationOutcome::NotProvided);
        assert_eq!(
            N::outcome(&CapabilitySet::new(), MemoryKind::SYSTEM),
            NegotiationOutcome::Provided(MemoryKind::SYSTEM)
        );
    }

    #[test]
    fn test_query_missing_key() {
        let rt = InprocWorld::new(1).without_alloc_kinds(0).build().pop().unwrap();
        let negotiator = CapabilityNegotiator::new(rt, Config::default());
        let session = negotiator
            .request(&CapabilitySet::parse("system,cuda:device"))
            .unwrap();
        assert!(negotiator.query_provided(&session).is_empty());
        negotiator.finalize(session).unwrap();
    }

    #[test]
    fn test_assert_unprovided() {
        let rt = InprocWorld::new(1).supporting(0, "cuda:device").build().pop().unwrap();
        let negotiator = CapabilityNegotiator::new(rt, Config::default());
        let session = negotiator
            .request(&CapabilitySet::parse("system,cuda:device,cuda:managed"))
            .unwrap();
        let provided = negotiator.query_provided(&session);
        assert_eq!(provided.to_string(), "system,cuda:device");

        let group = negotiator.group(&session).unwrap();
        let managed = MemoryKind::new(Domain::Cuda, Restrictor::Managed).unwrap();
        let e = negotiator
            .assert_kind(&group, managed, "managed")
            .err()
            .unwrap();
        assert_eq!(e.kind, NegotiationErrorKind::AssertionRejected);
        assert!(e.is_recoverable());

        let device = MemoryKind::new(Domain::Cuda, Restrictor::Device).unwrap();
        let context = negotiator.assert_kind(&group, device, "device").unwrap();
        assert_eq!(context.kind(), device);
        context.release().unwrap();
    }

    #[test]
    fn test_group_disagreement() {
        InprocWorld::new(4)
            .build()
            .into_iter()
            .map(|rt| {
                thread::spawn(move || {
                    let local = rt.rank() != 3;
                    let negotiator = CapabilityNegotiator::new(rt, Config::default());
                    let session = negotiator.request(&CapabilitySet::new()).unwrap();
                    let group = negotiator.group(&session).unwrap();
                    let system = negotiator
                        .assert_kind(&group, MemoryKind::SYSTEM, "system")
                        .unwrap();
                    let all = negotiator.confirm_all_participants(&system, local).unwrap();
                    let again = negotiator.confirm_all_participants(&system, true).unwrap();
                    system.release().unwrap();
                    negotiator.finalize(session).unwrap();
                    (all, again)
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .for_each(|h| assert_eq!(h.join().unwrap(), (false, true)));
    }
}
