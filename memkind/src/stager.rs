//! 按通信上下文的种类传输缓冲区，必要时经过主存中转。

use crate::{
    all_reduce::{Args, ReduceOp},
    args_not_support,
    negotiator::CommunicationContext,
    Communicator, Device, DeviceMem, NegotiationError, StagingBuffer,
};
use digit_layout::DigitLayout;
use log::trace;

/// 一次传输实际走的路径。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Path {
    /// 通信器直接访问缓冲区。
    Direct,
    /// 经过主存中转。
    Staged,
}

pub struct TransferStager<'a, D> {
    device: &'a D,
}

impl<'a, D: Device> TransferStager<'a, D> {
    #[inline]
    pub fn new(device: &'a D) -> Self {
        Self { device }
    }

    /// 对 `buf` 做集合规约，返回后 `buf` 持有规约结果。
    ///
    /// 上下文的种类覆盖缓冲区的种类时原位规约；上下文是 `system` 时经过主存中转；
    /// 其他组合是参数错误，包括断言了加速种类的上下文上的 `system` 缓冲区。
    pub fn send<C: Communicator>(
        &self,
        context: &CommunicationContext<C>,
        buf: &mut D::Mem,
        dt: DigitLayout,
        op: ReduceOp,
    ) -> Result<Path, NegotiationError> {
        let size = buf.len();
        let unit = dt.nbytes();
        if unit == 0 || size % unit != 0 {
            return Err(args_not_support(format!(
                "{size} bytes is not a whole number of {dt:?}"
            )));
        }
        let len = size / unit;

        let kind = buf.kind();
        let target = context.kind();
        if target.covers(&kind) {
            trace!("direct {op:?} on {size} bytes of {kind}");
            context.all_reduce(&Args {
                base: buf.as_mut_ptr(),
                len,
                dt,
                op,
            })?;
            return Ok(Path::Direct);
        }
        if !target.is_system() {
            return Err(args_not_support(format!(
                "{kind} buffer on a {target} context"
            )));
        }

        trace!("staged {op:?} on {size} bytes of {kind}");
        let mut staging = StagingBuffer::new(self.device, size)?;
        self.device.memcpy_async(&mut staging, buf)?;
        self.device.synchronize()?;
        context.all_reduce(&Args {
            base: staging.as_mut_ptr(),
            len,
            dt,
            op,
        })?;
        self.device.memcpy_async(buf, &staging)?;
        self.device.synchronize()?;
        Ok(Path::Staged)
    }
}
