mod common_cpu;

pub(crate) use common_cpu::reduce;

use digit_layout::DigitLayout;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
    LogicalAnd,
    LogicalOr,
}

impl ReduceOp {
    #[inline]
    pub const fn is_logical(self) -> bool {
        matches!(self, Self::LogicalAnd | Self::LogicalOr)
    }
}

/// 原位规约的参数。
///
/// `base` 指向 `len` 个 `dt` 类型的元素，可能位于设备存储。
pub struct Args {
    pub base: *mut u8,
    pub len: usize,
    pub dt: DigitLayout,
    pub op: ReduceOp,
}

impl Args {
    /// 缓冲区字节数。
    #[inline]
    pub fn size(&self) -> usize {
        self.len * self.dt.nbytes()
    }
}
