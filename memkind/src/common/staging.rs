use crate::{Device, MemoryKind, NegotiationError};
use std::{
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

/// 单次传输期间持有的主存中转缓冲区。
///
/// 离开作用域时归还给分配它的设备运行时，错误路径也不例外。
pub struct StagingBuffer<'a, D: Device> {
    mem: ManuallyDrop<D::Mem>,
    device: &'a D,
}

impl<'a, D: Device> StagingBuffer<'a, D> {
    #[inline]
    pub fn new(device: &'a D, size: usize) -> Result<Self, NegotiationError> {
        let mem = device.alloc(MemoryKind::SYSTEM, size)?;
        Ok(Self {
            mem: ManuallyDrop::new(mem),
            device,
        })
    }
}

impl<D: Device> Deref for StagingBuffer<'_, D> {
    type Target = D::Mem;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.mem
    }
}

impl<D: Device> DerefMut for StagingBuffer<'_, D> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.mem
    }
}

impl<D: Device> Drop for StagingBuffer<'_, D> {
    #[inline]
    fn drop(&mut self) {
        self.device.free(unsafe { ManuallyDrop::take(&mut self.mem) })
    }
}
