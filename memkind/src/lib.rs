// #![deny(warnings)]

mod common;
mod handle;

pub mod all_reduce;
pub mod fallback;
pub mod file;
pub mod flow;
pub mod negotiator;
pub mod stager;

pub use common::*;
pub use memkind_common::{
    locate_error, Backend, CapabilitySet, Domain, ErrorPosition, MemoryKind, OptionMap,
    Restrictor, ASSERT_MEMORY_ALLOC_KINDS, MEMORY_ALLOC_KINDS,
};

#[cfg(any(use_cpu, test))]
pub use handle::common_cpu;

#[cfg(use_cuda)]
pub mod cuda {
    pub use crate::handle::cuda::*;
    pub use ::cuda::*;
}

use std::{fs::File, path::Path};

/// 设备运行时报告的错误。
pub type DeviceError = ErrorPosition;

/// 消息传递运行时。
///
/// 约定会话、进程组和通信器如何创建。
/// 每个参与者持有一个实现，所有参与者必须以相同顺序调用集合操作。
pub trait Messaging {
    /// 运行时会话。
    type Session;
    /// 从进程集合得到的进程组。
    type Group;
    /// 通信器。
    type Comm: Communicator;

    /// 以给定选项启动会话。运行时无法启动时返回 [FatalStartup](NegotiationErrorKind::FatalStartup)。
    fn session_init(&self, info: &OptionMap) -> Result<Self::Session, NegotiationError>;

    /// 读出会话选项，调用方持有返回值。
    fn session_info(&self, session: &Self::Session) -> OptionMap;

    /// 从命名进程集合创建进程组。
    fn group_from_pset(
        &self,
        session: &Self::Session,
        pset: &str,
    ) -> Result<Self::Group, NegotiationError>;

    /// 集合地从进程组创建通信器。
    ///
    /// 选项中的断言种类未被会话支持时，运行时可以拒绝创建，此时所有参与者同样失败。
    fn comm_create_from_group(
        &self,
        group: &Self::Group,
        tag: &str,
        info: &OptionMap,
    ) -> Result<Self::Comm, NegotiationError>;

    /// 结束会话。
    fn session_finalize(&self, session: Self::Session) -> Result<(), NegotiationError>;
}

/// 通信器，绑定到一个进程组。
pub trait Communicator {
    fn rank(&self) -> usize;
    fn group_size(&self) -> usize;

    /// 原位规约，所有参与者得到相同结果。
    fn all_reduce(&self, args: &all_reduce::Args) -> Result<(), NegotiationError>;

    /// 以给定选项打开文件，选项可以携带断言种类。
    fn file_open(&self, path: &Path, info: &OptionMap) -> Result<File, NegotiationError>;

    /// 集合地断开通信器。
    fn disconnect(self) -> Result<(), NegotiationError>
    where
        Self: Sized;
}

/// 设备运行时分配出的存储，持有该区域的所有权。
pub trait DeviceMem {
    /// 分配时使用的种类。
    fn kind(&self) -> MemoryKind;
    /// 字节数。
    fn len(&self) -> usize;
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// 传递给通信器的基址，可能指向设备存储。
    fn as_mut_ptr(&mut self) -> *mut u8;
}

pub trait Alloc<M> {
    fn alloc(&self, kind: MemoryKind, size: usize) -> Result<M, DeviceError>;
    fn free(&self, mem: M);
}

/// 设备运行时。
///
/// 拷贝是异步的，在 [synchronize](Device::synchronize) 返回之前目标内容不可依赖。
pub trait Device: Alloc<Self::Mem> {
    /// 设备运行时分配和回收的对象。
    type Mem: DeviceMem;

    /// 设备所属的后端。
    fn backend(&self) -> Backend;

    /// 本地是否能分配 `kind` 种类的存储。
    fn supports(&self, kind: &MemoryKind) -> bool;

    /// 异步拷贝，方向由两端的种类决定。
    fn memcpy_async(&self, dst: &mut Self::Mem, src: &Self::Mem) -> Result<(), DeviceError>;

    /// 等待之前发射的所有拷贝完成。
    fn synchronize(&self) -> Result<(), DeviceError>;
}
