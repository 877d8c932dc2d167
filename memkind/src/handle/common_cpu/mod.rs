mod inproc_node;

pub use inproc_node::{InprocComm, InprocGroup, InprocRuntime, InprocSession, InprocWorld};

use crate::{Alloc, Backend, Blob, CapabilitySet, Device, DeviceError, DeviceMem, MemoryKind};
use log::{trace, warn};
use memkind_common::locate_error;
use std::{
    cell::{Cell, RefCell},
    ptr::copy_nonoverlapping,
};

/// 以主存模拟的设备运行时。
///
/// 可以模拟任一后端：分配出的存储标记为请求的种类，拷贝在 [synchronize](Device::synchronize) 时才落地。
/// 记录存活的分配数以便检查泄漏，并且可以注入失败。
pub struct Cpu {
    backend: Backend,
    supported: CapabilitySet,
    pending: RefCell<Vec<Pending>>,
    live: Cell<usize>,
    fault: Cell<Option<Fault>>,
}

/// 可注入的设备操作失败。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Fault {
    Alloc,
    Memcpy,
    Synchronize,
}

struct Pending {
    dst: usize,
    src: usize,
    len: usize,
}

/// 模拟设备分配出的存储。
pub struct HostMem {
    kind: MemoryKind,
    blob: Blob,
}

impl HostMem {
    /// 主机可以直接访问的种类才有视图。
    #[inline]
    pub fn host(&self) -> Option<&[u8]> {
        host_accessible(&self.kind).then_some(&*self.blob)
    }

    #[inline]
    pub fn host_mut(&mut self) -> Option<&mut [u8]> {
        if host_accessible(&self.kind) {
            Some(&mut self.blob)
        } else {
            None
        }
    }
}

fn host_accessible(kind: &MemoryKind) -> bool {
    use crate::Restrictor::*;
    match kind.restrictor() {
        None => kind.is_system(),
        Some(Device) => false,
        Some(_) => true,
    }
}

impl DeviceMem for HostMem {
    #[inline]
    fn kind(&self) -> MemoryKind {
        self.kind
    }
    #[inline]
    fn len(&self) -> usize {
        self.blob.len()
    }
    #[inline]
    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.blob.as_mut_ptr()
    }
}

impl Cpu {
    /// 只支持 `system` 的主机。
    #[inline]
    pub fn new() -> Self {
        Self::with_kinds(Backend::Host, CapabilitySet::new())
    }

    /// 模拟 `backend`，支持其全部偏好种类。
    #[inline]
    pub fn emulate(backend: Backend) -> Self {
        Self::with_kinds(backend, backend.preferences().into_iter().collect())
    }

    pub fn with_kinds(backend: Backend, supported: CapabilitySet) -> Self {
        Self {
            backend,
            supported,
            pending: Default::default(),
            live: Cell::new(0),
            fault: Cell::new(None),
        }
    }

    /// 去掉一个本地支持的种类。
    pub fn without(self, kind: MemoryKind) -> Self {
        let supported = self.supported.iter().filter(|k| **k != kind).copied().collect();
        Self { supported, ..self }
    }

    /// 下一次对应操作失败。
    #[inline]
    pub fn inject(&self, fault: Fault) {
        self.fault.set(Some(fault))
    }

    /// 存活的分配数。
    #[inline]
    pub fn live(&self) -> usize {
        self.live.get()
    }

    fn check(&self, op: Fault) -> Result<(), DeviceError> {
        if self.fault.get() == Some(op) {
            self.fault.set(None);
            Err(locate_error!(format!("injected {op:?} failure")))
        } else {
            Ok(())
        }
    }

    fn flush(&self) {
        for Pending { dst, src, len } in self.pending.borrow_mut().drain(..) {
            // 拷贝发射时检查过长度，两端在回收前都会先 flush
            unsafe { copy_nonoverlapping(src as *const u8, dst as *mut u8, len) }
        }
    }
}

impl Default for Cpu {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Alloc<HostMem> for Cpu {
    fn alloc(&self, kind: MemoryKind, size: usize) -> Result<HostMem, DeviceError> {
        self.check(Fault::Alloc)?;
        if !self.supports(&kind) {
            return Err(locate_error!(format!(
                "{kind} not supported by {:?}",
                self.backend
            )));
        }
        self.live.set(self.live.get() + 1);
        trace!("alloc {size} bytes of {kind}");
        Ok(HostMem {
            kind,
            blob: Blob::new(size),
        })
    }

    fn free(&self, mem: HostMem) {
        // 与 cudaFree 相同，回收前隐式同步
        self.flush();
        match self.live.get().checked_sub(1) {
            Some(live) => {
                self.live.set(live);
                trace!("free {} bytes of {}", mem.blob.len(), mem.kind)
            }
            None => warn!(
                "free {} bytes of {} not allocated by this device",
                mem.blob.len(),
                mem.kind
            ),
        }
    }
}

impl Device for Cpu {
    type Mem = HostMem;

    #[inline]
    fn backend(&self) -> Backend {
        self.backend
    }

    #[inline]
    fn supports(&self, kind: &MemoryKind) -> bool {
        self.supported.supports(kind)
    }

    fn memcpy_async(&self, dst: &mut HostMem, src: &HostMem) -> Result<(), DeviceError> {
        self.check(Fault::Memcpy)?;
        if dst.len() != src.len() {
            return Err(locate_error!(format!(
                "memcpy {} bytes into {} bytes",
                src.len(),
                dst.len()
            )));
        }
        self.pending.borrow_mut().push(Pending {
            dst: dst.as_mut_ptr() as _,
            src: src.blob.as_ptr() as _,
            len: dst.len(),
        });
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        self.check(Fault::Synchronize)?;
        self.flush();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Cpu, Fault};
    use crate::{Alloc, Backend, Device, DeviceMem, Domain, MemoryKind, Restrictor};

    #[test]
    fn test_async_copy() {
        let cpu = Cpu::emulate(Backend::Cuda);
        let device = MemoryKind::new(Domain::Cuda, Restrictor::Device).unwrap();

        let mut host = cpu.alloc(MemoryKind::SYSTEM, 4).unwrap();
        host.host_mut().unwrap().copy_from_slice(&7u32.to_ne_bytes());
        let mut dev = cpu.alloc(device, 4).unwrap();
        assert!(dev.host().is_none());
        assert_eq!(dev.kind(), device);

        let mut back = cpu.alloc(MemoryKind::SYSTEM, 4).unwrap();
        cpu.memcpy_async(&mut dev, &host).unwrap();
        cpu.memcpy_async(&mut back, &dev).unwrap();
        assert_eq!(back.host().unwrap(), [0; 4]);
        cpu.synchronize().unwrap();
        assert_eq!(back.host().unwrap(), 7u32.to_ne_bytes());

        assert_eq!(cpu.live(), 3);
        for mem in [host, dev, back] {
            cpu.free(mem)
        }
        assert_eq!(cpu.live(), 0);
    }

    #[test]
    fn test_unsupported() {
        let managed = MemoryKind::new(Domain::Cuda, Restrictor::Managed).unwrap();
        let cpu = Cpu::emulate(Backend::Cuda).without(managed);
        assert!(!cpu.supports(&managed));
        assert!(cpu.supports(&MemoryKind::SYSTEM));
        assert!(cpu.alloc(managed, 4).is_err());
        assert!(!Cpu::new().supports(&managed));
        assert_eq!(cpu.live(), 0);
    }

    #[test]
    fn test_fault() {
        let cpu = Cpu::new();
        cpu.inject(Fault::Alloc);
        assert!(cpu.alloc(MemoryKind::SYSTEM, 4).is_err());
        let mem = cpu.alloc(MemoryKind::SYSTEM, 4).unwrap();
        cpu.inject(Fault::Synchronize);
        assert!(cpu.synchronize().is_err());
        assert!(cpu.synchronize().is_ok());
        cpu.free(mem);
    }

    #[test]
    fn test_free_foreign() {
        let owner = Cpu::new();
        let mem = owner.alloc(MemoryKind::SYSTEM, 4).unwrap();
        let other = Cpu::new();
        other.free(mem);
        assert_eq!(other.live(), 0);
        assert_eq!(owner.live(), 1);
    }
}
