use crate::{
    Alloc, Backend, Blob, Device, DeviceError, DeviceMem, Domain, MemoryKind, Restrictor,
};
use cuda::{memcpy_d2h, DevMem, Stream};
use memkind_common::locate_error;

/// 绑定到一个 CUDA 流的设备运行时。
///
/// 支持 `cuda:device` 和用于中转的 `system`。
pub struct Gpu<'ctx> {
    stream: Stream<'ctx>,
}

pub enum GpuMem<'ctx> {
    Device(DevMem<'ctx>),
    System(Blob),
}

impl<'ctx> Gpu<'ctx> {
    #[inline]
    pub fn new(stream: Stream<'ctx>) -> Self {
        Self { stream }
    }

    #[inline]
    pub fn stream(&self) -> &Stream<'ctx> {
        &self.stream
    }
}

fn cuda_device() -> Option<MemoryKind> {
    MemoryKind::new(Domain::Cuda, Restrictor::Device)
}

impl DeviceMem for GpuMem<'_> {
    fn kind(&self) -> MemoryKind {
        match self {
            Self::Device(_) => cuda_device().unwrap_or(MemoryKind::SYSTEM),
            Self::System(_) => MemoryKind::SYSTEM,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Device(mem) => mem.len(),
            Self::System(blob) => blob.len(),
        }
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            Self::Device(mem) => mem.as_mut_ptr().cast(),
            Self::System(blob) => blob.as_mut_ptr(),
        }
    }
}

impl<'ctx> Alloc<GpuMem<'ctx>> for Gpu<'ctx> {
    fn alloc(&self, kind: MemoryKind, size: usize) -> Result<GpuMem<'ctx>, DeviceError> {
        if kind.is_system() {
            Ok(GpuMem::System(Blob::new(size)))
        } else if Some(kind) == cuda_device() {
            Ok(GpuMem::Device(self.stream.malloc::<u8>(size)))
        } else {
            Err(locate_error!(format!("{kind} not supported by cuda driver")))
        }
    }

    #[inline]
    fn free(&self, mem: GpuMem<'ctx>) {
        drop(mem)
    }
}

impl<'ctx> Device for Gpu<'ctx> {
    type Mem = GpuMem<'ctx>;

    #[inline]
    fn backend(&self) -> Backend {
        Backend::Cuda
    }

    #[inline]
    fn supports(&self, kind: &MemoryKind) -> bool {
        kind.is_system() || Some(*kind) == cuda_device()
    }

    fn memcpy_async(&self, dst: &mut Self::Mem, src: &Self::Mem) -> Result<(), DeviceError> {
        if dst.len() != src.len() {
            return Err(locate_error!(format!(
                "memcpy {} bytes into {} bytes",
                src.len(),
                dst.len()
            )));
        }
        match (dst, src) {
            (GpuMem::Device(dst), GpuMem::System(src)) => self.stream.memcpy_h2d(dst, src),
            (GpuMem::System(dst), GpuMem::Device(src)) => memcpy_d2h(dst, src),
            (GpuMem::Device(dst), GpuMem::Device(src)) => self.stream.memcpy_d2d(dst, src),
            (GpuMem::System(dst), GpuMem::System(src)) => dst.copy_from_slice(src),
        }
        Ok(())
    }

    #[inline]
    fn synchronize(&self) -> Result<(), DeviceError> {
        self.stream.synchronize();
        Ok(())
    }
}

#[test]
fn test_staged_on_gpu() {
    use crate::{
        common_cpu::InprocWorld, fallback::FallbackSelector, flow::negotiate,
        negotiator::Config, stager::Path,
    };
    use digit_layout::types::I32;

    if let Err(cuda::NoDevice) = cuda::init() {
        return;
    }
    let rt = InprocWorld::new(1).build().pop().unwrap();
    cuda::Device::new(0).context().apply(|ctx| {
        let gpu = Gpu::new(ctx.stream());
        let active = negotiate(
            rt,
            &gpu,
            &FallbackSelector::for_backend(Backend::Cuda),
            Config::default(),
        )
        .unwrap();
        assert!(active.selected().is_system());

        let mut host = gpu.alloc(MemoryKind::SYSTEM, 4).unwrap();
        if let GpuMem::System(blob) = &mut host {
            blob.copy_from_slice(&1i32.to_ne_bytes())
        }
        let mut dev = gpu.alloc(cuda_device().unwrap(), 4).unwrap();
        gpu.memcpy_async(&mut dev, &host).unwrap();
        gpu.synchronize().unwrap();

        let path = active
            .transfer(&gpu, &mut dev, I32, crate::all_reduce::ReduceOp::Sum)
            .unwrap();
        assert_eq!(path, Path::Staged);

        gpu.memcpy_async(&mut host, &dev).unwrap();
        gpu.synchronize().unwrap();
        if let GpuMem::System(blob) = &host {
            assert_eq!(&blob[..], 1i32.to_ne_bytes());
        }
        active.close().unwrap();
    })
}
