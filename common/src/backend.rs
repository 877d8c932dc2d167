use crate::{Domain, MemoryKind, Restrictor};

/// 执行后端。
///
/// 每个后端对应一个存储域和一组按能力从强到弱排列的限定词。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Backend {
    Host,
    Cuda,
    Rocm,
    LevelZero,
}

impl Backend {
    /// 按后端标识查表，无法识别的后端返回 [None]，调用方只能使用 `system`。
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let name = name.strip_prefix("ext_oneapi_").unwrap_or(&name);
        match name {
            "host" | "cpu" | "system" => Some(Self::Host),
            "cuda" => Some(Self::Cuda),
            "hip" | "rocm" => Some(Self::Rocm),
            "level_zero" | "ze" => Some(Self::LevelZero),
            _ => None,
        }
    }

    pub const fn domain(self) -> Domain {
        match self {
            Self::Host => Domain::System,
            Self::Cuda => Domain::Cuda,
            Self::Rocm => Domain::Rocm,
            Self::LevelZero => Domain::LevelZero,
        }
    }

    /// 回退顺序中使用的限定词，能力最强的在前。
    pub const fn restrictors(self) -> &'static [Restrictor] {
        use Restrictor::*;
        match self {
            Self::Host => &[],
            Self::Cuda | Self::Rocm => &[Managed, Device],
            Self::LevelZero => &[Shared, Device, Host],
        }
    }

    /// 后端的偏好种类列表，不含末尾隐含的 `system`。
    pub fn preferences(self) -> Vec<MemoryKind> {
        let domain = self.domain();
        self.restrictors()
            .iter()
            .filter_map(|&r| MemoryKind::new(domain, r))
            .collect()
    }

    /// 后端会请求的全部种类，包括 `system`。
    pub fn requested(self) -> crate::CapabilitySet {
        std::iter::once(MemoryKind::SYSTEM)
            .chain(self.preferences())
            .collect()
    }
}

#[test]
fn test_backend_table() {
    assert_eq!(Backend::from_name("ext_oneapi_cuda"), Some(Backend::Cuda));
    assert_eq!(Backend::from_name("HIP"), Some(Backend::Rocm));
    assert_eq!(Backend::from_name("level_zero"), Some(Backend::LevelZero));
    assert_eq!(Backend::from_name("opencl"), None);

    let names = |b: Backend| {
        b.preferences()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    };
    assert_eq!(
        names(Backend::LevelZero),
        ["level_zero:shared", "level_zero:device", "level_zero:host"]
    );
    assert_eq!(names(Backend::Cuda), ["cuda:managed", "cuda:device"]);
    assert!(names(Backend::Host).is_empty());
    assert_eq!(
        Backend::Cuda.requested().to_string(),
        "system,cuda:device,cuda:managed"
    );
}
