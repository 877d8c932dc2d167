use std::{fmt, str::FromStr};

/// 存储分配种类的域。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Domain {
    System,
    Mpi,
    Cuda,
    Rocm,
    LevelZero,
}

/// 将域收窄到某种具体分配行为的限定词。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Restrictor {
    Host,
    Device,
    Managed,
    Shared,
    AllocMem,
    WinAllocate,
    WinAllocateShared,
}

/// 存储分配种类：域加上可选的限定词。
///
/// 文本形式为 `domain` 或 `domain:restrictor`，解析时不区分大小写。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MemoryKind {
    domain: Domain,
    restrictor: Option<Restrictor>,
}

impl Domain {
    pub const fn name(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Mpi => "mpi",
            Self::Cuda => "cuda",
            Self::Rocm => "rocm",
            Self::LevelZero => "level_zero",
        }
    }

    /// 域允许的全部限定词。
    pub const fn restrictors(self) -> &'static [Restrictor] {
        use Restrictor::*;
        match self {
            Self::System => &[],
            Self::Mpi => &[AllocMem, WinAllocate, WinAllocateShared],
            Self::Cuda | Self::Rocm => &[Host, Device, Managed],
            Self::LevelZero => &[Host, Device, Shared],
        }
    }

    fn parse(s: &str) -> Option<Self> {
        [
            Self::System,
            Self::Mpi,
            Self::Cuda,
            Self::Rocm,
            Self::LevelZero,
        ]
        .into_iter()
        .find(|d| d.name().eq_ignore_ascii_case(s))
    }
}

impl Restrictor {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Device => "device",
            Self::Managed => "managed",
            Self::Shared => "shared",
            Self::AllocMem => "alloc_mem",
            Self::WinAllocate => "win_allocate",
            Self::WinAllocateShared => "win_allocate_shared",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        [
            Self::Host,
            Self::Device,
            Self::Managed,
            Self::Shared,
            Self::AllocMem,
            Self::WinAllocate,
            Self::WinAllocateShared,
        ]
        .into_iter()
        .find(|r| r.name().eq_ignore_ascii_case(s))
    }
}

impl MemoryKind {
    pub const SYSTEM: Self = Self {
        domain: Domain::System,
        restrictor: None,
    };

    /// 构造一个不带限定词的种类，表示整个域。
    #[inline]
    pub const fn domain_only(domain: Domain) -> Self {
        Self {
            domain,
            restrictor: None,
        }
    }

    /// 构造一个带限定词的种类，域不接受该限定词时返回 [None]。
    pub fn new(domain: Domain, restrictor: Restrictor) -> Option<Self> {
        domain.restrictors().contains(&restrictor).then_some(Self {
            domain,
            restrictor: Some(restrictor),
        })
    }

    #[inline]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    #[inline]
    pub const fn restrictor(&self) -> Option<Restrictor> {
        self.restrictor
    }

    #[inline]
    pub fn is_system(&self) -> bool {
        self.domain == Domain::System
    }

    /// 判断 `self` 作为运行时给出的能力是否覆盖 `other`。
    ///
    /// 不带限定词的种类覆盖同域的全部限定词。
    pub fn covers(&self, other: &Self) -> bool {
        self.domain == other.domain
            && (self.restrictor.is_none() || self.restrictor == other.restrictor)
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.restrictor {
            Some(r) => write!(f, "{}:{}", self.domain.name(), r.name()),
            None => f.write_str(self.domain.name()),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown memory alloc kind {:?}", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for MemoryKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || UnknownKind(s.to_string());
        match s.split_once(':') {
            None => Domain::parse(s).map(Self::domain_only),
            Some((domain, restrictor)) => {
                let domain = Domain::parse(domain.trim()).ok_or_else(err)?;
                let restrictor = Restrictor::parse(restrictor.trim()).ok_or_else(err)?;
                Self::new(domain, restrictor)
            }
        }
        .ok_or_else(err)
    }
}

#[test]
fn test_parse_kind() {
    let kind = "CUDA:Managed".parse::<MemoryKind>().unwrap();
    assert_eq!(kind, MemoryKind::new(Domain::Cuda, Restrictor::Managed).unwrap());
    assert_eq!(kind.to_string(), "cuda:managed");

    assert_eq!(" system ".parse::<MemoryKind>(), Ok(MemoryKind::SYSTEM));
    assert_eq!(
        "level_zero:shared".parse::<MemoryKind>().unwrap().domain(),
        Domain::LevelZero
    );

    assert!("cuda:shared".parse::<MemoryKind>().is_err());
    assert!("system:device".parse::<MemoryKind>().is_err());
    assert!("opencl".parse::<MemoryKind>().is_err());
    assert!("".parse::<MemoryKind>().is_err());
}

#[test]
fn test_covers() {
    let cuda = MemoryKind::domain_only(Domain::Cuda);
    let device = MemoryKind::new(Domain::Cuda, Restrictor::Device).unwrap();
    let managed = MemoryKind::new(Domain::Cuda, Restrictor::Managed).unwrap();
    let rocm = MemoryKind::new(Domain::Rocm, Restrictor::Device).unwrap();

    assert!(cuda.covers(&device));
    assert!(cuda.covers(&managed));
    assert!(device.covers(&device));
    assert!(!device.covers(&managed));
    assert!(!device.covers(&cuda));
    assert!(!cuda.covers(&rocm));
}
