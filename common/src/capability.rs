use crate::MemoryKind;
use log::debug;
use std::{collections::BTreeSet, fmt};

/// 运行时支持的存储分配种类集合。
///
/// 由 `mpi_memory_alloc_kinds` 的逗号分隔值解析得到。
/// 无法识别的条目被忽略，以便兼容更新的运行时。
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct CapabilitySet(BTreeSet<MemoryKind>);

impl CapabilitySet {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析逗号分隔的种类列表，空串得到空集合。
    pub fn parse(value: &str) -> Self {
        value
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter_map(|token| match token.parse() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    debug!("{e}, ignored");
                    None
                }
            })
            .collect()
    }

    /// 键缺失时同样得到空集合。
    #[inline]
    pub fn parse_option(value: Option<&str>) -> Self {
        value.map_or_else(Self::new, Self::parse)
    }

    #[inline]
    pub fn insert(&mut self, kind: MemoryKind) -> bool {
        self.0.insert(kind)
    }

    #[inline]
    pub fn contains(&self, kind: &MemoryKind) -> bool {
        self.0.contains(kind)
    }

    /// 判断集合是否支持 `kind`。`system` 总是被隐式支持。
    pub fn supports(&self, kind: &MemoryKind) -> bool {
        kind.is_system() || self.0.iter().any(|it| it.covers(kind))
    }

    /// 保留同时被两个集合支持的种类。
    pub fn intersect(&self, other: &Self) -> Self {
        let mut ans = Self::new();
        for kind in &self.0 {
            if other.supports(kind) {
                ans.insert(*kind);
            } else {
                // 请求的整个域可能只被部分支持
                for it in &other.0 {
                    if kind.covers(it) {
                        ans.insert(*it);
                    }
                }
            }
        }
        ans
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &MemoryKind> {
        self.0.iter()
    }
}

impl FromIterator<MemoryKind> for CapabilitySet {
    #[inline]
    fn from_iter<T: IntoIterator<Item = MemoryKind>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a MemoryKind;
    type IntoIter = std::collections::btree_set::Iter<'a, MemoryKind>;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, kind) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{kind}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::CapabilitySet;
    use crate::{Domain, MemoryKind, Restrictor};

    fn kind(domain: Domain, restrictor: Restrictor) -> MemoryKind {
        MemoryKind::new(domain, restrictor).unwrap()
    }

    #[test]
    fn test_parse_listed() {
        let set = CapabilitySet::parse("system,cuda:device,cuda:managed");
        assert_eq!(set.len(), 3);
        assert!(set.contains(&MemoryKind::SYSTEM));
        assert!(set.contains(&kind(Domain::Cuda, Restrictor::Device)));
        assert!(set.contains(&kind(Domain::Cuda, Restrictor::Managed)));

        let reordered = CapabilitySet::parse("cuda:managed, SYSTEM ,Cuda:Device");
        assert_eq!(set, reordered);
    }

    #[test]
    fn test_parse_empty() {
        assert!(CapabilitySet::parse("").is_empty());
        assert!(CapabilitySet::parse(" , ,").is_empty());
        assert!(CapabilitySet::parse_option(None).is_empty());
    }

    #[test]
    fn test_parse_ignores_unknown() {
        let set = CapabilitySet::parse("opencl:svm,cuda:device,cuda:shared,,system,system");
        assert_eq!(set.to_string(), "system,cuda:device");
    }

    #[test]
    fn test_supports() {
        let set = CapabilitySet::parse("rocm");
        assert!(set.supports(&MemoryKind::SYSTEM));
        assert!(set.supports(&kind(Domain::Rocm, Restrictor::Managed)));
        assert!(!set.supports(&kind(Domain::Cuda, Restrictor::Device)));
        assert!(CapabilitySet::new().supports(&MemoryKind::SYSTEM));
    }

    #[test]
    fn test_intersect() {
        let requested = CapabilitySet::parse("system,cuda");
        let supported = CapabilitySet::parse("system,cuda:device,rocm:device");
        assert_eq!(
            requested.intersect(&supported).to_string(),
            "system,cuda:device"
        );

        let requested = CapabilitySet::parse("cuda:managed,cuda:device");
        let supported = CapabilitySet::parse("cuda");
        assert_eq!(
            requested.intersect(&supported).to_string(),
            "cuda:device,cuda:managed"
        );
    }
}
