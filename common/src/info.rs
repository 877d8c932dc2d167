use crate::{CapabilitySet, MemoryKind};

/// 运行时报告或接受的存储分配种类列表。
pub const MEMORY_ALLOC_KINDS: &str = "mpi_memory_alloc_kinds";
/// 调用方承诺传入通信器的缓冲区都满足的单个种类。
pub const ASSERT_MEMORY_ALLOC_KINDS: &str = "mpi_assert_memory_alloc_kinds";

/// 有序的字符串键值表，用于带外协商。
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct OptionMap(Vec<(String, String)>);

impl OptionMap {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置键值，已存在的键原位替换。
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key, value)),
        }
    }

    #[inline]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let i = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(i).1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 请求的种类列表。
    #[inline]
    pub fn requesting(kinds: &CapabilitySet) -> Self {
        Self::new().with(MEMORY_ALLOC_KINDS, kinds.to_string())
    }

    /// 断言单个种类。
    #[inline]
    pub fn asserting(kind: MemoryKind) -> Self {
        Self::new().with(ASSERT_MEMORY_ALLOC_KINDS, kind.to_string())
    }

    /// 读出运行时给出的种类列表，键缺失时为空集合。
    #[inline]
    pub fn alloc_kinds(&self) -> CapabilitySet {
        CapabilitySet::parse_option(self.get(MEMORY_ALLOC_KINDS))
    }

    /// 读出断言的种类。
    ///
    /// 键缺失表示只使用 `system`；值无法解析时返回原始字符串。
    pub fn asserted_kind(&self) -> Result<MemoryKind, String> {
        match self.get(ASSERT_MEMORY_ALLOC_KINDS) {
            None => Ok(MemoryKind::SYSTEM),
            Some(value) => value.parse().map_err(|_| value.to_string()),
        }
    }
}

#[test]
fn test_option_map() {
    let mut info = OptionMap::new()
        .with("a", "1")
        .with(MEMORY_ALLOC_KINDS, "system");
    info.set("a", "2");
    info.set("b", "3");

    assert_eq!(
        info.iter().collect::<Vec<_>>(),
        [("a", "2"), (MEMORY_ALLOC_KINDS, "system"), ("b", "3")]
    );
    assert_eq!(info.remove("a").as_deref(), Some("2"));
    assert_eq!(info.get("a"), None);
    assert_eq!(info.len(), 2);
}

#[test]
fn test_asserted_kind() {
    assert_eq!(OptionMap::new().asserted_kind(), Ok(MemoryKind::SYSTEM));

    let kind = "rocm:device".parse::<MemoryKind>().unwrap();
    assert_eq!(OptionMap::asserting(kind).asserted_kind(), Ok(kind));

    let bogus = OptionMap::new().with(ASSERT_MEMORY_ALLOC_KINDS, "cuda,rocm");
    assert_eq!(bogus.asserted_kind(), Err("cuda,rocm".to_string()));
}
