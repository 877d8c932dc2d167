//! 按偏好顺序选择第一个可用的存储种类，`system` 是最终的回退。

use crate::{Backend, CapabilitySet, MemoryKind};

/// 一个候选种类的两项独立事实。
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Support {
    /// 本地后端能分配，且运行时给出的集合包含它。
    pub local: bool,
    /// 全体参与者确认支持。
    pub group: bool,
}

impl Support {
    #[inline]
    pub const fn viable(self) -> bool {
        self.local && self.group
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FallbackSelector {
    candidates: Vec<MemoryKind>,
}

impl FallbackSelector {
    /// 候选种类从强到弱排列。
    ///
    /// 重复项被去掉；`system` 之后的候选永远不可达，也被去掉；没有 `system` 时追加在末尾。
    pub fn new(preferences: impl IntoIterator<Item = MemoryKind>) -> Self {
        let mut candidates = Vec::new();
        for kind in preferences {
            if candidates.contains(&kind) {
                continue;
            }
            candidates.push(kind);
            if kind.is_system() {
                break;
            }
        }
        if !candidates.last().is_some_and(MemoryKind::is_system) {
            candidates.push(MemoryKind::SYSTEM)
        }
        Self { candidates }
    }

    #[inline]
    pub fn for_backend(backend: Backend) -> Self {
        Self::new(backend.preferences())
    }

    #[inline]
    pub fn candidates(&self) -> &[MemoryKind] {
        &self.candidates
    }

    /// 全部候选组成的集合，用于向运行时请求。
    #[inline]
    pub fn requested(&self) -> CapabilitySet {
        self.candidates.iter().copied().collect()
    }

    /// 依次探测候选，返回第一个两项事实都成立的种类。
    ///
    /// 选中之前的每个候选都会被探测，探测中的集合操作因此在所有参与者上顺序一致。
    /// `system` 不被探测。
    pub fn select<E>(
        &self,
        mut probe: impl FnMut(&MemoryKind) -> Result<Support, E>,
    ) -> Result<MemoryKind, E> {
        for kind in &self.candidates {
            if kind.is_system() || probe(kind)?.viable() {
                return Ok(*kind);
            }
        }
        unreachable!("system is always the last candidate")
    }
}

#[cfg(test)]
mod test {
    use super::{FallbackSelector, Support};
    use crate::{Backend, Domain, MemoryKind, Restrictor};
    use rand::Rng;
    use std::convert::Infallible;

    fn kind(domain: Domain, restrictor: Restrictor) -> MemoryKind {
        MemoryKind::new(domain, restrictor).unwrap()
    }

    #[test]
    fn test_candidates() {
        let selector = FallbackSelector::for_backend(Backend::LevelZero);
        assert_eq!(
            selector
                .candidates()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            [
                "level_zero:shared",
                "level_zero:device",
                "level_zero:host",
                "system"
            ]
        );

        let managed = kind(Domain::Cuda, Restrictor::Managed);
        let device = kind(Domain::Cuda, Restrictor::Device);
        let selector = FallbackSelector::new([managed, managed, MemoryKind::SYSTEM, device]);
        assert_eq!(selector.candidates(), [managed, MemoryKind::SYSTEM]);
        assert_eq!(selector.requested().to_string(), "system,cuda:managed");

        assert_eq!(
            FallbackSelector::new([]).candidates(),
            [MemoryKind::SYSTEM]
        );
    }

    #[test]
    fn test_select_second() {
        let a = kind(Domain::Cuda, Restrictor::Managed);
        let b = kind(Domain::Cuda, Restrictor::Device);
        let selector = FallbackSelector::new([a, b, MemoryKind::SYSTEM]);

        let mut probed = Vec::new();
        let selected = selector
            .select(|k| {
                probed.push(*k);
                Ok::<_, Infallible>(if *k == a {
                    Support {
                        local: true,
                        group: false,
                    }
                } else {
                    Support {
                        local: true,
                        group: true,
                    }
                })
            })
            .unwrap();
        assert_eq!(selected, b);
        assert_eq!(probed, [a, b]);
    }

    #[test]
    fn test_select_system() {
        let selector = FallbackSelector::for_backend(Backend::LevelZero);
        let mut count = 0;
        let selected = selector
            .select(|_| {
                count += 1;
                Ok::<_, Infallible>(Support::default())
            })
            .unwrap();
        assert!(selected.is_system());
        assert_eq!(count, 3);
    }

    #[test]
    fn test_both_axes_required() {
        let selector = FallbackSelector::for_backend(Backend::Rocm);
        for support in [
            Support {
                local: true,
                group: false,
            },
            Support {
                local: false,
                group: true,
            },
        ] {
            let selected = selector.select(|_| Ok::<_, Infallible>(support)).unwrap();
            assert_eq!(selected, MemoryKind::SYSTEM);
        }
    }

    #[test]
    fn test_fatal_check() {
        let selector = FallbackSelector::for_backend(Backend::Cuda);
        assert_eq!(selector.select(|_| Err("fatal")), Err("fatal"));
    }

    #[test]
    fn test_first_viable() {
        let selector = FallbackSelector::for_backend(Backend::LevelZero);
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let pattern = selector
                .candidates()
                .iter()
                .map(|_| Support {
                    local: rng.gen_bool(0.5),
                    group: rng.gen_bool(0.5),
                })
                .collect::<Vec<_>>();
            let expected = selector
                .candidates()
                .iter()
                .zip(&pattern)
                .find(|(k, s)| k.is_system() || s.viable())
                .map(|(k, _)| *k)
                .unwrap();
            let selected = selector
                .select(|k| {
                    let i = selector.candidates().iter().position(|c| c == k).unwrap();
                    Ok::<_, Infallible>(pattern[i])
                })
                .unwrap();
            assert_eq!(selected, expected);
        }
    }
}
