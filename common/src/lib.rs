mod backend;
mod capability;
mod error;
mod info;
mod kind;

pub use backend::Backend;
pub use capability::CapabilitySet;
pub use error::ErrorPosition;
pub use info::{OptionMap, ASSERT_MEMORY_ALLOC_KINDS, MEMORY_ALLOC_KINDS};
pub use kind::{Domain, MemoryKind, Restrictor, UnknownKind};
