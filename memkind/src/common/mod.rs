mod blob;
mod error;
mod staging;

pub use blob::Blob;
pub use error::{functions::*, NegotiationError, NegotiationErrorKind};
pub use staging::StagingBuffer;
