pub mod config;
pub mod error;
pub mod types;

pub use error::{ErrorKind, SealdropError, SealdropResult};
pub use types::{BlobRef, FileId};
