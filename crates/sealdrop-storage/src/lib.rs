//! sealdrop-storage: opaque ciphertext blobs on any OpenDAL backend

pub mod blob;
pub mod health;
pub mod operator;

pub use blob::{BlobReader, BlobStore, BlobWriter, DEFAULT_READ_CHUNK};
pub use health::check_health;
pub use operator::{build_operator, S3Credentials};
