//! sealdrop-transfer: end-to-end upload and download flows
//!
//! Uploads run key generation, chunked encryption and blob storage, then
//! record metadata under a fresh [`FileId`](sealdrop_core::FileId). Downloads
//! look the id up, gate on the access password, and stream-decrypt the blob.

pub mod orchestrator;
pub mod registry;
pub mod request;

pub use orchestrator::{
    Download, DownloadReceipt, DownloadStage, SealedDownload, SealedMetadata, SealedReceipt,
    Transfer, TransferOptions, UploadReceipt, UploadStage,
};
pub use registry::{MemoryRegistry, MetadataRecord, MetadataRegistry};
pub use request::{sanitize_filename, DownloadRequest};
