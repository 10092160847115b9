use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{SealdropError, SealdropResult};

/// Smallest accepted pipeline chunk size.
pub const MIN_CHUNK_SIZE_KIB: usize = 1;
/// Largest accepted pipeline chunk size (matches the cipher's frame limit).
pub const MAX_CHUNK_SIZE_KIB: usize = 16 * 1024;

/// Top-level configuration (loaded from sealdrop.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealdropConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address for the transfer API
    pub listen: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Public base URL of the recipient page; enables share links in upload responses
    pub public_url: Option<String>,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Fs,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which OpenDAL service backs the blob store
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Key prefix under which ciphertext blobs are written
    pub prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

/// Encryption pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Plaintext chunk size fed through the cipher, in KiB (default: 64)
    pub chunk_size_kib: usize,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// Issue an access password with every upload (default: true)
    pub access_password: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".into(),
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "text".into(),
            public_url: None,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            root: PathBuf::from("/var/lib/sealdrop"),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "sealdrop".into(),
            prefix: "uploads".into(),
            enforce_tls: false,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            chunk_size_kib: 64,
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            access_password: true,
        }
    }
}

impl CryptoConfig {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_kib * 1024
    }
}

impl SealdropConfig {
    /// Reject values that would only fail later, mid-transfer.
    pub fn validate(&self) -> SealdropResult<()> {
        let kib = self.crypto.chunk_size_kib;
        if !(MIN_CHUNK_SIZE_KIB..=MAX_CHUNK_SIZE_KIB).contains(&kib) {
            return Err(SealdropError::Config(format!(
                "crypto.chunk_size_kib = {kib} is outside {MIN_CHUNK_SIZE_KIB}..={MAX_CHUNK_SIZE_KIB}"
            )));
        }
        if self.crypto.argon2_time_cost == 0 || self.crypto.argon2_parallelism == 0 {
            return Err(SealdropError::Config(
                "argon2 time cost and parallelism must be at least 1".into(),
            ));
        }
        if self.storage.prefix.trim_matches('/').is_empty() {
            return Err(SealdropError::Config("storage.prefix must not be empty".into()));
        }
        if self.daemon.max_upload_bytes == 0 {
            return Err(SealdropError::Config("daemon.max_upload_bytes must be positive".into()));
        }
        Ok(())
    }
}
