//! OpenDAL Operator factory for sealdrop blob storage backends

use anyhow::{Context, Result};
use opendal::{Builder, Operator};
use sealdrop_core::config::{StorageBackend, StorageConfig};

/// S3 access credentials (read from the standard AWS environment variables)
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Credentials {
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.",
        )?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Build the operator selected by `storage.backend`.
///
/// S3 credentials are only read from the environment when the S3 backend is selected.
pub fn build_operator(cfg: &StorageConfig) -> Result<Operator> {
    match cfg.backend {
        StorageBackend::Memory => {
            tracing::warn!("storage backend is in-memory: ciphertext is lost on restart");
            finish(opendal::services::Memory::default())
        }
        StorageBackend::Fs => {
            let root = cfg.root.to_string_lossy();
            let staging = cfg.root.join(".partial");
            let builder = opendal::services::Fs::default()
                .root(&root)
                .atomic_write_dir(&staging.to_string_lossy());
            finish(builder)
                .with_context(|| format!("creating fs operator at {root}"))
        }
        StorageBackend::S3 => build_s3_operator(cfg, &S3Credentials::from_env()?),
    }
}

/// Build an S3 operator (any S3-compatible endpoint, path-style addressing).
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_s3_operator(cfg: &StorageConfig, creds: &S3Credentials) -> Result<Operator> {
    if cfg.endpoint.starts_with("http://") {
        if cfg.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                cfg.endpoint
            );
        }
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted"
        );
    }

    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(&creds.secret_access_key);

    finish(builder).context("creating OpenDAL S3 operator")
}

fn finish<B: Builder>(builder: B) -> Result<Operator> {
    let op = Operator::new(builder)?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}
