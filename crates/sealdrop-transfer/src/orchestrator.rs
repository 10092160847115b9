//! Upload and download flows over the blob store and metadata registry.
//!
//! Uploads are all-or-nothing: a FileId is handed out only after the
//! ciphertext is committed and its metadata recorded. Every failure on the
//! way aborts the blob writer or removes the committed blob.

use std::time::SystemTime;

use secrecy::SecretString;
use sealdrop_core::config::SealdropConfig;
use sealdrop_core::{FileId, SealdropError, SealdropResult};
use sealdrop_crypto::stream::{DEFAULT_CHUNK_SIZE, MAX_SEGMENT_LEN};
use sealdrop_crypto::{
    derive_stream_key, AccessHash, Iv, KdfParams, KeyMaterial, MaterialOptions, Opener, Salt,
    Sealer, StreamKey,
};
use sealdrop_storage::{BlobReader, BlobStore, BlobWriter, DEFAULT_READ_CHUNK};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;

use crate::registry::{MetadataRecord, MetadataRegistry};
use crate::request::{clone_secret, sanitize_filename, DownloadRequest};

/// Per-deployment transfer settings
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    /// Plaintext bytes per encrypted segment
    pub chunk_size: usize,
    pub kdf: KdfParams,
    /// Issue an access password with every upload
    pub access_password: bool,
    pub max_upload_bytes: u64,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf: KdfParams::default(),
            access_password: true,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

impl From<&SealdropConfig> for TransferOptions {
    fn from(cfg: &SealdropConfig) -> Self {
        Self {
            chunk_size: cfg.crypto.chunk_size(),
            kdf: KdfParams::from(&cfg.crypto),
            access_password: cfg.crypto.access_password,
            max_upload_bytes: cfg.daemon.max_upload_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Idle,
    KeyGenerated,
    Encrypting,
    Stored,
    MetadataRecorded,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStage {
    Idle,
    MetadataLookedUp,
    AccessCheck,
    BlobFetched,
    Decrypting,
    Complete,
}

/// Returned to the uploader exactly once; the passphrase is never stored
#[derive(Debug)]
pub struct UploadReceipt {
    pub file_id: FileId,
    pub passphrase: SecretString,
    pub access_password: Option<SecretString>,
    /// Plaintext bytes encrypted
    pub size: u64,
    /// Encrypted segments written
    pub chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReceipt {
    pub filename: String,
    /// Plaintext bytes written to the sink
    pub bytes: u64,
}

#[derive(Debug)]
pub struct Download {
    pub filename: String,
    pub plaintext: Vec<u8>,
}

/// Cipher parameters that accompany client-side encrypted ciphertext
#[derive(Debug, Clone)]
pub struct SealedMetadata {
    pub iv: Iv,
    pub salt: Option<Salt>,
    pub filename: String,
}

#[derive(Debug)]
pub struct SealedReceipt {
    pub file_id: FileId,
    pub access_password: Option<SecretString>,
    /// Ciphertext bytes stored
    pub size: u64,
}

#[derive(Debug)]
pub struct SealedDownload {
    pub iv: Iv,
    pub salt: Option<Salt>,
    pub filename: String,
    /// Stored ciphertext, read on demand
    pub ciphertext: BlobReader,
}

pub struct Transfer<R> {
    store: BlobStore,
    registry: R,
    opts: TransferOptions,
}

impl<R: MetadataRegistry> Transfer<R> {
    pub fn new(store: BlobStore, registry: R, opts: TransferOptions) -> SealdropResult<Self> {
        if opts.chunk_size == 0 || opts.chunk_size > MAX_SEGMENT_LEN {
            return Err(SealdropError::CipherInit(format!(
                "chunk size {} outside 1..={MAX_SEGMENT_LEN}",
                opts.chunk_size
            )));
        }
        Ok(Self {
            store,
            registry,
            opts,
        })
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn options(&self) -> &TransferOptions {
        &self.opts
    }

    /// Encrypt `source` into a new blob and register it under a fresh FileId.
    pub async fn upload<S>(&self, source: S, filename: &str) -> SealdropResult<UploadReceipt>
    where
        S: AsyncRead + Unpin,
    {
        let mut stage = UploadStage::Idle;
        let result = self.run_upload(source, filename, &mut stage).await;
        match &result {
            Ok(receipt) => tracing::info!(
                file_id = %receipt.file_id,
                bytes = receipt.size,
                chunks = receipt.chunks,
                "upload complete"
            ),
            Err(e) => tracing::warn!(stage = ?stage, kind = %e.kind(), "upload failed: {e}"),
        }
        result
    }

    async fn run_upload<S>(
        &self,
        mut source: S,
        filename: &str,
        stage: &mut UploadStage,
    ) -> SealdropResult<UploadReceipt>
    where
        S: AsyncRead + Unpin,
    {
        let filename = sanitize_filename(filename);
        let material = KeyMaterial::generate(MaterialOptions {
            salt: true,
            access_password: self.opts.access_password,
        })?;
        let key = stream_key(&material.passphrase, material.iv, material.salt, self.opts.kdf).await?;
        let access = match &material.access_password {
            Some(pw) => Some(access_hash(pw, self.opts.kdf).await?),
            None => None,
        };
        advance_upload(stage, UploadStage::KeyGenerated);

        let mut writer = self.store.writer().await?;
        advance_upload(stage, UploadStage::Encrypting);
        let (size, chunks) = match self.encrypt_into(&mut source, &mut writer, &key).await {
            Ok(done) => done,
            Err(e) => {
                writer.abort().await;
                return Err(e);
            }
        };
        let blob = writer.commit().await?;
        advance_upload(stage, UploadStage::Stored);

        let file_id = FileId::generate();
        let record = MetadataRecord {
            blob: blob.clone(),
            iv: material.iv,
            salt: material.salt,
            filename,
            access,
            size_hint: size,
            created_at: SystemTime::now(),
        };
        self.record_or_discard(file_id, record).await?;
        advance_upload(stage, UploadStage::MetadataRecorded);

        advance_upload(stage, UploadStage::Complete);
        Ok(UploadReceipt {
            file_id,
            passphrase: material.passphrase,
            access_password: material.access_password,
            size,
            chunks,
        })
    }

    async fn encrypt_into<S>(
        &self,
        source: &mut S,
        writer: &mut BlobWriter,
        key: &StreamKey,
    ) -> SealdropResult<(u64, u32)>
    where
        S: AsyncRead + Unpin,
    {
        let mut sealer = Sealer::new(key);
        let mut buf = vec![0u8; self.opts.chunk_size];
        let mut size = 0u64;

        loop {
            let n = fill_chunk(source, &mut buf).await?;
            size += n as u64;
            self.check_limit(size)?;

            if n < buf.len() {
                let chunks = sealer.segments() + 1;
                writer.write(sealer.seal_last(&buf[..n])?).await?;
                return Ok((size, chunks));
            }
            writer.write(sealer.seal_chunk(&buf)?).await?;
        }
    }

    /// Decrypt a file into `sink`.
    ///
    /// On `Err`, anything already written to `sink` is authenticated but
    /// incomplete and must be discarded.
    pub async fn download_to<W>(
        &self,
        req: &DownloadRequest,
        sink: W,
    ) -> SealdropResult<DownloadReceipt>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stage = DownloadStage::Idle;
        let result = self.run_download(req, sink, &mut stage).await;
        match &result {
            Ok(receipt) => {
                tracing::info!(file_id = %req.file_id(), bytes = receipt.bytes, "download complete")
            }
            Err(e) => tracing::warn!(
                file_id = %req.file_id(),
                stage = ?stage,
                kind = %e.kind(),
                "download failed: {e}"
            ),
        }
        result
    }

    async fn run_download<W>(
        &self,
        req: &DownloadRequest,
        mut sink: W,
        stage: &mut DownloadStage,
    ) -> SealdropResult<DownloadReceipt>
    where
        W: AsyncWrite + Unpin,
    {
        let record = self.registry.lookup(req.file_id())?;
        advance_download(stage, DownloadStage::MetadataLookedUp);

        check_access(&record, req.access_password()).await?;
        advance_download(stage, DownloadStage::AccessCheck);

        let mut reader = self
            .store
            .reader(&record.blob, DEFAULT_READ_CHUNK)
            .await?;
        advance_download(stage, DownloadStage::BlobFetched);

        let key = stream_key(req.passphrase(), record.iv, record.salt, self.opts.kdf).await?;
        advance_download(stage, DownloadStage::Decrypting);

        let mut opener = Opener::new(&key);
        let mut bytes = 0u64;
        while let Some(piece) = reader.next_chunk().await? {
            let plaintext = opener.push(&piece)?;
            sink.write_all(&plaintext).await?;
            bytes += plaintext.len() as u64;
        }
        opener.finish()?;
        sink.flush().await?;

        advance_download(stage, DownloadStage::Complete);
        Ok(DownloadReceipt {
            filename: record.filename,
            bytes,
        })
    }

    /// [`download_to`](Self::download_to) into memory.
    pub async fn download(&self, req: &DownloadRequest) -> SealdropResult<Download> {
        let mut plaintext = Vec::new();
        let receipt = self.download_to(req, &mut plaintext).await?;
        Ok(Download {
            filename: receipt.filename,
            plaintext,
        })
    }

    /// Store ciphertext that was encrypted by the client. The server never sees a key.
    pub async fn store_sealed<S>(
        &self,
        mut source: S,
        meta: SealedMetadata,
    ) -> SealdropResult<SealedReceipt>
    where
        S: AsyncRead + Unpin,
    {
        let access_password = if self.opts.access_password {
            KeyMaterial::generate(MaterialOptions {
                salt: false,
                access_password: true,
            })?
            .access_password
        } else {
            None
        };
        let access = match &access_password {
            Some(pw) => Some(access_hash(pw, self.opts.kdf).await?),
            None => None,
        };

        let mut writer = self.store.writer().await?;
        let size = match self.copy_into(&mut source, &mut writer).await {
            Ok(size) => size,
            Err(e) => {
                writer.abort().await;
                tracing::warn!(kind = %e.kind(), "sealed upload failed: {e}");
                return Err(e);
            }
        };
        let blob = writer.commit().await?;

        let file_id = FileId::generate();
        let record = MetadataRecord {
            blob,
            iv: meta.iv,
            salt: meta.salt,
            filename: sanitize_filename(&meta.filename),
            access,
            size_hint: size,
            created_at: SystemTime::now(),
        };
        self.record_or_discard(file_id, record).await?;

        tracing::info!(file_id = %file_id, bytes = size, "sealed upload complete");
        Ok(SealedReceipt {
            file_id,
            access_password,
            size,
        })
    }

    async fn copy_into<S>(&self, source: &mut S, writer: &mut BlobWriter) -> SealdropResult<u64>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.opts.chunk_size];
        let mut size = 0u64;
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                return Ok(size);
            }
            size += n as u64;
            self.check_limit(size)?;
            writer.write(buf[..n].to_vec()).await?;
        }
    }

    /// Open stored ciphertext and return it with its cipher parameters for local decryption.
    pub async fn fetch_sealed(
        &self,
        file_id: &FileId,
        access_password: Option<&SecretString>,
    ) -> SealdropResult<SealedDownload> {
        let record = self.registry.lookup(file_id)?;
        check_access(&record, access_password).await?;
        let ciphertext = self.store.reader(&record.blob, DEFAULT_READ_CHUNK).await?;

        tracing::info!(file_id = %file_id, bytes = ciphertext.len(), "sealed download opened");
        Ok(SealedDownload {
            iv: record.iv,
            salt: record.salt,
            filename: record.filename,
            ciphertext,
        })
    }

    async fn record_or_discard(&self, file_id: FileId, record: MetadataRecord) -> SealdropResult<()> {
        let blob = record.blob.clone();
        if let Err(e) = self.registry.create(file_id, record) {
            if let Err(cleanup) = self.store.remove(&blob).await {
                tracing::error!(blob = %blob, "orphaned blob after failed registration: {cleanup}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn check_limit(&self, size: u64) -> SealdropResult<()> {
        if size > self.opts.max_upload_bytes {
            return Err(SealdropError::InvalidRequest(format!(
                "upload exceeds {} bytes",
                self.opts.max_upload_bytes
            )));
        }
        Ok(())
    }
}

fn advance_upload(stage: &mut UploadStage, next: UploadStage) {
    tracing::debug!(from = ?*stage, to = ?next, "upload stage");
    *stage = next;
}

fn advance_download(stage: &mut DownloadStage, next: DownloadStage) {
    tracing::debug!(from = ?*stage, to = ?next, "download stage");
    *stage = next;
}

/// Gate on the access password. Runs before any decryption is attempted.
async fn check_access(
    record: &MetadataRecord,
    supplied: Option<&SecretString>,
) -> SealdropResult<()> {
    let Some(hash) = record.access.clone() else {
        return Ok(());
    };
    let Some(candidate) = supplied.map(clone_secret) else {
        return Err(SealdropError::Forbidden);
    };

    let granted = tokio::task::spawn_blocking(move || hash.verify(&candidate))
        .await
        .map_err(|e| task_failed("access check", e))?;
    if granted {
        Ok(())
    } else {
        Err(SealdropError::Forbidden)
    }
}

/// A blocking task that panicked or was cancelled is a server fault, not bad input.
fn task_failed(task: &str, e: JoinError) -> SealdropError {
    SealdropError::Io(std::io::Error::other(format!("{task} task failed: {e}")))
}

/// Argon2id is CPU-bound; keep it off the async workers.
async fn stream_key(
    passphrase: &SecretString,
    iv: Iv,
    salt: Option<Salt>,
    kdf: KdfParams,
) -> SealdropResult<StreamKey> {
    let passphrase = clone_secret(passphrase);
    tokio::task::spawn_blocking(move || derive_stream_key(&passphrase, &iv, salt.as_ref(), &kdf))
        .await
        .map_err(|e| task_failed("key derivation", e))?
}

async fn access_hash(password: &SecretString, kdf: KdfParams) -> SealdropResult<AccessHash> {
    let password = clone_secret(password);
    tokio::task::spawn_blocking(move || AccessHash::new(&password, &kdf))
        .await
        .map_err(|e| task_failed("access hash", e))?
}

/// Read until `buf` is full or the source is exhausted.
async fn fill_chunk<S>(source: &mut S, buf: &mut [u8]) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
