//! Opaque ciphertext blob store.
//!
//! Blobs are written under `{prefix}/{blob_ref}` and never interpreted. A blob
//! becomes visible only once its writer is committed; an aborted writer leaves
//! nothing behind.

use opendal::{Operator, Reader, Writer};
use sealdrop_core::{BlobRef, SealdropError, SealdropResult};

/// Default read granularity for [`BlobReader`]
pub const DEFAULT_READ_CHUNK: u64 = 256 * 1024;

/// Ciphertext store rooted at a key prefix of an OpenDAL operator
#[derive(Clone)]
pub struct BlobStore {
    op: Operator,
    prefix: String,
}

impl BlobStore {
    pub fn new(op: Operator, prefix: &str) -> Self {
        Self {
            op,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    /// Storage path of a blob (exposed for layout checks)
    pub fn path_of(&self, blob: &BlobRef) -> String {
        format!("{}/{}", self.prefix, blob)
    }

    /// Store a complete ciphertext buffer under a fresh reference.
    pub async fn put(&self, bytes: Vec<u8>) -> SealdropResult<BlobRef> {
        let mut writer = self.writer().await?;
        if let Err(e) = writer.write(bytes).await {
            writer.abort().await;
            return Err(e);
        }
        writer.commit().await
    }

    /// Open a streaming writer for a fresh blob reference.
    pub async fn writer(&self) -> SealdropResult<BlobWriter> {
        let blob = BlobRef::generate();
        let path = self.path_of(&blob);

        if self
            .op
            .exists(&path)
            .await
            .map_err(|e| storage_error(e, &blob))?
        {
            return Err(SealdropError::Storage(format!("blob ref collision: {blob}")));
        }

        let inner = self
            .op
            .writer(&path)
            .await
            .map_err(|e| storage_error(e, &blob))?;

        tracing::debug!(blob = %blob, "blob writer opened");
        Ok(BlobWriter {
            op: self.op.clone(),
            blob,
            path,
            inner,
            written: 0,
        })
    }

    /// Read a whole blob into memory.
    pub async fn get(&self, blob: &BlobRef) -> SealdropResult<Vec<u8>> {
        let buf = self
            .op
            .read(&self.path_of(blob))
            .await
            .map_err(|e| storage_error(e, blob))?;
        Ok(buf.to_vec())
    }

    /// Open a ranged reader over a blob, yielding `chunk_size` byte pieces.
    pub async fn reader(&self, blob: &BlobRef, chunk_size: u64) -> SealdropResult<BlobReader> {
        let path = self.path_of(blob);
        let meta = self
            .op
            .stat(&path)
            .await
            .map_err(|e| storage_error(e, blob))?;
        let inner = self
            .op
            .reader(&path)
            .await
            .map_err(|e| storage_error(e, blob))?;

        Ok(BlobReader {
            inner,
            offset: 0,
            len: meta.content_length(),
            chunk_size: chunk_size.max(1),
        })
    }

    pub async fn exists(&self, blob: &BlobRef) -> SealdropResult<bool> {
        self.op
            .exists(&self.path_of(blob))
            .await
            .map_err(|e| storage_error(e, blob))
    }

    /// Delete a blob. Removing an absent blob is not an error.
    pub async fn remove(&self, blob: &BlobRef) -> SealdropResult<()> {
        self.op
            .delete(&self.path_of(blob))
            .await
            .map_err(|e| storage_error(e, blob))?;
        tracing::debug!(blob = %blob, "blob removed");
        Ok(())
    }
}

/// In-progress blob upload. Must end in [`commit`](Self::commit) or [`abort`](Self::abort).
pub struct BlobWriter {
    op: Operator,
    blob: BlobRef,
    path: String,
    inner: Writer,
    written: u64,
}

impl BlobWriter {
    pub fn blob(&self) -> &BlobRef {
        &self.blob
    }

    /// Bytes accepted so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, bytes: Vec<u8>) -> SealdropResult<()> {
        let n = bytes.len() as u64;
        self.inner
            .write(bytes)
            .await
            .map_err(|e| storage_error(e, &self.blob))?;
        self.written += n;
        Ok(())
    }

    /// Flush and publish the blob.
    ///
    /// If publishing fails, staged and partially published data is discarded
    /// before the error is returned.
    pub async fn commit(mut self) -> SealdropResult<BlobRef> {
        if let Err(e) = self.inner.close().await {
            let err = storage_error(e, &self.blob);
            self.discard().await;
            return Err(err);
        }
        tracing::debug!(blob = %self.blob, bytes = self.written, "blob committed");
        Ok(self.blob)
    }

    /// Discard the upload and any partially written object. Best effort: failures are logged.
    pub async fn abort(mut self) {
        self.discard().await;
        tracing::debug!(blob = %self.blob, "blob writer aborted");
    }

    async fn discard(&mut self) {
        if let Err(e) = self.inner.abort().await {
            tracing::warn!(blob = %self.blob, "blob writer abort failed: {e}");
        }
        if let Err(e) = self.op.delete(&self.path).await {
            tracing::warn!(blob = %self.blob, "partial blob cleanup failed: {e}");
        }
    }
}

/// Sequential ranged reader over a committed blob
pub struct BlobReader {
    inner: Reader,
    offset: u64,
    len: u64,
    chunk_size: u64,
}

impl BlobReader {
    /// Total blob length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Next piece of the blob, or `None` once everything has been read.
    pub async fn next_chunk(&mut self) -> SealdropResult<Option<Vec<u8>>> {
        if self.offset >= self.len {
            return Ok(None);
        }
        let end = (self.offset + self.chunk_size).min(self.len);
        let buf = self
            .inner
            .read(self.offset..end)
            .await
            .map_err(|e| SealdropError::Storage(format!("ranged read failed: {e}")))?;
        if buf.is_empty() {
            return Err(SealdropError::Storage(format!(
                "blob ended early at {} of {} bytes",
                self.offset, self.len
            )));
        }
        self.offset += buf.len() as u64;
        Ok(Some(buf.to_vec()))
    }

    /// Drain the remainder of the blob into memory.
    pub async fn read_all(mut self) -> SealdropResult<Vec<u8>> {
        let remaining = self.len.saturating_sub(self.offset);
        let mut out = Vec::with_capacity(usize::try_from(remaining).unwrap_or(0));
        while let Some(piece) = self.next_chunk().await? {
            out.extend_from_slice(&piece);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

fn storage_error(e: opendal::Error, blob: &BlobRef) -> SealdropError {
    match e.kind() {
        opendal::ErrorKind::NotFound => SealdropError::NotFound(format!("blob {blob}")),
        _ => SealdropError::Storage(format!("blob {blob}: {e}")),
    }
}
