//! Chunked AES-256-GCM stream encryption/decryption
//!
//! One key and one nonce counter per file: the counter advances across
//! chunks, so no (key, nonce) pair is ever reused, and a last-segment flag in
//! the nonce makes truncation detectable.
//!
//! Ciphertext format (binary):
//! ```text
//! [4 bytes: "SDRP"][1 byte: version]
//! repeated:
//!   [1 byte: flag, 0 = more, 1 = last][4 bytes: len, big-endian][len bytes: ciphertext + 16-byte tag]
//! nonce = prefix (7 bytes) || segment index (4 bytes, big-endian) || flag (1 byte)
//! AAD   = the 5 header bytes
//! ```
//!
//! Frames carry their own length, so the chunk size used while encrypting is
//! not part of the format and the decrypting side may read in any size.

use std::io::{ErrorKind as IoErrorKind, Read, Write};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use sealdrop_core::{SealdropError, SealdropResult};
use secrecy::SecretString;

use crate::kdf::{derive_stream_key, KdfParams, StreamKey, NONCE_PREFIX_SIZE};
use crate::material::{Iv, Salt};
use crate::TAG_SIZE;

pub const MAGIC: &[u8; 4] = b"SDRP";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 5;
pub const FRAME_HEADER_LEN: usize = 5;

/// Default plaintext chunk size fed through the cipher
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest plaintext segment a frame may carry. Bounds decrypt-side memory.
pub const MAX_SEGMENT_LEN: usize = 16 * 1024 * 1024;

const NONCE_SIZE: usize = 12;
const FLAG_MORE: u8 = 0;
const FLAG_LAST: u8 = 1;

const HEADER: [u8; HEADER_LEN] = [MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], FORMAT_VERSION];

/// Pipeline parameters
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Plaintext bytes per segment on encrypt; read size on decrypt
    pub chunk_size: usize,
    pub kdf: KdfParams,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf: KdfParams::default(),
        }
    }
}

fn check_chunk_size(chunk_size: usize) -> SealdropResult<()> {
    if chunk_size == 0 || chunk_size > MAX_SEGMENT_LEN {
        return Err(SealdropError::CipherInit(format!(
            "chunk size {chunk_size} outside 1..={MAX_SEGMENT_LEN}"
        )));
    }
    Ok(())
}

fn segment_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], index: u32, last: bool) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..NONCE_SIZE - 1].copy_from_slice(&index.to_be_bytes());
    nonce[NONCE_SIZE - 1] = if last { FLAG_LAST } else { FLAG_MORE };
    nonce
}

fn new_cipher(key: &StreamKey) -> Aes256Gcm {
    Aes256Gcm::new(key.key_bytes().into())
}

/// Encrypting half of the stream. Push plaintext chunks in file order.
pub struct Sealer {
    cipher: Aes256Gcm,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    index: u32,
    header_pending: bool,
}

impl Sealer {
    pub fn new(key: &StreamKey) -> Self {
        Self {
            cipher: new_cipher(key),
            nonce_prefix: *key.nonce_prefix(),
            index: 0,
            header_pending: true,
        }
    }

    /// Seal a chunk that is not the end of the file.
    pub fn seal_chunk(&mut self, plaintext: &[u8]) -> SealdropResult<Vec<u8>> {
        self.seal(plaintext, false)
    }

    /// Seal the final chunk (possibly empty). Consumes the sealer.
    pub fn seal_last(mut self, plaintext: &[u8]) -> SealdropResult<Vec<u8>> {
        self.seal(plaintext, true)
    }

    /// Segments sealed so far
    pub fn segments(&self) -> u32 {
        self.index
    }

    fn seal(&mut self, plaintext: &[u8], last: bool) -> SealdropResult<Vec<u8>> {
        if plaintext.len() > MAX_SEGMENT_LEN {
            return Err(SealdropError::CipherInit(format!(
                "chunk of {} bytes exceeds segment limit {MAX_SEGMENT_LEN}",
                plaintext.len()
            )));
        }
        let next_index = self.index.checked_add(1).ok_or_else(|| {
            SealdropError::CipherInit("segment counter exhausted; use a larger chunk size".into())
        })?;

        let nonce = segment_nonce(&self.nonce_prefix, self.index, last);
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &HEADER,
                },
            )
            .map_err(|e| SealdropError::CipherInit(format!("segment encryption failed: {e}")))?;
        self.index = next_index;

        let header_len = if self.header_pending { HEADER_LEN } else { 0 };
        let mut out = Vec::with_capacity(header_len + FRAME_HEADER_LEN + sealed.len());
        if self.header_pending {
            out.extend_from_slice(&HEADER);
            self.header_pending = false;
        }
        out.push(if last { FLAG_LAST } else { FLAG_MORE });
        out.extend_from_slice(&(sealed.len() as u32).to_be_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenState {
    Header,
    Frames,
    Done,
}

/// Decrypting half of the stream.
///
/// Accepts ciphertext in arbitrarily sized pieces and returns plaintext for
/// every frame completed so far. Every returned byte has been authenticated,
/// but the stream is only known to be complete once [`Opener::finish`] succeeds.
pub struct Opener {
    cipher: Aes256Gcm,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    index: u32,
    buf: Vec<u8>,
    state: OpenState,
}

impl Opener {
    pub fn new(key: &StreamKey) -> Self {
        Self {
            cipher: new_cipher(key),
            nonce_prefix: *key.nonce_prefix(),
            index: 0,
            buf: Vec::new(),
            state: OpenState::Header,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == OpenState::Done
    }

    pub fn push(&mut self, ciphertext: &[u8]) -> SealdropResult<Vec<u8>> {
        self.buf.extend_from_slice(ciphertext);
        let mut plaintext = Vec::new();

        loop {
            match self.state {
                OpenState::Header => {
                    if self.buf.len() < HEADER_LEN {
                        break;
                    }
                    if self.buf[..HEADER_LEN] != HEADER {
                        return Err(SealdropError::DecryptionFailed(
                            "not a sealdrop stream or unsupported format version".into(),
                        ));
                    }
                    self.buf.drain(..HEADER_LEN);
                    self.state = OpenState::Frames;
                }
                OpenState::Frames => {
                    if self.buf.len() < FRAME_HEADER_LEN {
                        break;
                    }
                    let flag = self.buf[0];
                    if flag != FLAG_MORE && flag != FLAG_LAST {
                        return Err(SealdropError::DecryptionFailed(format!(
                            "segment {}: invalid frame flag",
                            self.index
                        )));
                    }
                    let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]])
                        as usize;
                    if !(TAG_SIZE..=MAX_SEGMENT_LEN + TAG_SIZE).contains(&len) {
                        return Err(SealdropError::DecryptionFailed(format!(
                            "segment {}: invalid frame length {len}",
                            self.index
                        )));
                    }
                    let frame_end = FRAME_HEADER_LEN + len;
                    if self.buf.len() < frame_end {
                        break;
                    }

                    let last = flag == FLAG_LAST;
                    let nonce = segment_nonce(&self.nonce_prefix, self.index, last);
                    let segment = self
                        .cipher
                        .decrypt(
                            Nonce::from_slice(&nonce),
                            Payload {
                                msg: &self.buf[FRAME_HEADER_LEN..frame_end],
                                aad: &HEADER,
                            },
                        )
                        .map_err(|_| {
                            SealdropError::DecryptionFailed(format!(
                                "segment {} failed authentication: wrong passphrase, IV, salt, or corrupted data",
                                self.index
                            ))
                        })?;
                    plaintext.extend_from_slice(&segment);
                    self.buf.drain(..frame_end);

                    if last {
                        self.state = OpenState::Done;
                    } else {
                        self.index = self.index.checked_add(1).ok_or_else(|| {
                            SealdropError::DecryptionFailed("segment counter overflow".into())
                        })?;
                    }
                }
                OpenState::Done => {
                    if !self.buf.is_empty() {
                        return Err(SealdropError::DecryptionFailed(
                            "unexpected data after final segment".into(),
                        ));
                    }
                    break;
                }
            }
        }

        Ok(plaintext)
    }

    /// Confirm the stream ended exactly after its final segment.
    pub fn finish(self) -> SealdropResult<()> {
        match self.state {
            OpenState::Done => Ok(()),
            _ => Err(SealdropError::DecryptionFailed(
                "ciphertext truncated before final segment".into(),
            )),
        }
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn fill_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Lazy sequence of ciphertext pieces produced from a plaintext reader.
///
/// Finite and non-restartable: yields one frame per chunk (the first one
/// prefixed with the stream header), then `None`. A short read marks the
/// end of input; when the input length is an exact multiple of the chunk
/// size, the final item is an empty last segment.
pub struct EncryptStream<R> {
    reader: R,
    sealer: Option<Sealer>,
    buf: Vec<u8>,
}

impl<R: Read> EncryptStream<R> {
    /// Build a stream over an already-derived key.
    pub fn with_key(reader: R, key: &StreamKey, chunk_size: usize) -> SealdropResult<Self> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            reader,
            sealer: Some(Sealer::new(key)),
            buf: vec![0u8; chunk_size],
        })
    }
}

impl<R: Read> Iterator for EncryptStream<R> {
    type Item = SealdropResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut sealer = self.sealer.take()?;

        let filled = match fill_chunk(&mut self.reader, &mut self.buf) {
            Ok(n) => n,
            Err(e) => return Some(Err(e.into())),
        };

        if filled < self.buf.len() {
            return Some(sealer.seal_last(&self.buf[..filled]));
        }

        let item = sealer.seal_chunk(&self.buf[..filled]);
        if item.is_ok() {
            self.sealer = Some(sealer);
        }
        Some(item)
    }
}

/// Derive the stream key once and return a lazy encrypting iterator over `reader`.
pub fn encrypt_stream<R: Read>(
    reader: R,
    passphrase: &SecretString,
    iv: &Iv,
    salt: Option<&Salt>,
    opts: &StreamOptions,
) -> SealdropResult<EncryptStream<R>> {
    check_chunk_size(opts.chunk_size)?;
    let key = derive_stream_key(passphrase, iv, salt, &opts.kdf)?;
    EncryptStream::with_key(reader, &key, opts.chunk_size)
}

/// Decrypt everything from `reader` into `writer`, returning plaintext bytes written.
///
/// On error, whatever already reached `writer` must be discarded by the caller.
pub fn decrypt_stream<R: Read, W: Write>(
    reader: R,
    writer: W,
    passphrase: &SecretString,
    iv: &Iv,
    salt: Option<&Salt>,
    opts: &StreamOptions,
) -> SealdropResult<u64> {
    check_chunk_size(opts.chunk_size)?;
    let key = derive_stream_key(passphrase, iv, salt, &opts.kdf)?;
    open_stream(reader, writer, &key, opts.chunk_size)
}

/// [`decrypt_stream`] over an already-derived key.
pub fn open_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &StreamKey,
    read_size: usize,
) -> SealdropResult<u64> {
    check_chunk_size(read_size)?;
    let mut opener = Opener::new(key);
    let mut buf = vec![0u8; read_size];
    let mut written = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let plaintext = opener.push(&buf[..n])?;
        writer.write_all(&plaintext)?;
        written += plaintext.len() as u64;
    }

    opener.finish()?;
    writer.flush()?;
    Ok(written)
}

/// Encrypt an in-memory buffer.
pub fn encrypt_to_vec(
    plaintext: &[u8],
    passphrase: &SecretString,
    iv: &Iv,
    salt: Option<&Salt>,
    opts: &StreamOptions,
) -> SealdropResult<Vec<u8>> {
    let mut out = Vec::with_capacity(plaintext.len() + HEADER_LEN + FRAME_HEADER_LEN + TAG_SIZE);
    for piece in encrypt_stream(plaintext, passphrase, iv, salt, opts)? {
        out.extend_from_slice(&piece?);
    }
    Ok(out)
}

/// Decrypt an in-memory buffer.
pub fn decrypt_to_vec(
    ciphertext: &[u8],
    passphrase: &SecretString,
    iv: &Iv,
    salt: Option<&Salt>,
    kdf: &KdfParams,
) -> SealdropResult<Vec<u8>> {
    let key = derive_stream_key(passphrase, iv, salt, kdf)?;
    let mut opener = Opener::new(&key);
    let plaintext = opener.push(ciphertext)?;
    opener.finish()?;
    Ok(plaintext)
}
