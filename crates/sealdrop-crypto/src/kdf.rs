//! Key derivation: Argon2id passphrase → master key → HKDF stream key

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use sealdrop_core::config::CryptoConfig;
use sealdrop_core::{SealdropError, SealdropResult};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::material::{Iv, Salt};
use crate::KEY_SIZE;

/// Bytes of the segment nonce that are fixed for a whole file.
/// The remaining 5 bytes of the 96-bit GCM nonce are counter and last flag.
pub const NONCE_PREFIX_SIZE: usize = 7;

/// A 256-bit master key derived from a passphrase via Argon2id.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id parameters for KDF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl From<&CryptoConfig> for KdfParams {
    fn from(cfg: &CryptoConfig) -> Self {
        Self {
            mem_cost_kib: cfg.argon2_mem_cost_kib,
            time_cost: cfg.argon2_time_cost,
            parallelism: cfg.argon2_parallelism,
        }
    }
}

/// Derive a 256-bit master key from a passphrase and salt using Argon2id.
pub fn derive_master_key(
    passphrase: &SecretString,
    salt: &Salt,
    params: &KdfParams,
) -> SealdropResult<MasterKey> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| SealdropError::CipherInit(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(
            passphrase.expose_secret().as_bytes(),
            salt.as_bytes(),
            &mut key,
        )
        .map_err(|e| SealdropError::CipherInit(format!("Argon2id KDF failed: {e}")))?;

    Ok(MasterKey::from_bytes(key))
}

/// Key and nonce prefix for one file's cipher stream. Zeroized on drop.
pub struct StreamKey {
    key: [u8; KEY_SIZE],
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

impl StreamKey {
    pub fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn nonce_prefix(&self) -> &[u8; NONCE_PREFIX_SIZE] {
        &self.nonce_prefix
    }
}

impl Drop for StreamKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce_prefix.zeroize();
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Derive the per-file stream key, once, from passphrase + IV (+ salt).
///
/// With a salt the passphrase is stretched through Argon2id first. Without
/// one it is used directly as HKDF input, which is only sound for
/// high-entropy generated passphrases.
pub fn derive_stream_key(
    passphrase: &SecretString,
    iv: &Iv,
    salt: Option<&Salt>,
    params: &KdfParams,
) -> SealdropResult<StreamKey> {
    if passphrase.expose_secret().is_empty() {
        return Err(SealdropError::CipherInit("passphrase is empty".into()));
    }

    let stretched;
    let ikm: &[u8] = match salt {
        Some(salt) => {
            stretched = derive_master_key(passphrase, salt, params)?;
            stretched.as_bytes()
        }
        None => passphrase.expose_secret().as_bytes(),
    };

    let hkdf = Hkdf::<Sha256>::new(Some(iv.as_bytes()), ikm);
    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(b"sealdrop-stream-key", &mut key)
        .map_err(|e| SealdropError::CipherInit(format!("HKDF expand failed: {e}")))?;
    let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
    hkdf.expand(b"sealdrop-stream-nonce", &mut nonce_prefix)
        .map_err(|e| SealdropError::CipherInit(format!("HKDF expand failed: {e}")))?;

    tracing::trace!(salted = salt.is_some(), "stream key derived");
    Ok(StreamKey { key, nonce_prefix })
}
