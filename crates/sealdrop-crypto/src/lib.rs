//! sealdrop-crypto: end-to-end encryption for shared files
//!
//! Pipeline: plaintext → fixed-size chunks → AES-256-GCM segments (one key,
//! one advancing nonce counter per file) → opaque ciphertext blob
//!
//! Key schedule:
//! ```text
//! passphrase (256-bit random, hex) ──Argon2id(salt)──▶ master key
//!   └── HKDF-SHA256(salt = IV)
//!         ├── "sealdrop-stream-key"   → AES-256-GCM key
//!         └── "sealdrop-stream-nonce" → 7-byte nonce prefix
//! segment nonce = prefix || counter (u32 BE) || last flag
//! ```
//!
//! Access passwords never touch the cipher: they gate downloads and are only
//! kept as an Argon2id digest (see [`access`]).

pub mod access;
pub mod kdf;
pub mod material;
pub mod stream;

pub use access::AccessHash;
pub use kdf::{derive_master_key, derive_stream_key, KdfParams, MasterKey, StreamKey};
pub use material::{generate, Iv, KeyMaterial, MaterialKind, MaterialOptions, Salt};
pub use stream::{
    decrypt_stream, decrypt_to_vec, encrypt_stream, encrypt_to_vec, open_stream, EncryptStream,
    Opener, Sealer, StreamOptions,
};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
