//! Key material generation: passphrase, IV, salt, access password
//!
//! Everything comes straight from the OS CSPRNG. Nothing here is ever derived
//! from user input, and secrets leave this module wrapped in `SecretString`.

use rand::{rngs::OsRng, RngCore};
use sealdrop_core::{SealdropError, SealdropResult};
use secrecy::SecretString;
use zeroize::Zeroizing;

/// Random bytes behind a passphrase (256 bits)
pub const PASSPHRASE_BYTES: usize = 32;
/// IV size (AES block size)
pub const IV_SIZE: usize = 16;
/// KDF salt size
pub const SALT_SIZE: usize = 16;
/// Random bytes behind an access password
pub const ACCESS_PASSWORD_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Passphrase,
    Iv,
    Salt,
    AccessPassword,
}

impl MaterialKind {
    pub fn byte_len(self) -> usize {
        match self {
            MaterialKind::Passphrase => PASSPHRASE_BYTES,
            MaterialKind::Iv => IV_SIZE,
            MaterialKind::Salt => SALT_SIZE,
            MaterialKind::AccessPassword => ACCESS_PASSWORD_BYTES,
        }
    }
}

/// Draw fresh random bytes for `kind` from the OS entropy source.
///
/// An unavailable entropy source is fatal; callers must not retry.
pub fn generate(kind: MaterialKind) -> SealdropResult<Zeroizing<Vec<u8>>> {
    let mut bytes = Zeroizing::new(vec![0u8; kind.byte_len()]);
    OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
        SealdropError::KeyGeneration(format!("OS entropy source unavailable: {e}"))
    })?;
    Ok(bytes)
}

fn generate_secret(kind: MaterialKind) -> SealdropResult<SecretString> {
    let bytes = generate(kind)?;
    Ok(SecretString::from(hex::encode(&*bytes)))
}

macro_rules! random_block {
    ($(#[$meta:meta])* $name:ident, $kind:expr, $size:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub struct $name([u8; $size]);

        impl $name {
            pub fn generate() -> SealdropResult<Self> {
                let bytes = generate($kind)?;
                let mut block = [0u8; $size];
                block.copy_from_slice(&bytes);
                Ok(Self(block))
            }

            pub fn from_bytes(bytes: [u8; $size]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $size] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex. Any other length is a key-material error.
            pub fn from_hex(s: &str) -> SealdropResult<Self> {
                let mut block = [0u8; $size];
                hex::decode_to_slice(s.trim(), &mut block).map_err(|e| {
                    SealdropError::CipherInit(format!(
                        "{} must be {} hex characters: {e}",
                        stringify!($name),
                        $size * 2
                    ))
                })?;
                Ok(Self(block))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }
    };
}

random_block!(
    /// Per-file initialization vector. Not secret, never reused.
    Iv,
    MaterialKind::Iv,
    IV_SIZE
);

random_block!(
    /// Argon2id salt. Not secret.
    Salt,
    MaterialKind::Salt,
    SALT_SIZE
);

/// Which optional pieces to generate alongside passphrase and IV.
#[derive(Debug, Clone, Copy)]
pub struct MaterialOptions {
    pub salt: bool,
    pub access_password: bool,
}

impl Default for MaterialOptions {
    fn default() -> Self {
        Self {
            salt: true,
            access_password: false,
        }
    }
}

/// Everything needed to encrypt one file, generated fresh per upload.
pub struct KeyMaterial {
    /// 64 lowercase hex characters
    pub passphrase: SecretString,
    pub iv: Iv,
    pub salt: Option<Salt>,
    /// 32 lowercase hex characters
    pub access_password: Option<SecretString>,
}

impl KeyMaterial {
    pub fn generate(opts: MaterialOptions) -> SealdropResult<Self> {
        let passphrase = generate_secret(MaterialKind::Passphrase)?;
        let iv = Iv::generate()?;
        let salt = if opts.salt { Some(Salt::generate()?) } else { None };
        let access_password = if opts.access_password {
            Some(generate_secret(MaterialKind::AccessPassword)?)
        } else {
            None
        };

        Ok(Self {
            passphrase,
            iv,
            salt,
            access_password,
        })
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("passphrase", &"[REDACTED]")
            .field("iv", &self.iv)
            .field("salt", &self.salt)
            .field(
                "access_password",
                &self.access_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashSet;

    #[test]
    fn test_generate_lengths() {
        assert_eq!(generate(MaterialKind::Passphrase).unwrap().len(), 32);
        assert_eq!(generate(MaterialKind::Iv).unwrap().len(), 16);
        assert_eq!(generate(MaterialKind::Salt).unwrap().len(), 16);
        assert_eq!(generate(MaterialKind::AccessPassword).unwrap().len(), 16);
    }

    #[test]
    fn test_key_material_shape() {
        let km = KeyMaterial::generate(MaterialOptions {
            salt: true,
            access_password: true,
        })
        .unwrap();

        let pass = km.passphrase.expose_secret();
        assert_eq!(pass.len(), 64);
        assert!(pass.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(km.salt.is_some());
        assert_eq!(km.access_password.unwrap().expose_secret().len(), 32);
    }

    #[test]
    fn test_optional_parts_omitted() {
        let km = KeyMaterial::generate(MaterialOptions {
            salt: false,
            access_password: false,
        })
        .unwrap();
        assert!(km.salt.is_none());
        assert!(km.access_password.is_none());
    }

    #[test]
    fn test_never_reused() {
        let mut passphrases = HashSet::new();
        let mut ivs = HashSet::new();
        for _ in 0..1000 {
            let km = KeyMaterial::generate(MaterialOptions::default()).unwrap();
            assert!(passphrases.insert(km.passphrase.expose_secret().to_string()));
            assert!(ivs.insert(*km.iv.as_bytes()));
        }
    }

    #[test]
    fn test_iv_hex_roundtrip() {
        let iv = Iv::generate().unwrap();
        assert_eq!(Iv::from_hex(&iv.to_hex()).unwrap(), iv);
    }

    #[test]
    fn test_iv_from_hex_wrong_length() {
        let err = Iv::from_hex("abcd").unwrap_err();
        assert!(matches!(err, SealdropError::CipherInit(_)));
        assert!(Salt::from_hex("zz".repeat(16).as_str()).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let km = KeyMaterial::generate(MaterialOptions {
            salt: true,
            access_password: true,
        })
        .unwrap();
        let rendered = format!("{km:?}");
        assert!(!rendered.contains(km.passphrase.expose_secret()));
        assert!(rendered.contains("[REDACTED]"));
    }
}
