//! Access-password gate: salted Argon2id digest, constant-time verification
//!
//! Only the digest is ever stored. The access password is independent of the
//! decryption passphrase: knowing one reveals nothing about the other.

use sealdrop_core::SealdropResult;
use secrecy::SecretString;
use subtle::ConstantTimeEq;

use crate::kdf::{derive_master_key, KdfParams};
use crate::material::Salt;
use crate::KEY_SIZE;

#[derive(Clone)]
pub struct AccessHash {
    salt: Salt,
    digest: [u8; KEY_SIZE],
    params: KdfParams,
}

impl AccessHash {
    /// Hash `password` under a fresh random salt.
    pub fn new(password: &SecretString, params: &KdfParams) -> SealdropResult<Self> {
        let salt = Salt::generate()?;
        let digest = *derive_master_key(password, &salt, params)?.as_bytes();
        Ok(Self {
            salt,
            digest,
            params: *params,
        })
    }

    /// Recompute the digest for `candidate` and compare in constant time.
    pub fn verify(&self, candidate: &SecretString) -> bool {
        match derive_master_key(candidate, &self.salt, &self.params) {
            Ok(key) => key.as_bytes()[..].ct_eq(&self.digest[..]).into(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for AccessHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessHash")
            .field("salt", &self.salt)
            .field("digest", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_verify_correct_password() {
        let pw = SecretString::from("0123456789abcdef0123456789abcdef");
        let hash = AccessHash::new(&pw, &fast_params()).unwrap();
        assert!(hash.verify(&pw));
    }

    #[test]
    fn test_verify_wrong_password() {
        let hash = AccessHash::new(&SecretString::from("right"), &fast_params()).unwrap();
        assert!(!hash.verify(&SecretString::from("wrong")));
        assert!(!hash.verify(&SecretString::from("")));
    }

    #[test]
    fn test_same_password_different_salts() {
        let pw = SecretString::from("shared");
        let a = AccessHash::new(&pw, &fast_params()).unwrap();
        let b = AccessHash::new(&pw, &fast_params()).unwrap();
        assert_ne!(a.digest, b.digest, "fresh salt per hash");
        assert!(a.verify(&pw) && b.verify(&pw));
    }

    #[test]
    fn test_debug_hides_digest() {
        let hash = AccessHash::new(&SecretString::from("pw"), &fast_params()).unwrap();
        assert!(format!("{hash:?}").contains("[REDACTED]"));
    }
}
