use thiserror::Error;

pub type SealdropResult<T> = Result<T, SealdropError>;

#[derive(Debug, Error)]
pub enum SealdropError {
    /// The OS entropy source could not be read. Fatal, never retried.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Key material is missing or malformed.
    #[error("cipher init failed: {0}")]
    CipherInit(String),

    /// Wrong passphrase/IV/salt, or ciphertext that does not authenticate.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied")]
    Forbidden,

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, machine-readable classification of a [`SealdropError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    KeyGeneration,
    CipherInit,
    DecryptionFailed,
    NotFound,
    Forbidden,
    DuplicateId,
    InvalidRequest,
    Storage,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::KeyGeneration => "key_generation",
            ErrorKind::CipherInit => "cipher_init",
            ErrorKind::DecryptionFailed => "decryption_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::DuplicateId => "duplicate_id",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SealdropError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SealdropError::KeyGeneration(_) => ErrorKind::KeyGeneration,
            SealdropError::CipherInit(_) => ErrorKind::CipherInit,
            SealdropError::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            SealdropError::NotFound(_) => ErrorKind::NotFound,
            SealdropError::Forbidden => ErrorKind::Forbidden,
            SealdropError::DuplicateId(_) => ErrorKind::DuplicateId,
            SealdropError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            SealdropError::Storage(_) => ErrorKind::Storage,
            SealdropError::Config(_) => ErrorKind::Config,
            SealdropError::Io(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(SealdropError::Forbidden.kind(), ErrorKind::Forbidden);
        assert_eq!(
            SealdropError::DecryptionFailed("tag mismatch".into()).kind(),
            ErrorKind::DecryptionFailed
        );
        let io = std::io::Error::other("disk gone");
        assert_eq!(SealdropError::from(io).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_forbidden_message_carries_no_detail() {
        assert_eq!(SealdropError::Forbidden.to_string(), "access denied");
    }
}
