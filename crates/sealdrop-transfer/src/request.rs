//! Typed requests validated once at the boundary

use secrecy::{ExposeSecret, SecretString};
use sealdrop_core::{FileId, SealdropError, SealdropResult};

/// Longest passphrase accepted from a caller
pub const MAX_PASSPHRASE_LEN: usize = 1024;

/// Longest filename kept, in bytes
pub const MAX_FILENAME_LEN: usize = 255;

const FALLBACK_FILENAME: &str = "download";

/// A recipient's request to decrypt a shared file
pub struct DownloadRequest {
    file_id: FileId,
    passphrase: SecretString,
    access_password: Option<SecretString>,
}

impl DownloadRequest {
    pub fn new(
        file_id: &str,
        passphrase: String,
        access_password: Option<String>,
    ) -> SealdropResult<Self> {
        let file_id: FileId = file_id.parse()?;

        if passphrase.is_empty() {
            return Err(SealdropError::InvalidRequest("passphrase is required".into()));
        }
        if passphrase.len() > MAX_PASSPHRASE_LEN {
            return Err(SealdropError::InvalidRequest(format!(
                "passphrase longer than {MAX_PASSPHRASE_LEN} bytes"
            )));
        }
        if access_password.as_deref() == Some("") {
            return Err(SealdropError::InvalidRequest(
                "access password must not be empty".into(),
            ));
        }

        Ok(Self {
            file_id,
            passphrase: SecretString::from(passphrase),
            access_password: access_password.map(SecretString::from),
        })
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn passphrase(&self) -> &SecretString {
        &self.passphrase
    }

    pub fn access_password(&self) -> Option<&SecretString> {
        self.access_password.as_ref()
    }
}

impl std::fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("file_id", &self.file_id)
            .field("passphrase", &"[REDACTED]")
            .field(
                "access_password",
                &self.access_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Reduce an uploader-supplied name to a safe display filename.
///
/// Keeps only the last path component, drops control characters and quotes,
/// and bounds the result to [`MAX_FILENAME_LEN`] bytes.
pub fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return FALLBACK_FILENAME.to_string();
    }

    let mut end = cleaned.len().min(MAX_FILENAME_LEN);
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    cleaned[..end].to_string()
}

/// Owned copy of a secret, for moving into a blocking task
pub(crate) fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdrop_core::ErrorKind;

    fn id() -> String {
        FileId::generate().to_string()
    }

    #[test]
    fn test_valid_request() {
        let file_id = id();
        let req = DownloadRequest::new(&file_id, "ab".repeat(32), Some("pw".into())).unwrap();
        assert_eq!(req.file_id().to_string(), file_id);
        assert_eq!(req.passphrase().expose_secret(), "ab".repeat(32));
        assert_eq!(req.access_password().unwrap().expose_secret(), "pw");
    }

    #[test]
    fn test_malformed_file_id() {
        let err = DownloadRequest::new("not-a-uuid", "p".into(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_empty_passphrase() {
        let err = DownloadRequest::new(&id(), String::new(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_oversized_passphrase() {
        let err = DownloadRequest::new(&id(), "x".repeat(MAX_PASSPHRASE_LEN + 1), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(DownloadRequest::new(&id(), "x".repeat(MAX_PASSPHRASE_LEN), None).is_ok());
    }

    #[test]
    fn test_empty_access_password() {
        let err = DownloadRequest::new(&id(), "p".into(), Some(String::new())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_debug_is_redacted() {
        let req = DownloadRequest::new(&id(), "topsecret".into(), Some("hunter2".into())).unwrap();
        let rendered = format!("{req:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_sanitize_keeps_plain_names() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("résumé 2024.docx"), "résumé 2024.docx");
    }

    #[test]
    fn test_sanitize_strips_paths() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename("dir/"), "download");
    }

    #[test]
    fn test_sanitize_strips_controls_and_quotes() {
        assert_eq!(sanitize_filename("a\r\nb\"c.txt"), "abc.txt");
        assert_eq!(sanitize_filename("\u{0}\u{7}"), "download");
    }

    #[test]
    fn test_sanitize_fallbacks() {
        assert_eq!(sanitize_filename(""), "download");
        assert_eq!(sanitize_filename("   "), "download");
        assert_eq!(sanitize_filename(".."), "download");
    }

    #[test]
    fn test_sanitize_bounds_length_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize_filename(&long);
        assert!(out.len() <= MAX_FILENAME_LEN);
        assert_eq!(out.len(), 254);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
