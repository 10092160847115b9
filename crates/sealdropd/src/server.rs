//! HTTP API: upload, decrypt and sealed (client-side encrypted) file routes

use std::io;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::TryStreamExt;
use secrecy::{ExposeSecret, SecretString};
use sealdrop_core::{ErrorKind, FileId, SealdropError};
use sealdrop_crypto::{Iv, Salt};
use sealdrop_transfer::{DownloadRequest, MetadataRegistry, SealedMetadata, Transfer};
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;

use crate::metrics::Metrics;

const IV_HEADER: HeaderName = HeaderName::from_static("x-sealdrop-iv");
const SALT_HEADER: HeaderName = HeaderName::from_static("x-sealdrop-salt");
const FILENAME_HEADER: HeaderName = HeaderName::from_static("x-sealdrop-filename");

pub struct AppState<R> {
    pub transfer: Transfer<R>,
    pub metrics: Arc<Metrics>,
    /// Base URL for share links, without trailing slash
    pub public_url: Option<String>,
}

pub fn router<R: MetadataRegistry>(state: Arc<AppState<R>>) -> Router {
    Router::new()
        .route("/api/upload", post(upload::<R>))
        .route("/api/upload/sealed", post(upload_sealed::<R>))
        .route("/api/decrypt", post(decrypt::<R>))
        .route("/api/file/{file_id}", post(fetch_sealed::<R>))
        .with_state(state)
}

/// JSON error body: `{"error": kind, "message": ..}`
pub struct ApiError(SealdropError);

impl From<SealdropError> for ApiError {
    fn from(e: SealdropError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self(SealdropError::InvalidRequest(e.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self(SealdropError::InvalidRequest(e.body_text()))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::DecryptionFailed => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidRequest | ErrorKind::CipherInit => StatusCode::BAD_REQUEST,
        ErrorKind::DuplicateId => StatusCode::CONFLICT,
        ErrorKind::KeyGeneration | ErrorKind::Storage | ErrorKind::Config | ErrorKind::Io => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        let message = if status.is_server_error() {
            tracing::error!(kind = %kind, "request failed: {}", self.0);
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        let body = ErrorBody {
            error: kind.as_str(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub passphrase: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub access_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub share_link: Option<String>,
    pub size: u64,
}

fn body_reader(body: Body) -> impl tokio::io::AsyncRead + Unpin + Send {
    StreamReader::new(body.into_data_stream().map_err(io::Error::other))
}

async fn upload<R: MetadataRegistry>(
    State(state): State<Arc<AppState<R>>>,
    query: Result<Query<UploadQuery>, QueryRejection>,
    body: Body,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let Query(query) = query?;
    let filename = query.filename.unwrap_or_default();
    let result = state.transfer.upload(body_reader(body), &filename).await;
    state
        .metrics
        .record_upload(result.as_ref().map(|r| r.size).map_err(|e| e.kind()));
    let receipt = result?;

    let share_link = state
        .public_url
        .as_ref()
        .map(|base| format!("{base}/decrypt?fileId={}", receipt.file_id));
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file_id: receipt.file_id.to_string(),
            passphrase: receipt.passphrase.expose_secret().to_owned(),
            access_password: receipt
                .access_password
                .as_ref()
                .map(|p| p.expose_secret().to_owned()),
            share_link,
            size: receipt.size,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct SealedQuery {
    filename: Option<String>,
    iv: String,
    salt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SealedResponse {
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub access_password: Option<String>,
    pub size: u64,
}

async fn upload_sealed<R: MetadataRegistry>(
    State(state): State<Arc<AppState<R>>>,
    query: Result<Query<SealedQuery>, QueryRejection>,
    body: Body,
) -> Result<(StatusCode, Json<SealedResponse>), ApiError> {
    let Query(query) = query?;
    let meta = SealedMetadata {
        iv: Iv::from_hex(&query.iv)?,
        salt: query.salt.as_deref().map(Salt::from_hex).transpose()?,
        filename: query.filename.unwrap_or_default(),
    };
    let result = state.transfer.store_sealed(body_reader(body), meta).await;
    state
        .metrics
        .record_upload(result.as_ref().map(|r| r.size).map_err(|e| e.kind()));
    let receipt = result?;

    Ok((
        StatusCode::CREATED,
        Json(SealedResponse {
            file_id: receipt.file_id.to_string(),
            access_password: receipt
                .access_password
                .as_ref()
                .map(|p| p.expose_secret().to_owned()),
            size: receipt.size,
        }),
    ))
}

#[derive(Deserialize)]
pub struct DecryptBody {
    pub file_id: String,
    pub passphrase: String,
    #[serde(default)]
    pub access_password: Option<String>,
}

async fn decrypt<R: MetadataRegistry>(
    State(state): State<Arc<AppState<R>>>,
    body: Result<Json<DecryptBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let req = DownloadRequest::new(&body.file_id, body.passphrase, body.access_password)?;

    // Buffered: the status must reflect authentication of the whole file.
    let result = state.transfer.download(&req).await;
    state.metrics.record_download(
        result
            .as_ref()
            .map(|d| d.plaintext.len() as u64)
            .map_err(|e| e.kind()),
    );
    let download = result?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&download.filename),
    );
    Ok((StatusCode::OK, headers, download.plaintext).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct FetchBody {
    #[serde(default)]
    access_password: Option<String>,
}

async fn fetch_sealed<R: MetadataRegistry>(
    State(state): State<Arc<AppState<R>>>,
    Path(file_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let file_id: FileId = file_id.parse()?;
    let fetch: FetchBody = if body.is_empty() {
        FetchBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| SealdropError::InvalidRequest(format!("malformed JSON body: {e}")))?
    };
    let access_password = fetch.access_password.map(SecretString::from);

    let result = state
        .transfer
        .fetch_sealed(&file_id, access_password.as_ref())
        .await;
    state.metrics.record_download(
        result
            .as_ref()
            .map(|d| d.ciphertext.len())
            .map_err(|e| e.kind()),
    );
    let sealed = result?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(IV_HEADER, header_value(&sealed.iv.to_hex()));
    if let Some(salt) = &sealed.salt {
        headers.insert(SALT_HEADER, header_value(&salt.to_hex()));
    }
    headers.insert(FILENAME_HEADER, header_value(&percent_encode(&sealed.filename)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(sealed.ciphertext.len()));

    let chunks = futures::stream::try_unfold(sealed.ciphertext, |mut reader| async move {
        let next = reader.next_chunk().await.inspect_err(|e| {
            tracing::error!(kind = %e.kind(), "sealed download interrupted: {e}");
        })?;
        Ok::<_, SealdropError>(next.map(|chunk| (chunk, reader)))
    });
    Ok((StatusCode::OK, headers, Body::from_stream(chunks)).into_response())
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// `attachment` disposition; non-ASCII names go in the RFC 5987 `filename*` form.
fn content_disposition(filename: &str) -> HeaderValue {
    let value = if filename.is_ascii() {
        format!("attachment; filename=\"{filename}\"")
    } else {
        format!(
            "attachment; filename=\"download\"; filename*=UTF-8''{}",
            percent_encode(filename)
        )
    };
    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"download\""))
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use sealdrop_crypto::{encrypt_to_vec, KdfParams, StreamOptions};
    use sealdrop_storage::BlobStore;
    use sealdrop_transfer::{MemoryRegistry, TransferOptions};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const FAST_KDF: KdfParams = KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    };

    fn app_with(public_url: Option<&str>) -> Router {
        let op = opendal::Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let opts = TransferOptions {
            chunk_size: 4096,
            kdf: FAST_KDF,
            access_password: true,
            max_upload_bytes: 1024 * 1024,
        };
        let transfer =
            Transfer::new(BlobStore::new(op, "uploads"), MemoryRegistry::new(), opts).unwrap();
        router(Arc::new(AppState {
            transfer,
            metrics: Arc::new(Metrics::new()),
            public_url: public_url.map(str::to_string),
        }))
    }

    fn app() -> Router {
        app_with(None)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, body)
    }

    fn post_raw(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::post(uri).body(body.into()).unwrap()
    }

    fn post_json(uri: &str, value: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap()
    }

    async fn upload(app: &Router, data: &'static [u8], name: &str) -> UploadResponse {
        let (status, _, body) = send(app, post_raw(&format!("/api/upload?filename={name}"), data)).await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&body).unwrap()
    }

    fn error_kind(body: &Bytes) -> String {
        let v: Value = serde_json::from_slice(body).unwrap();
        v["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_upload_and_decrypt() {
        let app = app();
        let up = upload(&app, b"hello", "hello.txt").await;
        assert_eq!(up.size, 5);
        assert_eq!(up.passphrase.len(), 64);
        assert!(up.access_password.is_some());
        assert!(up.share_link.is_none());

        let (status, headers, body) = send(
            &app,
            post_json(
                "/api/decrypt",
                json!({
                    "file_id": up.file_id,
                    "passphrase": up.passphrase,
                    "access_password": up.access_password,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"hello");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"hello.txt\""
        );
    }

    #[tokio::test]
    async fn test_share_link() {
        let app = app_with(Some("https://drop.example.com"));
        let up = upload(&app, b"x", "x").await;
        assert_eq!(
            up.share_link.unwrap(),
            format!("https://drop.example.com/decrypt?fileId={}", up.file_id)
        );
    }

    #[tokio::test]
    async fn test_decrypt_error_statuses() {
        let app = app();
        let up = upload(&app, b"hello", "hello.txt").await;

        let wrong_pass = json!({
            "file_id": up.file_id,
            "passphrase": "00".repeat(32),
            "access_password": up.access_password,
        });
        let (status, _, body) = send(&app, post_json("/api/decrypt", wrong_pass)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_kind(&body), "decryption_failed");

        let wrong_access = json!({
            "file_id": up.file_id,
            "passphrase": up.passphrase,
            "access_password": "nope",
        });
        let (status, _, body) = send(&app, post_json("/api/decrypt", wrong_access)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_kind(&body), "forbidden");

        let unknown = json!({
            "file_id": FileId::generate().to_string(),
            "passphrase": up.passphrase,
        });
        let (status, _, _) = send(&app, post_json("/api/decrypt", unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let malformed = json!({ "file_id": "../etc", "passphrase": "x" });
        let (status, _, body) = send(&app, post_json("/api/decrypt", malformed)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_kind(&body), "invalid_request");

        let (status, _, _) = send(&app, post_json("/api/decrypt", json!({ "nope": 1 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let app = app();
        let big = vec![0u8; 1024 * 1024 + 1];
        let (status, _, body) = send(&app, post_raw("/api/upload?filename=big", big)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_kind(&body), "invalid_request");
    }

    #[tokio::test]
    async fn test_sealed_upload_and_fetch() {
        let app = app();
        let passphrase = SecretString::from("ab".repeat(32));
        let iv = Iv::generate().unwrap();
        let salt = Salt::generate().unwrap();
        let opts = StreamOptions {
            chunk_size: 1024,
            kdf: FAST_KDF,
        };
        let ciphertext = encrypt_to_vec(b"client side", &passphrase, &iv, Some(&salt), &opts).unwrap();

        let uri = format!(
            "/api/upload/sealed?filename=notes%20v2.txt&iv={}&salt={}",
            iv.to_hex(),
            salt.to_hex()
        );
        let (status, _, body) = send(&app, post_raw(&uri, ciphertext.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let sealed: SealedResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(sealed.size, ciphertext.len() as u64);

        let fetch_uri = format!("/api/file/{}", sealed.file_id);
        let (status, _, _) = send(&app, post_raw(&fetch_uri, Body::empty())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, headers, body) = send(
            &app,
            post_json(&fetch_uri, json!({ "access_password": sealed.access_password })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], &ciphertext[..]);
        assert_eq!(
            headers[header::CONTENT_LENGTH],
            ciphertext.len().to_string().as_str()
        );
        assert_eq!(headers[IV_HEADER], iv.to_hex().as_str());
        assert_eq!(headers[SALT_HEADER], salt.to_hex().as_str());
        assert_eq!(headers[FILENAME_HEADER], "notes%20v2.txt");
    }

    #[tokio::test]
    async fn test_sealed_upload_bad_iv() {
        let app = app();
        let (status, _, body) =
            send(&app, post_raw("/api/upload/sealed?iv=zz", Body::from("x"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_kind(&body), "cipher_init");
    }

    #[tokio::test]
    async fn test_sealed_upload_missing_iv_is_json_error() {
        let app = app();
        let (status, headers, body) =
            send(&app, post_raw("/api/upload/sealed?filename=x", Body::from("x"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(error_kind(&body), "invalid_request");
    }

    #[tokio::test]
    async fn test_fetch_malformed_id() {
        let app = app();
        let (status, _, _) = send(&app, post_raw("/api/file/not-a-uuid", Body::empty())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_content_disposition_non_ascii() {
        let value = content_disposition("résumé.pdf");
        assert_eq!(
            value,
            "attachment; filename=\"download\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
        );
    }

    #[test]
    fn test_server_errors_hide_details() {
        let resp = ApiError(SealdropError::Storage("s3://secret-bucket timeout".into()))
            .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
