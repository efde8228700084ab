//! # Request Handler
//!
//! One axum [`Router`] serves both transports:
//!
//! - `/upload` — multipart upload; answers with the MD5 of the
//!   `uploadfile` field, or with an HTML upload form.
//! - everything else — either static files from `--www`, or synthetic
//!   content: `GET /<n>` returns `n` pseudo-random bytes.

use std::io;
use std::path::Path;

use axum::body::{Body, Bytes};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use md5::{Digest, Md5};
use thiserror::Error;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Largest synthetic response and largest accepted upload (1 GiB).
pub const MAX_CONTENT_LENGTH: usize = 1 << 30;

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "uploadfile";

pub const UPLOAD_FORM: &str = r#"<html><body><form action="/demo/upload" method="post" enctype="multipart/form-data">
				<input type="file" name="uploadfile"><br>
				<input type="submit">
			</form></body></html>"#;

const CHUNK_SIZE: usize = 64 * 1024;

/// Build the router. With `www` set, static files replace synthetic content.
pub fn router(www: Option<&Path>) -> Router {
    let router = Router::new().route("/upload", any(upload));
    let router = match www {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(synthetic),
    };
    router
        .layer(DefaultBodyLimit::max(MAX_CONTENT_LENGTH))
        .layer(TraceLayer::new_for_http())
}

// ─── Synthetic Content ──────────────────────────────────────────────────────

/// Lehmer (Park–Miller) generator, seed 1; each step yields the low byte of
/// the new state.
#[derive(Debug, Clone)]
pub struct Lehmer {
    state: u64,
}

impl Default for Lehmer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lehmer {
    const MULTIPLIER: u64 = 48_271;
    const MODULUS: u64 = 2_147_483_647;

    pub fn new() -> Self {
        Lehmer { state: 1 }
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.step();
        }
    }

    fn step(&mut self) -> u8 {
        self.state = self.state * Self::MULTIPLIER % Self::MODULUS;
        self.state as u8
    }
}

impl Iterator for Lehmer {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        Some(self.step())
    }
}

/// First `len` bytes of the synthetic sequence.
pub fn generate(len: usize) -> Vec<u8> {
    Lehmer::new().take(len).collect()
}

/// Length requested by a synthetic-content URI: the path and query with
/// every `/` removed, as a decimal in `1..=1 GiB`.
pub fn requested_length(path_and_query: &str) -> Option<usize> {
    let n: i64 = path_and_query.replace('/', "").parse().ok()?;
    if n < 1 || n > MAX_CONTENT_LENGTH as i64 {
        return None;
    }
    usize::try_from(n).ok()
}

async fn synthetic(uri: Uri) -> Response {
    debug!(%uri, "synthetic request");
    let requested = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    match requested_length(requested) {
        Some(len) => (StatusCode::OK, synthetic_body(len)).into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// Stream the sequence in chunks rather than materialising up to 1 GiB.
fn synthetic_body(len: usize) -> Body {
    let chunks = futures::stream::unfold((Lehmer::new(), len), |(mut generator, remaining)| async move {
        if remaining == 0 {
            return None;
        }
        let n = remaining.min(CHUNK_SIZE);
        let mut chunk = vec![0u8; n];
        generator.fill(&mut chunk);
        Some((Ok::<_, io::Error>(Bytes::from(chunk)), (generator, remaining - n)))
    });
    Body::from_stream(chunks)
}

// ─── Upload ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
enum UploadError {
    #[error("not a multipart request: {0}")]
    Rejected(#[from] MultipartRejection),
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("no \"uploadfile\" field in upload")]
    MissingField,
}

async fn upload(request: Request) -> Response {
    if request.method() != Method::POST {
        return Html(UPLOAD_FORM).into_response();
    }
    match upload_digest(request).await {
        Ok(digest) => digest.into_response(),
        Err(e) => {
            info!(error = %e, "error receiving upload");
            Html(UPLOAD_FORM).into_response()
        }
    }
}

async fn upload_digest(request: Request) -> Result<String, UploadError> {
    let mut multipart = Multipart::from_request(request, &()).await?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            let data = field.bytes().await?;
            debug!(bytes = data.len(), "upload received");
            return Ok(hex::encode(Md5::digest(&data)));
        }
    }
    Err(UploadError::MissingField)
}
