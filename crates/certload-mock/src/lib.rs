//! Stand-in for a connector's certificate issue endpoint

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use axum::http::StatusCode;

pub const ISSUE_ROUTE: &str = "/v2/authorityProvider/authorities/:uuid/certificates/issue";

/// Placeholder certificate returned on success.
const CERTIFICATE_DATA: &str = "MIIBszCCAVmgAwIBAgIUY2VydGxvYWQtbW9jay1hdXRob3JpdHk=";

/// What the mock saw on the most recent issue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub authority_uuid: String,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub body: Vec<u8>,
}

struct Inner {
    status: StatusCode,
    body: String,
    requests: AtomicUsize,
    last: Mutex<Option<RecordedRequest>>,
}

/// A stateless issuing authority: every request gets the same response.
#[derive(Clone)]
pub struct MockAuthority {
    inner: Arc<Inner>,
}

impl Default for MockAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthority {
    /// Answers 200 with a `certificateData` body.
    pub fn new() -> Self {
        let body = serde_json::json!({ "certificateData": CERTIFICATE_DATA }).to_string();
        Self::with_response(StatusCode::OK, body)
    }

    /// Answers `status` with a `{"message": ...}` body.
    pub fn failing(status: StatusCode) -> Self {
        let message = status.canonical_reason().unwrap_or("error");
        let body = serde_json::json!({ "message": message }).to_string();
        Self::with_response(status, body)
    }

    /// Answers with a fixed status and raw body. The body is not checked for
    /// JSON validity.
    pub fn with_response(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                status,
                body: body.into(),
                requests: AtomicUsize::new(0),
                last: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status
    }

    pub fn requests(&self) -> usize {
        self.inner.requests.load(Ordering::Relaxed)
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.inner.last.lock().ok().and_then(|g| g.clone())
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(|| async { "ok" }))
            .route(ISSUE_ROUTE, post(issue))
            .with_state(self.clone())
    }

    fn record(&self, request: RecordedRequest) {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.inner.last.lock() {
            *last = Some(request);
        }
    }
}

async fn issue(
    State(authority): State<MockAuthority>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    tracing::debug!(
        target: "certload::mock",
        authority = %uuid,
        bytes = body.len(),
        "issue request"
    );
    authority.record(RecordedRequest {
        authority_uuid: uuid,
        content_type: header_str(header::CONTENT_TYPE),
        accept: header_str(header::ACCEPT),
        body: body.to_vec(),
    });
    (
        authority.inner.status,
        [(header::CONTENT_TYPE, "application/json")],
        authority.inner.body.clone(),
    )
}

/// Serves the mock on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    authority: MockAuthority,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, authority.router())
        .with_graceful_shutdown(shutdown)
        .await
}

/// Binds an ephemeral local port and serves the mock in the background.
pub async fn spawn(authority: MockAuthority) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, authority.router()).await {
            tracing::error!(target: "certload::mock", error = %err, "mock authority stopped");
        }
    });
    Ok((addr, handle))
}
