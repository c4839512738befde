use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

/// Tracing target for non-200 response dumps.
pub const DIAGNOSTIC_TARGET: &str = "certload::diagnostic";

#[derive(thiserror::Error, Debug)]
pub enum IterationFailure {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to issue certificate: {status} - {body}")]
    Status { status: u16, body: String },
    #[error("invalid JSON in issue response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl IterationFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
        }
    }

    /// Whether the status check passed: `None` when no response arrived.
    pub fn status_ok(&self) -> Option<bool> {
        match self {
            Self::Transport(_) => None,
            Self::Status { .. } => Some(false),
            Self::Decode(_) => Some(true),
        }
    }
}

/// Target URL for an issue request. Plain concatenation: neither part is
/// escaped or validated.
pub fn issue_url(base_url: &str, authority_uuid: &str) -> String {
    format!("{base_url}/v2/authorityProvider/authorities/{authority_uuid}/certificates/issue")
}

/// Shared client for a run. `timeout` applies to every request it sends.
pub fn client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

/// Full view of a response, used for the diagnostic dump.
#[derive(Debug, Serialize)]
pub struct ResponseSnapshot {
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl ResponseSnapshot {
    fn capture(url: &str, status: StatusCode, headers: &header::HeaderMap, body: String) -> Self {
        let mut collected: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            match collected.get_mut(name.as_str()) {
                Some(existing) => {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                None => {
                    collected.insert(name.as_str().to_string(), value.into_owned());
                }
            }
        }
        Self { url: url.to_string(), status: status.as_u16(), headers: collected, body }
    }
}

impl fmt::Display for ResponseSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{} {}", self.status, self.body),
        }
    }
}

/// Sends one issue request and checks for a 200.
///
/// On any other status the response is dumped to [`DIAGNOSTIC_TARGET`] when
/// `log` is set, and the iteration fails with the status and body. A 200
/// yields the parsed JSON body.
pub async fn issue_certificate(
    client: &Client,
    base_url: &str,
    authority_uuid: &str,
    payload: Bytes,
    log: bool,
) -> Result<Value, IterationFailure> {
    let url = issue_url(base_url, authority_uuid);
    let res = client
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json")
        .body(payload)
        .send()
        .await?;

    let status = res.status();
    if status != StatusCode::OK {
        let headers = res.headers().clone();
        // A failed body read still reports as a status failure.
        let body = match res.text().await {
            Ok(body) => body,
            Err(err) => format!("<body unavailable: {err}>"),
        };
        let snapshot = ResponseSnapshot::capture(&url, status, &headers, body);
        if log {
            tracing::warn!(
                target: DIAGNOSTIC_TARGET,
                response = %snapshot,
                "issue request rejected"
            );
        }
        return Err(IterationFailure::Status {
            status: snapshot.status,
            body: snapshot.body,
        });
    }

    let body = res.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
