use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use certload_common::config::{Variables, PAYLOAD_PATH_VAR};
use certload_common::{CertloadError, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::issuer::{issue_certificate, IterationFailure};

/// Request body read once at startup and shared read-only by every iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|source| CertloadError::PayloadRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self(Bytes::from(data)))
    }

    pub fn bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self {
        Self(Bytes::from_static(data.as_bytes()))
    }
}

/// Output of the setup hook. Nothing consumes `run_id` yet beyond logs and
/// the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupData {
    pub run_id: String,
}

/// Runs once before any iteration.
pub fn setup() -> SetupData {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    SetupData { run_id: millis.to_string() }
}

/// The issue scenario: resolved variables, the loaded payload and the shared
/// client, all fixed for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct IssueScenario {
    client: Client,
    variables: Variables,
    payload: Payload,
}

impl IssueScenario {
    pub fn new(client: Client, variables: Variables, payload: Payload) -> Self {
        Self { client, variables, payload }
    }

    /// Loads the payload named by the variables. Fails before any iteration
    /// runs when the path is unset or unreadable.
    pub fn from_variables(client: Client, variables: Variables) -> Result<Self> {
        let path = variables
            .pyadcs
            .payload_path
            .clone()
            .ok_or(CertloadError::MissingVariable(PAYLOAD_PATH_VAR))?;
        let payload = Payload::load(&path)?;
        tracing::info!(
            target: "certload::scenario",
            path = %path.display(),
            bytes = payload.len(),
            "payload loaded"
        );
        Ok(Self::new(client, variables, payload))
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// One iteration. An unset authority UUID is sent as an empty path
    /// segment and left for the endpoint to reject.
    pub async fn iteration(
        &self,
        _data: &SetupData,
    ) -> std::result::Result<Value, IterationFailure> {
        let pyadcs = &self.variables.pyadcs;
        issue_certificate(
            &self.client,
            &pyadcs.base_url,
            pyadcs.authority_uuid.as_deref().unwrap_or_default(),
            self.payload.bytes(),
            pyadcs.logging.enabled,
        )
        .await
    }
}
