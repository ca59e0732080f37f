//! Interface to the external analysis server.
//!
//! The server is a black box reached through command requests and
//! notifications; everything here is the client-side contract. Scan commands
//! are fire-and-forget-with-ack: any returned object is treated as opaque
//! success unless it explicitly carries `success: false`.

pub mod mock;

use crate::core::{Confidence, Severity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("analysis server connection unavailable")]
    ConnectionUnavailable,

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("method not supported: {0}")]
    MethodNotSupported(String),

    #[error("request rejected by server: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    ScanWorkspace,
    ScanFile { uri: String },
    LlmScanFile { uri: String },
    LlmScanWorkspace,
    ExportReport { request: String },
}

impl ServerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScanWorkspace => "scanWorkspace",
            Self::ScanFile { .. } => "scanFile",
            Self::LlmScanFile { .. } => "llmScanFile",
            Self::LlmScanWorkspace => "llmScanWorkspace",
            Self::ExportReport { .. } => "exportReport",
        }
    }
}

/// Opaque per-command result object.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub payload: Option<serde_json::Value>,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
        }
    }

    /// Success unless the payload explicitly says otherwise.
    pub fn is_success(&self) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.get("success"))
            .and_then(|s| s.as_bool())
            != Some(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Deterministic,
    Ai,
    Hybrid,
}

/// Authoritative "results are ready" signal.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FindingsUpdated {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub files: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub versions: Option<HashMap<String, i64>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scan_epoch: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scan_type: Option<ScanType>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub count: Option<usize>,
}

/// Advisory progress notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub percentage: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stage: Option<String>,
}

#[async_trait]
pub trait AnalysisServer: Send + Sync {
    async fn execute_command(&self, command: ServerCommand) -> Result<CommandOutcome, ServerError>;

    /// Full current finding set for a scope; consumed by the presentation
    /// layer rather than the scheduler.
    async fn get_findings(
        &self,
        scope: Option<String>,
        min_severity: Option<Severity>,
        min_confidence: Option<Confidence>,
    ) -> Result<Vec<crate::core::Finding>, ServerError>;

    /// Per-finding enrichment; servers may not support this.
    async fn get_finding_details(
        &self,
        finding_id: &str,
    ) -> Result<Option<serde_json::Value>, ServerError>;

    fn is_connected(&self) -> bool;
}

/// Detail-fetch wrapper that remembers a "method not supported" response and
/// stops calling for the rest of the session.
pub struct FindingDetailsClient {
    supported: AtomicBool,
}

impl FindingDetailsClient {
    pub fn new() -> Self {
        Self {
            supported: AtomicBool::new(true),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported.load(Ordering::Relaxed)
    }

    pub async fn fetch(
        &self,
        server: &dyn AnalysisServer,
        finding_id: &str,
    ) -> Option<serde_json::Value> {
        if !self.is_supported() {
            return None;
        }

        match server.get_finding_details(finding_id).await {
            Ok(details) => details,
            Err(ServerError::MethodNotSupported(method)) => {
                debug!(%method, "finding details not supported; disabling for session");
                self.supported.store(false, Ordering::Relaxed);
                None
            }
            Err(err) => {
                debug!(%err, "finding details fetch failed");
                None
            }
        }
    }
}

impl Default for FindingDetailsClient {
    fn default() -> Self {
        Self::new()
    }
}
