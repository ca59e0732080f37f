//! In-memory analysis server for tests.

use super::{AnalysisServer, CommandOutcome, ServerCommand, ServerError};
use crate::core::{Confidence, Finding, Severity};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct MockAnalysisServer {
    commands: Mutex<Vec<ServerCommand>>,
    findings: Mutex<Vec<Finding>>,
    connected: AtomicBool,
    should_fail: AtomicBool,
    latency_ms: AtomicU64,
    details_supported: bool,
    details_calls: AtomicUsize,
}

impl MockAnalysisServer {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            findings: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            should_fail: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            details_supported: true,
            details_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency_ms(self, latency_ms: u64) -> Self {
        self.latency_ms.store(latency_ms, Ordering::SeqCst);
        self
    }

    pub fn disconnected() -> Self {
        let server = Self::new();
        server.connected.store(false, Ordering::SeqCst);
        server
    }

    pub fn without_details_support(mut self) -> Self {
        self.details_supported = false;
        self
    }

    pub fn with_findings(self, findings: Vec<Finding>) -> Self {
        *self.findings.lock().unwrap() = findings;
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<ServerCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn command_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    pub fn details_calls(&self) -> usize {
        self.details_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockAnalysisServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisServer for MockAnalysisServer {
    async fn execute_command(&self, command: ServerCommand) -> Result<CommandOutcome, ServerError> {
        if !self.is_connected() {
            return Err(ServerError::ConnectionUnavailable);
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ServerError::RequestFailed(
                "mock server configured to fail".to_string(),
            ));
        }

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.commands.lock().unwrap().push(command);
        Ok(CommandOutcome::ok())
    }

    async fn get_findings(
        &self,
        scope: Option<String>,
        min_severity: Option<Severity>,
        min_confidence: Option<Confidence>,
    ) -> Result<Vec<Finding>, ServerError> {
        let findings = self.findings.lock().unwrap();
        Ok(findings
            .iter()
            .filter(|f| scope.as_deref().is_none_or(|s| f.location.file == s))
            .filter(|f| min_severity.is_none_or(|s| f.severity >= s))
            .filter(|f| min_confidence.is_none_or(|c| f.confidence >= c))
            .cloned()
            .collect())
    }

    async fn get_finding_details(
        &self,
        finding_id: &str,
    ) -> Result<Option<serde_json::Value>, ServerError> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        if !self.details_supported {
            return Err(ServerError::MethodNotSupported(
                "tameshi/findingDetails".to_string(),
            ));
        }
        Ok(Some(serde_json::json!({ "id": finding_id })))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
