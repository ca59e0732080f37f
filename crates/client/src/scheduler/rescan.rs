//! Smart AI rescan heuristics.
//!
//! LLM analysis is expensive, so a save only re-triggers it when the edit
//! plausibly invalidated an existing AI finding: the tracked modified lines
//! must intersect a finding's context window, the finding must clear the
//! configured severity floor, and unchanged content (hash and version) is
//! never re-analyzed. Requests are deduplicated per file while in flight.

use super::{ScanScheduler, TimerKey};
use crate::config::RescanMode;
use crate::server::{ScanType, ServerCommand};
use crate::tracker::DocumentSnapshot;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Bookkeeping from the last completed AI scan of a file.
#[derive(Debug, Clone)]
pub struct AiScanRecord {
    pub hash: String,
    pub version: i64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RescanStats {
    triggered: AtomicU64,
    avoided: AtomicU64,
    deduplicated: AtomicU64,
}

impl RescanStats {
    pub(crate) fn record_triggered(&self) {
        self.triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_avoided(&self) {
        self.avoided.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RescanStatsSnapshot {
        RescanStatsSnapshot {
            triggered: self.triggered.load(Ordering::Relaxed),
            avoided: self.avoided.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescanStatsSnapshot {
    pub triggered: u64,
    pub avoided: u64,
    pub deduplicated: u64,
}

impl ScanScheduler {
    /// Decide whether a save on a file with AI findings warrants re-running
    /// the LLM analysis.
    pub(crate) async fn smart_rescan(&self, snapshot: &DocumentSnapshot, hash: &str) {
        let rescan = &self.inner.config.rescan;
        let path = snapshot.path.as_path();

        if rescan.mode == RescanMode::Off {
            self.inner.stats.record_avoided();
            return;
        }

        let findings = self.inner.sink.ai_findings(path);
        if findings.is_empty() {
            return;
        }

        {
            let state = self.inner.state.lock().expect("state lock poisoned");
            if let Some(record) = state.last_ai_scan.get(path) {
                if record.hash == hash && snapshot.version <= record.version {
                    debug!(path = %path.display(), "content and version unchanged since last AI scan");
                    return;
                }
                // Hash matching while the version advanced is treated
                // conservatively: keep checking.
            }
        }

        let modified = {
            let tracker = self.inner.tracker.lock().expect("tracker lock poisoned");
            tracker.modified_lines(path).cloned().unwrap_or_default()
        };
        if modified.is_empty() {
            debug!(path = %path.display(), "no tracked line changes since last scan");
            return;
        }

        let context = rescan.context_lines;
        let affected: Vec<_> = findings
            .iter()
            .filter(|finding| {
                let (start, end) = finding.line_range();
                let lo = start.saturating_sub(context).max(1);
                let hi = end + context;
                modified.range(lo..=hi).next().is_some()
            })
            .collect();

        if affected.is_empty() {
            debug!(path = %path.display(), "edit unrelated to any AI finding; rescan avoided");
            self.inner.stats.record_avoided();
            return;
        }

        let significant = affected
            .iter()
            .any(|finding| finding.severity >= rescan.min_severity);
        if !significant {
            debug!(path = %path.display(), "affected findings below severity floor");
            return;
        }

        match rescan.mode {
            RescanMode::Off => {}
            RescanMode::File => {
                self.trigger_ai_file_scan(path).await;
            }
            RescanMode::Batch => {
                {
                    let mut state = self.inner.state.lock().expect("state lock poisoned");
                    state.ai_batch.insert(path.to_path_buf());
                }
                let scheduler = self.clone();
                self.inner.timers.schedule(
                    TimerKey::AiBatch,
                    Duration::from_millis(rescan.batch_delay_ms),
                    async move {
                        scheduler.fire_ai_batch().await;
                    },
                );
            }
        }
    }

    /// Dispatch an AI file scan, deduplicating against in-flight requests.
    pub(crate) async fn trigger_ai_file_scan(&self, path: &Path) {
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            if !state.ai_in_flight.insert(path.to_path_buf()) {
                debug!(path = %path.display(), "AI scan already in flight; deduplicated");
                self.inner.stats.record_deduplicated();
                return;
            }
        }

        let token = self.inner.shutdown.child_token();
        let command = ServerCommand::LlmScanFile {
            uri: path.display().to_string(),
        };
        let result = tokio::select! {
            _ = token.cancelled() => None,
            res = self.send_command(command) => Some(res),
        };

        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            state.ai_in_flight.remove(path);
        }

        match result {
            None => debug!(path = %path.display(), "AI scan cancelled"),
            Some(Ok(())) => {
                self.inner.stats.record_triggered();
                self.record_ai_scan_completed(path);
            }
            Some(Err(err)) => {
                warn!(path = %path.display(), %err, "AI scan request failed");
            }
        }
    }

    async fn fire_ai_batch(&self) {
        let files: Vec<PathBuf> = {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            state.ai_batch.drain().collect()
        };
        if files.is_empty() {
            return;
        }

        if files.len() >= self.inner.config.rescan.batch_threshold {
            debug!(
                files = files.len(),
                "batch threshold reached; escalating to AI workspace scan"
            );
            match self.send_command(ServerCommand::LlmScanWorkspace).await {
                Ok(()) => {
                    self.inner.stats.record_triggered();
                    let mut state = self.inner.state.lock().expect("state lock poisoned");
                    state.last_ai_scan.clear();
                }
                Err(err) => warn!(%err, "AI workspace scan failed"),
            }
        } else {
            for file in &files {
                self.trigger_ai_file_scan(file).await;
            }
        }
    }

    fn record_ai_scan_completed(&self, path: &Path) {
        let Some(snapshot) = self.inner.documents.snapshot(path) else {
            return;
        };
        let hash = self.content_hash(&snapshot);

        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            state.last_ai_scan.insert(
                path.to_path_buf(),
                AiScanRecord {
                    hash,
                    version: snapshot.version,
                    at: Utc::now(),
                },
            );
        }

        self.inner
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .clear_file(path);
    }

    /// Refresh per-file bookkeeping straight from the live documents when a
    /// findings notification names the scanned files. Covers scans the
    /// scheduler did not itself initiate.
    pub(crate) fn update_ai_scan_state(&self, files: &[String], scan_type: Option<ScanType>) {
        let scan_type = scan_type.unwrap_or(ScanType::Deterministic);

        for file in files {
            let path = PathBuf::from(file);
            let Some(snapshot) = self.inner.documents.snapshot(&path) else {
                continue;
            };
            let hash = self.content_hash(&snapshot);

            {
                let mut state = self.inner.state.lock().expect("state lock poisoned");
                if matches!(scan_type, ScanType::Ai | ScanType::Hybrid) {
                    state.last_ai_scan.insert(
                        path.clone(),
                        AiScanRecord {
                            hash: hash.clone(),
                            version: snapshot.version,
                            at: Utc::now(),
                        },
                    );
                }
                if matches!(scan_type, ScanType::Deterministic | ScanType::Hybrid) {
                    state.last_scanned_hash.insert(path.clone(), hash.clone());
                }
            }

            self.inner
                .tracker
                .lock()
                .expect("tracker lock poisoned")
                .clear_file(&path);
        }
    }
}
