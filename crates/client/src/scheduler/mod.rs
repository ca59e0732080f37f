//! Scan orchestration.
//!
//! The scheduler is the state machine deciding when scans are requested:
//! save-triggered deterministic scans with debouncing and hash-based skip
//! logic, idle and workspace-open scans, git-triggered scans, and the smart
//! AI rescan heuristics in [`rescan`]. Per-file epoch counters reject
//! out-of-order asynchronous results; all background triggers fail closed so
//! a flaky server never interrupts the editing flow.

pub mod git;
pub mod rescan;
pub mod timer;

use crate::config::{ClientConfig, IdleScanMode, OnSaveMode, RescanMode};
use crate::core::Finding;
use crate::server::{AnalysisServer, FindingsUpdated, ScanProgress, ServerCommand, ServerError};
use crate::tracker::{ChangeTracker, DocumentChange, DocumentSnapshot};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rescan::{AiScanRecord, RescanStats, RescanStatsSnapshot};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use timer::KeyedDebouncer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Live documents as the editor host sees them.
pub trait DocumentStore: Send + Sync {
    fn snapshot(&self, path: &Path) -> Option<DocumentSnapshot>;
}

/// Presentation-layer consumer of scan results.
pub trait FindingsSink: Send + Sync {
    /// Pull fresh findings; `epoch` is the ordering token the notification
    /// carried, if any.
    fn reload_findings(&self, epoch: Option<u64>);

    fn invalidate_details(&self);

    /// Current AI-origin findings for a file.
    fn ai_findings(&self, path: &Path) -> Vec<Finding>;
}

/// Workspace-scoped persisted state.
pub trait WorkspaceState: Send + Sync {
    fn last_full_scan(&self) -> Option<DateTime<Utc>>;
    fn set_last_full_scan(&self, at: DateTime<Utc>);
}

/// `WorkspaceState` backed by a small JSON file.
pub struct JsonFileWorkspaceState {
    path: PathBuf,
    cached: Mutex<Option<DateTime<Utc>>>,
}

impl JsonFileWorkspaceState {
    pub fn new(path: PathBuf) -> Self {
        let cached = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|value| {
                value
                    .get("last_full_scan")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
            });
        Self {
            path,
            cached: Mutex::new(cached),
        }
    }
}

impl WorkspaceState for JsonFileWorkspaceState {
    fn last_full_scan(&self) -> Option<DateTime<Utc>> {
        *self.cached.lock().expect("state lock poisoned")
    }

    fn set_last_full_scan(&self, at: DateTime<Utc>) {
        *self.cached.lock().expect("state lock poisoned") = Some(at);
        let value = serde_json::json!({ "last_full_scan": at.to_rfc3339() });
        if let Err(err) = std::fs::write(&self.path, value.to_string()) {
            warn!(%err, path = %self.path.display(), "failed to persist workspace state");
        }
    }
}

/// Admits strictly increasing result epochs; everything else is stale.
#[derive(Debug, Default)]
pub struct EpochGate {
    last_applied: Option<u64>,
}

impl EpochGate {
    pub fn admit(&mut self, epoch: u64) -> bool {
        match self.last_applied {
            Some(last) if epoch <= last => false,
            _ => {
                self.last_applied = Some(epoch);
                true
            }
        }
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }
}

#[derive(Debug, Clone)]
struct PendingScan {
    hash: String,
    epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TimerKey {
    Save(PathBuf),
    Idle,
    AiBatch,
}

#[derive(Default)]
struct SchedulerState {
    epochs: HashMap<PathBuf, u64>,
    pending: HashMap<PathBuf, PendingScan>,
    last_scanned_hash: HashMap<PathBuf, String>,
    last_ai_scan: HashMap<PathBuf, AiScanRecord>,
    ai_in_flight: HashSet<PathBuf>,
    ai_batch: HashSet<PathBuf>,
    epoch_gate: EpochGate,
}

struct SchedulerInner {
    config: ClientConfig,
    workspace_root: PathBuf,
    server: Arc<dyn AnalysisServer>,
    documents: Arc<dyn DocumentStore>,
    sink: Arc<dyn FindingsSink>,
    workspace_state: Arc<dyn WorkspaceState>,
    tracker: Mutex<ChangeTracker>,
    state: Mutex<SchedulerState>,
    timers: KeyedDebouncer<TimerKey>,
    stats: RescanStats,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct ScanScheduler {
    inner: Arc<SchedulerInner>,
}

impl ScanScheduler {
    pub fn new(
        config: ClientConfig,
        workspace_root: PathBuf,
        server: Arc<dyn AnalysisServer>,
        documents: Arc<dyn DocumentStore>,
        sink: Arc<dyn FindingsSink>,
        workspace_state: Arc<dyn WorkspaceState>,
    ) -> Self {
        let tracker = ChangeTracker::new(config.language_ids.iter().cloned());
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                workspace_root,
                server,
                documents,
                sink,
                workspace_state,
                tracker: Mutex::new(tracker),
                state: Mutex::new(SchedulerState::default()),
                timers: KeyedDebouncer::new(),
                stats: RescanStats::default(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Forwarded editor mutation events; also feeds the idle timer.
    pub fn on_document_changed(&self, change: &DocumentChange) {
        self.inner
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .on_document_changed(change);
        self.on_activity();
    }

    pub fn on_file_renamed(&self, old: &Path, new: &Path) {
        self.inner
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .handle_file_rename(old, new);
    }

    pub fn on_file_deleted(&self, path: &Path) {
        self.inner
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .handle_file_delete(path);
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        state.pending.remove(path);
        state.last_scanned_hash.remove(path);
        state.last_ai_scan.remove(path);
        state.ai_batch.remove(path);
    }

    /// Save-triggered entry point.
    pub async fn on_document_saved(&self, path: &Path) {
        let Some(snapshot) = self.inner.documents.snapshot(path) else {
            return;
        };
        if !self
            .inner
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .is_tracked_language(&snapshot.language_id)
        {
            return;
        }

        let hash = self.content_hash(&snapshot);

        match self.inner.config.save.mode {
            OnSaveMode::Off => {}
            OnSaveMode::Ai => {
                self.trigger_ai_file_scan(path).await;
            }
            OnSaveMode::Smart
                if self.inner.config.rescan.mode != RescanMode::Off
                    && !self.inner.sink.ai_findings(path).is_empty() =>
            {
                // Delegate entirely to the AI rescan heuristics; no
                // deterministic scan for this save.
                self.smart_rescan(&snapshot, &hash).await;
            }
            OnSaveMode::Smart | OnSaveMode::Deterministic => {
                self.schedule_deterministic_scan(path, hash);
            }
        }
    }

    fn schedule_deterministic_scan(&self, path: &Path, hash: String) {
        let mut state = self.inner.state.lock().expect("state lock poisoned");

        if state.last_scanned_hash.get(path) == Some(&hash) {
            debug!(path = %path.display(), "content unchanged since last scan; skipping");
            return;
        }

        // A save landing inside the debounce window reuses the pending
        // epoch; only the hash moves forward.
        let epoch = match state.pending.get(path) {
            Some(pending) => pending.epoch,
            None => {
                let next = state.epochs.get(path).copied().unwrap_or(0) + 1;
                state.epochs.insert(path.to_path_buf(), next);
                next
            }
        };
        state.pending.insert(
            path.to_path_buf(),
            PendingScan {
                hash: hash.clone(),
                epoch,
            },
        );
        drop(state);

        debug!(path = %path.display(), epoch, "scan scheduled");
        let scheduler = self.clone();
        let owned = path.to_path_buf();
        self.inner.timers.schedule(
            TimerKey::Save(owned.clone()),
            Duration::from_millis(self.inner.config.save.debounce_ms),
            async move {
                scheduler.on_save_debounce_fired(&owned).await;
            },
        );
    }

    async fn on_save_debounce_fired(&self, path: &Path) {
        let pending_hash = {
            let state = self.inner.state.lock().expect("state lock poisoned");
            match state.pending.get(path) {
                Some(pending) => pending.hash.clone(),
                None => return,
            }
        };

        let live_hash = self
            .inner
            .documents
            .snapshot(path)
            .map(|snapshot| self.content_hash(&snapshot));

        if live_hash.as_deref() != Some(pending_hash.as_str()) {
            debug!(path = %path.display(), "document changed during debounce window; abandoning scan");
            self.inner
                .state
                .lock()
                .expect("state lock poisoned")
                .pending
                .remove(path);
            return;
        }

        let command = if self.inner.config.save.workspace_scope {
            ServerCommand::ScanWorkspace
        } else {
            ServerCommand::ScanFile {
                uri: path.display().to_string(),
            }
        };

        if let Err(err) = self.send_command(command).await {
            warn!(path = %path.display(), %err, "scan request failed");
            self.inner
                .state
                .lock()
                .expect("state lock poisoned")
                .pending
                .remove(path);
        }
    }

    /// Diagnostics are used only as a scan-completion freshness signal:
    /// matching hash commits the pending entry, anything else is stale.
    pub fn on_diagnostics_published(&self, path: &Path) {
        let pending_hash = {
            let state = self.inner.state.lock().expect("state lock poisoned");
            match state.pending.get(path) {
                Some(pending) => pending.hash.clone(),
                None => return,
            }
        };

        let live_hash = self
            .inner
            .documents
            .snapshot(path)
            .map(|snapshot| self.content_hash(&snapshot));

        if live_hash.as_deref() == Some(pending_hash.as_str()) {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            state
                .last_scanned_hash
                .insert(path.to_path_buf(), pending_hash);
            state.pending.remove(path);
            drop(state);

            // The scan consumed the tracked changes for this file.
            self.inner
                .tracker
                .lock()
                .expect("tracker lock poisoned")
                .clear_file(path);
        } else {
            debug!(path = %path.display(), "diagnostics for a stale document version; ignoring");
        }
    }

    /// Authoritative results-ready notification.
    pub async fn on_findings_updated(&self, notification: &FindingsUpdated) {
        self.inner.sink.invalidate_details();

        match notification.scan_epoch {
            Some(epoch) => {
                let admitted = self
                    .inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .epoch_gate
                    .admit(epoch);
                if admitted {
                    self.inner.sink.reload_findings(Some(epoch));
                } else {
                    debug!(epoch, "stale findings notification discarded");
                }
            }
            None => {
                warn!("findings notification without scan epoch; falling back to unconditional reload");
                self.inner.sink.reload_findings(None);
            }
        }

        if let Some(files) = &notification.files {
            self.update_ai_scan_state(files, notification.scan_type);
        }
    }

    /// Progress notifications are advisory only.
    pub fn on_scan_progress(&self, progress: &ScanProgress) {
        debug!(
            message = %progress.message,
            percentage = ?progress.percentage,
            stage = ?progress.stage,
            "scan progress"
        );
    }

    /// Any selection or text activity resets the idle timer.
    pub fn on_activity(&self) {
        if self.inner.config.idle.mode == IdleScanMode::Off {
            return;
        }

        let scheduler = self.clone();
        self.inner.timers.schedule(
            TimerKey::Idle,
            Duration::from_secs(self.inner.config.idle.delay_secs),
            async move {
                scheduler.fire_idle_scan().await;
            },
        );
    }

    async fn fire_idle_scan(&self) {
        let command = match self.inner.config.idle.mode {
            IdleScanMode::Off => return,
            IdleScanMode::Deterministic => ServerCommand::ScanWorkspace,
            IdleScanMode::Ai => ServerCommand::LlmScanWorkspace,
        };
        debug!("idle timer fired; requesting workspace scan");
        if let Err(err) = self.send_command(command).await {
            warn!(%err, "idle scan request failed");
        }
    }

    /// Activation hook: wait for the server, then decide whether the
    /// recorded full scan is stale enough to redo.
    pub async fn on_workspace_open(&self) {
        let startup = &self.inner.config.startup;
        tokio::time::sleep(Duration::from_millis(startup.settle_ms)).await;

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(startup.availability_timeout_ms);
        while !self.inner.server.is_connected() {
            if tokio::time::Instant::now() >= deadline {
                debug!("analysis server never became available; skipping startup scan");
                return;
            }
            tokio::time::sleep(Duration::from_millis(startup.availability_poll_ms)).await;
        }

        match self.inner.workspace_state.last_full_scan() {
            None => {
                debug!("no recorded workspace scan; triggering initial scan");
                if self.send_command(ServerCommand::ScanWorkspace).await.is_ok() {
                    self.inner.workspace_state.set_last_full_scan(Utc::now());
                }
            }
            Some(at) => {
                let elapsed_hours = (Utc::now() - at).num_minutes() as f64 / 60.0;
                if elapsed_hours > startup.staleness_hours {
                    debug!(elapsed_hours, "recorded workspace scan is stale; rescanning");
                    if self.send_command(ServerCommand::ScanWorkspace).await.is_ok() {
                        self.inner.workspace_state.set_last_full_scan(Utc::now());
                    }
                } else {
                    debug!(elapsed_hours, "recorded workspace scan is fresh");
                }
            }
        }
    }

    /// HEAD moved: rescan the workspace, or just what the move touched.
    pub async fn on_git_head_changed(&self) {
        if !self.inner.config.git.enabled {
            return;
        }

        if self.inner.config.git.changed_files_only {
            let files = git::changed_files(&self.inner.workspace_root).await;
            if files.is_empty() {
                debug!("no tracked files changed by HEAD move");
                return;
            }
            for file in files {
                let command = ServerCommand::ScanFile {
                    uri: file.display().to_string(),
                };
                if let Err(err) = self.send_command(command).await {
                    warn!(file = %file.display(), %err, "git-triggered scan failed");
                }
            }
        } else if let Err(err) = self.send_command(ServerCommand::ScanWorkspace).await {
            warn!(%err, "git-triggered workspace scan failed");
        }
    }

    /// Manual workspace scan; unlike background triggers this propagates
    /// failures for user-facing reporting.
    pub async fn scan_workspace(&self) -> Result<()> {
        self.send_command(ServerCommand::ScanWorkspace).await?;
        Ok(())
    }

    pub async fn scan_file(&self, path: &Path) -> Result<()> {
        self.send_command(ServerCommand::ScanFile {
            uri: path.display().to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn llm_scan_workspace(&self) -> Result<()> {
        self.send_command(ServerCommand::LlmScanWorkspace).await?;
        Ok(())
    }

    pub async fn llm_scan_file(&self, path: &Path) -> Result<()> {
        self.trigger_ai_file_scan(path).await;
        Ok(())
    }

    pub fn stats(&self) -> RescanStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn last_applied_epoch(&self) -> Option<u64> {
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .epoch_gate
            .last_applied()
    }

    /// Cancel outstanding work and pending timers. Event listeners are
    /// detached by the host.
    pub fn dispose(&self) {
        self.inner.shutdown.cancel();
        self.inner.timers.cancel_all();
    }

    pub(crate) fn content_hash(&self, snapshot: &DocumentSnapshot) -> String {
        self.inner
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .content_hash(snapshot)
    }

    pub(crate) async fn send_command(
        &self,
        command: ServerCommand,
    ) -> Result<(), ServerError> {
        if !self.inner.server.is_connected() {
            return Err(ServerError::ConnectionUnavailable);
        }

        let name = command.name();
        let outcome = self.inner.server.execute_command(command).await?;
        if !outcome.is_success() {
            return Err(ServerError::Rejected(name.to_string()));
        }
        Ok(())
    }
}
