//! End-to-end scheduler behavior against an in-memory editor host and a
//! mock analysis server.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tameshi_client::scheduler::{DocumentStore, FindingsSink, WorkspaceState};
use tameshi_client::server::mock::MockAnalysisServer;
use tameshi_client::{
    ClientConfig, Confidence, DocumentChange, DocumentEdit, DocumentSnapshot, Finding,
    FindingsUpdated, IdleScanMode, Location, OnSaveMode, RescanMode, ScanScheduler, ServerCommand,
    Severity,
};

struct InMemoryDocuments {
    docs: Mutex<HashMap<PathBuf, DocumentSnapshot>>,
}

impl InMemoryDocuments {
    fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, path: &str, version: i64, text: &str) {
        self.docs.lock().unwrap().insert(
            PathBuf::from(path),
            DocumentSnapshot {
                path: PathBuf::from(path),
                language_id: "solidity".to_string(),
                version,
                text: text.to_string(),
            },
        );
    }
}

impl DocumentStore for InMemoryDocuments {
    fn snapshot(&self, path: &Path) -> Option<DocumentSnapshot> {
        self.docs.lock().unwrap().get(path).cloned()
    }
}

#[derive(Default)]
struct RecordingSink {
    reloads: Mutex<Vec<Option<u64>>>,
    invalidations: AtomicUsize,
    ai_findings: Mutex<HashMap<PathBuf, Vec<Finding>>>,
}

impl RecordingSink {
    fn set_ai_findings(&self, path: &str, findings: Vec<Finding>) {
        self.ai_findings
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), findings);
    }

    fn reloads(&self) -> Vec<Option<u64>> {
        self.reloads.lock().unwrap().clone()
    }
}

impl FindingsSink for RecordingSink {
    fn reload_findings(&self, epoch: Option<u64>) {
        self.reloads.lock().unwrap().push(epoch);
    }

    fn invalidate_details(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn ai_findings(&self, path: &Path) -> Vec<Finding> {
        self.ai_findings
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct MemoryWorkspaceState {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl WorkspaceState for MemoryWorkspaceState {
    fn last_full_scan(&self) -> Option<DateTime<Utc>> {
        *self.last.lock().unwrap()
    }

    fn set_last_full_scan(&self, at: DateTime<Utc>) {
        *self.last.lock().unwrap() = Some(at);
    }
}

struct Harness {
    scheduler: ScanScheduler,
    server: Arc<MockAnalysisServer>,
    documents: Arc<InMemoryDocuments>,
    sink: Arc<RecordingSink>,
    workspace_state: Arc<MemoryWorkspaceState>,
}

fn harness(config: ClientConfig) -> Harness {
    harness_with_server(config, MockAnalysisServer::new())
}

fn harness_with_server(config: ClientConfig, server: MockAnalysisServer) -> Harness {
    let server = Arc::new(server);
    let documents = Arc::new(InMemoryDocuments::new());
    let sink = Arc::new(RecordingSink::default());
    let workspace_state = Arc::new(MemoryWorkspaceState::default());
    let server_dyn: Arc<dyn tameshi_client::AnalysisServer> = server.clone();
    let documents_dyn: Arc<dyn DocumentStore> = documents.clone();
    let sink_dyn: Arc<dyn FindingsSink> = sink.clone();
    let state_dyn: Arc<dyn WorkspaceState> = workspace_state.clone();
    let scheduler = ScanScheduler::new(
        config,
        PathBuf::from("/workspace"),
        server_dyn,
        documents_dyn,
        sink_dyn,
        state_dyn,
    );
    Harness {
        scheduler,
        server,
        documents,
        sink,
        workspace_state,
    }
}

fn fast_config(mode: OnSaveMode) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.save.mode = mode;
    config.save.debounce_ms = 25;
    config.rescan.batch_delay_ms = 30;
    config.startup.settle_ms = 1;
    config.startup.availability_timeout_ms = 500;
    config.startup.availability_poll_ms = 10;
    config
}

fn ai_finding(id: &str, file: &str, line: usize, severity: Severity) -> Finding {
    Finding::new(
        id.to_string(),
        "llm_scanner".to_string(),
        severity,
        Confidence::High,
        format!("AI finding {id}"),
        "description".to_string(),
        Location::new(file.to_string(), line, 1),
    )
}

fn edit(line: usize) -> DocumentChange {
    DocumentChange {
        path: PathBuf::from("vault.sol"),
        language_id: "solidity".to_string(),
        version: 2,
        edits: vec![DocumentEdit {
            start_line: line,
            end_line: line,
            lines_added: 0,
            lines_removed: 0,
        }],
    }
}

#[tokio::test]
async fn test_debounce_coalesces_rapid_saves() {
    let h = harness(fast_config(OnSaveMode::Deterministic));
    let path = Path::new("vault.sol");

    for (version, text) in [(1, "contract A {}"), (2, "contract B {}"), (3, "contract C {}")] {
        h.documents.set("vault.sol", version, text);
        h.scheduler.on_document_saved(path).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::sleep(Duration::from_millis(150)).await;

    let commands = h.server.commands();
    assert_eq!(commands.len(), 1, "N saves in the window must send one request");
    assert_eq!(
        commands[0],
        ServerCommand::ScanFile {
            uri: "vault.sol".to_string()
        }
    );
}

#[tokio::test]
async fn test_hash_skip_after_confirmed_scan() {
    let h = harness(fast_config(OnSaveMode::Deterministic));
    let path = Path::new("vault.sol");
    h.documents.set("vault.sol", 1, "contract A {}");

    h.scheduler.on_document_saved(path).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.server.command_count(), 1);

    // Diagnostics for the scanned version commit the hash as last-scanned.
    h.scheduler.on_diagnostics_published(path);

    // Saving unchanged content never produces another request.
    for _ in 0..3 {
        h.scheduler.on_document_saved(path).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.server.command_count(), 1);
}

#[tokio::test]
async fn test_edit_during_debounce_window_abandons_scan() {
    let h = harness(fast_config(OnSaveMode::Deterministic));
    let path = Path::new("vault.sol");

    h.documents.set("vault.sol", 1, "contract A {}");
    h.scheduler.on_document_saved(path).await;

    // The document moves on before the timer fires, without another save.
    h.documents.set("vault.sol", 2, "contract B {}");

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(
        h.server.command_count(),
        0,
        "hash mismatch at debounce fire must abandon the scan"
    );
}

#[tokio::test]
async fn test_resave_during_window_uses_last_hash() {
    let h = harness(fast_config(OnSaveMode::Deterministic));
    let path = Path::new("vault.sol");

    h.documents.set("vault.sol", 1, "contract A {}");
    h.scheduler.on_document_saved(path).await;
    h.documents.set("vault.sol", 2, "contract B {}");
    h.scheduler.on_document_saved(path).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(h.server.command_count(), 1);

    // The request carries the state of the last save: diagnostics for the
    // current content commit cleanly and a re-save of it is skipped.
    h.scheduler.on_diagnostics_published(path);
    h.scheduler.on_document_saved(path).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.server.command_count(), 1);
}

#[tokio::test]
async fn test_stale_diagnostics_are_ignored() {
    let h = harness(fast_config(OnSaveMode::Deterministic));
    let path = Path::new("vault.sol");

    h.documents.set("vault.sol", 1, "contract A {}");
    h.scheduler.on_document_saved(path).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.server.command_count(), 1);

    // Document changed after the request went out; these diagnostics
    // describe a stale version and must not commit anything.
    h.documents.set("vault.sol", 2, "contract B {}");
    h.scheduler.on_diagnostics_published(path);

    // The new content was never scanned, so saving it schedules again.
    h.scheduler.on_document_saved(path).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.server.command_count(), 2);
}

#[tokio::test]
async fn test_epoch_monotonicity_gates_reloads() {
    let h = harness(fast_config(OnSaveMode::Deterministic));

    for epoch in [1u64, 3, 2, 3, 4] {
        h.scheduler
            .on_findings_updated(&FindingsUpdated {
                scan_epoch: Some(epoch),
                ..Default::default()
            })
            .await;
    }

    assert_eq!(h.sink.reloads(), vec![Some(1), Some(3), Some(4)]);
    assert_eq!(h.scheduler.last_applied_epoch(), Some(4));
    assert_eq!(h.sink.invalidations.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_missing_epoch_falls_back_to_unconditional_reload() {
    let h = harness(fast_config(OnSaveMode::Deterministic));

    h.scheduler
        .on_findings_updated(&FindingsUpdated::default())
        .await;

    assert_eq!(h.sink.reloads(), vec![None]);
}

#[tokio::test]
async fn test_smart_rescan_avoided_for_unrelated_edit() {
    let mut config = fast_config(OnSaveMode::Smart);
    config.rescan.mode = RescanMode::File;
    let h = harness(config);
    let path = Path::new("vault.sol");

    h.documents.set("vault.sol", 2, "contract A { /* edited */ }");
    h.sink
        .set_ai_findings("vault.sol", vec![ai_finding("ai-1", "vault.sol", 50, Severity::High)]);

    // Edit at line 5 is far outside [48, 52].
    h.scheduler.on_document_changed(&edit(5));
    h.scheduler.on_document_saved(path).await;

    tokio::time::sleep(Duration::from_millis(80)).await;
    let stats = h.scheduler.stats();
    assert_eq!(stats.avoided, 1);
    assert_eq!(stats.triggered, 0);
    assert_eq!(h.server.command_count(), 0);
}

#[tokio::test]
async fn test_smart_rescan_triggers_for_nearby_edit() {
    let mut config = fast_config(OnSaveMode::Smart);
    config.rescan.mode = RescanMode::File;
    let h = harness(config);
    let path = Path::new("vault.sol");

    h.documents.set("vault.sol", 2, "contract A { /* edited */ }");
    h.sink
        .set_ai_findings("vault.sol", vec![ai_finding("ai-1", "vault.sol", 50, Severity::High)]);

    // Line 48 sits inside the two-line context window of line 50.
    h.scheduler.on_document_changed(&edit(48));
    h.scheduler.on_document_saved(path).await;

    let commands = h.server.commands();
    assert_eq!(
        commands,
        vec![ServerCommand::LlmScanFile {
            uri: "vault.sol".to_string()
        }]
    );
    assert_eq!(h.scheduler.stats().triggered, 1);

    // The completed scan consumed the tracked changes: the same save is now
    // skipped without another request.
    h.scheduler.on_document_saved(path).await;
    assert_eq!(h.server.command_count(), 1);
}

#[tokio::test]
async fn test_smart_rescan_respects_severity_floor() {
    let mut config = fast_config(OnSaveMode::Smart);
    config.rescan.mode = RescanMode::File;
    config.rescan.min_severity = Severity::High;
    let h = harness(config);
    let path = Path::new("vault.sol");

    h.documents.set("vault.sol", 2, "contract A {}");
    h.sink
        .set_ai_findings("vault.sol", vec![ai_finding("ai-1", "vault.sol", 50, Severity::Low)]);

    h.scheduler.on_document_changed(&edit(50));
    h.scheduler.on_document_saved(path).await;

    assert_eq!(h.server.command_count(), 0);
    assert_eq!(h.scheduler.stats().triggered, 0);
}

#[tokio::test]
async fn test_ai_scans_deduplicated_while_in_flight() {
    let config = fast_config(OnSaveMode::Smart);
    let h = harness_with_server(config, MockAnalysisServer::new().with_latency_ms(60));
    let path = Path::new("vault.sol");
    h.documents.set("vault.sol", 1, "contract A {}");

    let (first, second) = tokio::join!(
        h.scheduler.llm_scan_file(path),
        h.scheduler.llm_scan_file(path)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(h.server.command_count(), 1);
    assert_eq!(h.scheduler.stats().deduplicated, 1);
}

#[tokio::test]
async fn test_batch_escalates_to_workspace_scan_at_threshold() {
    let mut config = fast_config(OnSaveMode::Smart);
    config.rescan.mode = RescanMode::Batch;
    config.rescan.batch_threshold = 2;
    let h = harness(config);

    for file in ["a.sol", "b.sol"] {
        h.documents.set(file, 2, "contract X {}");
        h.sink
            .set_ai_findings(file, vec![ai_finding("ai", file, 10, Severity::High)]);
        let mut change = edit(10);
        change.path = PathBuf::from(file);
        h.scheduler.on_document_changed(&change);
        h.scheduler.on_document_saved(Path::new(file)).await;
    }

    tokio::time::sleep(Duration::from_millis(150)).await;

    let commands = h.server.commands();
    assert_eq!(commands, vec![ServerCommand::LlmScanWorkspace]);
}

#[tokio::test]
async fn test_batch_below_threshold_scans_individual_files() {
    let mut config = fast_config(OnSaveMode::Smart);
    config.rescan.mode = RescanMode::Batch;
    config.rescan.batch_threshold = 5;
    let h = harness(config);

    h.documents.set("a.sol", 2, "contract X {}");
    h.sink
        .set_ai_findings("a.sol", vec![ai_finding("ai", "a.sol", 10, Severity::High)]);
    let mut change = edit(10);
    change.path = PathBuf::from("a.sol");
    h.scheduler.on_document_changed(&change);
    h.scheduler.on_document_saved(Path::new("a.sol")).await;

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(
        h.server.commands(),
        vec![ServerCommand::LlmScanFile {
            uri: "a.sol".to_string()
        }]
    );
}

#[tokio::test]
async fn test_workspace_open_initial_scan_and_staleness() {
    let h = harness(fast_config(OnSaveMode::Deterministic));

    // No recorded scan: initial workspace scan, timestamp recorded.
    h.scheduler.on_workspace_open().await;
    assert_eq!(h.server.commands(), vec![ServerCommand::ScanWorkspace]);
    assert!(h.workspace_state.last_full_scan().is_some());

    // Fresh timestamp: nothing happens.
    h.scheduler.on_workspace_open().await;
    assert_eq!(h.server.command_count(), 1);

    // Stale timestamp: rescan.
    h.workspace_state
        .set_last_full_scan(Utc::now() - ChronoDuration::hours(48));
    h.scheduler.on_workspace_open().await;
    assert_eq!(h.server.command_count(), 2);
}

#[tokio::test]
async fn test_workspace_open_waits_for_connection() {
    let h = harness_with_server(
        fast_config(OnSaveMode::Deterministic),
        MockAnalysisServer::disconnected(),
    );

    let server = Arc::clone(&h.server);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.set_connected(true);
    });

    h.scheduler.on_workspace_open().await;
    assert_eq!(h.server.commands(), vec![ServerCommand::ScanWorkspace]);
}

#[tokio::test]
async fn test_workspace_open_gives_up_silently_when_never_available() {
    let mut config = fast_config(OnSaveMode::Deterministic);
    config.startup.availability_timeout_ms = 60;
    let h = harness_with_server(config, MockAnalysisServer::disconnected());

    h.scheduler.on_workspace_open().await;
    assert_eq!(h.server.command_count(), 0);
    assert!(h.workspace_state.last_full_scan().is_none());
}

#[tokio::test]
async fn test_request_failure_clears_pending_so_retry_works() {
    let h = harness(fast_config(OnSaveMode::Deterministic));
    let path = Path::new("vault.sol");

    h.server.set_should_fail(true);
    h.documents.set("vault.sol", 1, "contract A {}");
    h.scheduler.on_document_saved(path).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.server.command_count(), 0);

    // Bookkeeping is back to its pre-scan state; the next save re-attempts.
    h.server.set_should_fail(false);
    h.scheduler.on_document_saved(path).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.server.command_count(), 1);
}

#[tokio::test]
async fn test_idle_timer_fires_workspace_scan() {
    let mut config = fast_config(OnSaveMode::Deterministic);
    config.idle.mode = IdleScanMode::Ai;
    config.idle.delay_secs = 1;
    let h = harness(config);

    h.scheduler.on_activity();
    tokio::time::sleep(Duration::from_millis(400)).await;
    // Renewed activity pushes the timer out.
    h.scheduler.on_activity();
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(h.server.command_count(), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.server.commands(), vec![ServerCommand::LlmScanWorkspace]);
}

#[tokio::test]
async fn test_dispose_cancels_pending_timers() {
    let h = harness(fast_config(OnSaveMode::Deterministic));
    let path = Path::new("vault.sol");

    h.documents.set("vault.sol", 1, "contract A {}");
    h.scheduler.on_document_saved(path).await;
    h.scheduler.dispose();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(h.server.command_count(), 0);
}

#[tokio::test]
async fn test_findings_notification_updates_ai_bookkeeping() {
    let mut config = fast_config(OnSaveMode::Smart);
    config.rescan.mode = RescanMode::File;
    let h = harness(config);
    let path = Path::new("vault.sol");

    h.documents.set("vault.sol", 3, "contract A {}");
    h.sink
        .set_ai_findings("vault.sol", vec![ai_finding("ai-1", "vault.sol", 10, Severity::High)]);

    // An externally-initiated AI scan completes; the notification carries
    // the file list and scan type.
    h.scheduler
        .on_findings_updated(&FindingsUpdated {
            files: Some(vec!["vault.sol".to_string()]),
            scan_epoch: Some(1),
            scan_type: Some(tameshi_client::ScanType::Ai),
            ..Default::default()
        })
        .await;

    // Content is unchanged since that scan, so a save is a no-op even with
    // an edit recorded before the notification cleared it.
    h.scheduler.on_document_saved(path).await;
    assert_eq!(h.server.command_count(), 0);
}
