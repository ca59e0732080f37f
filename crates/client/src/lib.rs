//! Tameshi Client - Scan Orchestration and Finding Correlation
//!
//! The client half of the Tameshi smart-contract security tooling: decides
//! when the external analysis server is asked to (re)scan, tracks document
//! mutations precisely enough to avoid redundant or stale analysis, and
//! correlates findings from deterministic and LLM-based scanners into one
//! de-duplicated result set.

pub mod config;
pub mod core;
pub mod correlation;
pub mod report;
pub mod scheduler;
pub mod server;
pub mod tracker;

pub use config::{ClientConfig, IdleScanMode, OnSaveMode, RescanMode};
pub use crate::core::{
    AugmentedData, Confidence, CorrelationMetadata, CorrelationType, Finding, Location,
    ScannerAgreement, ScannerKind, Severity, TriageStatus,
};
pub use correlation::{CorrelationConfig, CorrelationService, SeverityUpgradePolicy};
pub use scheduler::{
    DocumentStore, EpochGate, FindingsSink, JsonFileWorkspaceState, ScanScheduler, WorkspaceState,
};
pub use server::{
    AnalysisServer, CommandOutcome, FindingsUpdated, ScanProgress, ScanType, ServerCommand,
    ServerError,
};
pub use tracker::{ChangeTracker, DocumentChange, DocumentEdit, DocumentSnapshot};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
