//! Core data model shared by the orchestration and correlation layers.
//!
//! Findings arrive from the analysis server as immutable records; the client
//! attaches derived correlation and augmentation state without touching the
//! server-reported fields. Severity and confidence are ordered enums so that
//! upgrade policies and conflict detection can compare them directly.

pub mod finding;
pub mod severity;

pub use finding::{
    AugmentedData, CorrelationMetadata, CorrelationType, Finding, Location, ScannerAgreement,
    ScannerKind, TriageStatus,
};
pub use severity::{Confidence, Severity};
