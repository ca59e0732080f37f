//! Command implementations for the Tameshi client CLI
//!
//! `correlate` links and merges findings from a server export the way the
//! IDE extension does at ingestion time; `report` renders the same result
//! set as a markdown report.

pub mod correlate;
pub mod report;
