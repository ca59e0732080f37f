//! Client configuration.
//!
//! Mirrors the workspace settings surface of the IDE extension: when to scan
//! on save, idle and startup behavior, git integration, smart AI rescans,
//! and correlation thresholds. Loadable from YAML or JSON with per-field
//! defaults, plus a small set of environment overrides.

use crate::correlation::CorrelationConfig;
use crate::core::Severity;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnSaveMode {
    Off,
    Deterministic,
    Smart,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleScanMode {
    Off,
    Deterministic,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescanMode {
    Off,
    File,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveScanConfig {
    #[serde(default = "default_on_save_mode")]
    pub mode: OnSaveMode,

    #[serde(default = "default_save_debounce_ms")]
    pub debounce_ms: u64,

    /// Scan the whole workspace instead of just the saved file.
    #[serde(default)]
    pub workspace_scope: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleScanConfig {
    #[serde(default = "default_idle_mode")]
    pub mode: IdleScanMode,

    #[serde(default = "default_idle_delay_secs")]
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupScanConfig {
    /// Delay before the workspace-open check starts.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Bound on waiting for the server connection to come up.
    #[serde(default = "default_availability_timeout_ms")]
    pub availability_timeout_ms: u64,

    #[serde(default = "default_availability_poll_ms")]
    pub availability_poll_ms: u64,

    /// A recorded full scan older than this triggers a fresh one.
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitScanConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Scan only the files the last HEAD move touched instead of the whole
    /// workspace.
    #[serde(default = "default_true")]
    pub changed_files_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartRescanConfig {
    #[serde(default = "default_rescan_mode")]
    pub mode: RescanMode,

    /// Lines around an AI finding considered "near" an edit.
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    /// Affected findings below this severity never trigger a rescan.
    #[serde(default = "default_rescan_min_severity")]
    pub min_severity: Severity,

    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Batch sizes at or above this escalate to one workspace scan.
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_language_ids")]
    pub language_ids: Vec<String>,

    #[serde(default)]
    pub save: SaveScanConfig,

    #[serde(default)]
    pub idle: IdleScanConfig,

    #[serde(default)]
    pub startup: StartupScanConfig,

    #[serde(default)]
    pub git: GitScanConfig,

    #[serde(default)]
    pub rescan: SmartRescanConfig,

    #[serde(default)]
    pub correlation: CorrelationConfig,
}

fn default_on_save_mode() -> OnSaveMode {
    OnSaveMode::Smart
}
fn default_save_debounce_ms() -> u64 {
    1000
}
fn default_idle_mode() -> IdleScanMode {
    IdleScanMode::Off
}
fn default_idle_delay_secs() -> u64 {
    30
}
fn default_settle_ms() -> u64 {
    5000
}
fn default_availability_timeout_ms() -> u64 {
    30_000
}
fn default_availability_poll_ms() -> u64 {
    500
}
fn default_staleness_hours() -> f64 {
    24.0
}
fn default_true() -> bool {
    true
}
fn default_rescan_mode() -> RescanMode {
    RescanMode::Batch
}
fn default_context_lines() -> usize {
    2
}
fn default_rescan_min_severity() -> Severity {
    Severity::Low
}
fn default_batch_delay_ms() -> u64 {
    3000
}
fn default_batch_threshold() -> usize {
    5
}
fn default_language_ids() -> Vec<String> {
    vec!["solidity".to_string(), "yul".to_string()]
}

impl Default for SaveScanConfig {
    fn default() -> Self {
        Self {
            mode: default_on_save_mode(),
            debounce_ms: default_save_debounce_ms(),
            workspace_scope: false,
        }
    }
}

impl Default for IdleScanConfig {
    fn default() -> Self {
        Self {
            mode: default_idle_mode(),
            delay_secs: default_idle_delay_secs(),
        }
    }
}

impl Default for StartupScanConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            availability_timeout_ms: default_availability_timeout_ms(),
            availability_poll_ms: default_availability_poll_ms(),
            staleness_hours: default_staleness_hours(),
        }
    }
}

impl Default for GitScanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            changed_files_only: default_true(),
        }
    }
}

impl Default for SmartRescanConfig {
    fn default() -> Self {
        Self {
            mode: default_rescan_mode(),
            context_lines: default_context_lines(),
            min_severity: default_rescan_min_severity(),
            batch_delay_ms: default_batch_delay_ms(),
            batch_threshold: default_batch_threshold(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            language_ids: default_language_ids(),
            save: SaveScanConfig::default(),
            idle: IdleScanConfig::default(),
            startup: StartupScanConfig::default(),
            git: GitScanConfig::default(),
            rescan: SmartRescanConfig::default(),
            correlation: CorrelationConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(mode) = std::env::var("TAMESHI_ON_SAVE") {
            match mode.as_str() {
                "off" => config.save.mode = OnSaveMode::Off,
                "deterministic" => config.save.mode = OnSaveMode::Deterministic,
                "smart" => config.save.mode = OnSaveMode::Smart,
                "ai" => config.save.mode = OnSaveMode::Ai,
                _ => {}
            }
        }

        if let Ok(ms) = std::env::var("TAMESHI_SAVE_DEBOUNCE_MS") {
            if let Ok(ms) = ms.parse() {
                config.save.debounce_ms = ms;
            }
        }

        if let Ok(secs) = std::env::var("TAMESHI_IDLE_DELAY_SECS") {
            if let Ok(secs) = secs.parse() {
                config.idle.delay_secs = secs;
            }
        }

        if let Ok(hours) = std::env::var("TAMESHI_STALENESS_HOURS") {
            if let Ok(hours) = hours.parse() {
                config.startup.staleness_hours = hours;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.save.mode, OnSaveMode::Smart);
        assert_eq!(config.save.debounce_ms, 1000);
        assert_eq!(config.idle.delay_secs, 30);
        assert_eq!(config.rescan.context_lines, 2);
        assert_eq!(config.rescan.batch_threshold, 5);
        assert!(!config.git.enabled);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
save:
  mode: ai
rescan:
  mode: file
  batch_threshold: 3
"#;
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.save.mode, OnSaveMode::Ai);
        assert_eq!(config.save.debounce_ms, 1000);
        assert_eq!(config.rescan.mode, RescanMode::File);
        assert_eq!(config.rescan.batch_threshold, 3);
        assert_eq!(config.correlation.link_threshold, 0.7);
    }

    #[test]
    fn test_roundtrip() {
        let config = ClientConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.language_ids, config.language_ids);
        assert_eq!(parsed.save.mode, config.save.mode);
    }
}
