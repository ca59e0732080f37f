use crate::core::{Confidence, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub column: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub end_line: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub end_column: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub snippet: Option<String>,
}

impl Location {
    pub fn new(file: String, line: usize, column: usize) -> Self {
        Self {
            file,
            line,
            column,
            end_line: None,
            end_column: None,
            snippet: None,
        }
    }

    pub fn with_end(mut self, end_line: usize, end_column: usize) -> Self {
        self.end_line = Some(end_line);
        self.end_column = Some(end_column);
        self
    }

    pub fn with_snippet(mut self, snippet: String) -> Self {
        self.snippet = Some(snippet);
        self
    }
}

/// Which family of analyzer produced a finding.
///
/// Deterministic scanners are rule/pattern/dataflow based; Source, Ir and
/// Hybrid are sub-families of the deterministic side except Hybrid, which
/// carries an LLM stage and counts as AI for correlation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    Deterministic,
    Source,
    Ir,
    Hybrid,
    Llm,
}

impl ScannerKind {
    /// Infer the family from a scanner id when the server did not tag it.
    pub fn infer(scanner_id: &str) -> Self {
        if scanner_id.contains("llm") {
            Self::Llm
        } else if scanner_id.starts_with("hybrid_") {
            Self::Hybrid
        } else if scanner_id.starts_with("source_") {
            Self::Source
        } else if scanner_id.starts_with("cranelift_") {
            Self::Ir
        } else {
            Self::Deterministic
        }
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, Self::Llm | Self::Hybrid)
    }

    pub fn is_deterministic(&self) -> bool {
        !self.is_ai()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationType {
    Augmentation,
    Duplicate,
    Related,
    Refinement,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerAgreement {
    Full,
    Partial,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageStatus {
    Confirmed,
    Disputed,
    Pending,
}

/// Client-side correlation state attached to a finding.
///
/// Recomputed on every ingestion batch; never persisted across epochs.
/// `related_finding_ids` is symmetric between linked findings and never
/// contains the finding's own id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorrelationMetadata {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub related_finding_ids: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_type: Option<CorrelationType>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_score: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scanner_agreement: Option<ScannerAgreement>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence_boost: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub triage_status: Option<TriageStatus>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub merged_source_ids: Vec<String>,
}

/// LLM-only enrichment copied onto a finding during augmentation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AugmentedData {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contextual_analysis: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub impact_assessment: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub remediation_steps: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub code_examples: Vec<String>,

    /// 0-100.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub risk_score: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub augmented_at: Option<DateTime<Utc>>,
}

impl AugmentedData {
    pub fn is_empty(&self) -> bool {
        self.contextual_analysis.is_none()
            && self.impact_assessment.is_none()
            && self.remediation_steps.is_empty()
            && self.code_examples.is_empty()
            && self.risk_score.is_none()
    }

    /// Field-wise merge: later non-empty values override, risk score takes
    /// the maximum.
    pub fn merge_from(&mut self, other: &AugmentedData) {
        if other.contextual_analysis.is_some() {
            self.contextual_analysis = other.contextual_analysis.clone();
        }
        if other.impact_assessment.is_some() {
            self.impact_assessment = other.impact_assessment.clone();
        }
        if !other.remediation_steps.is_empty() {
            self.remediation_steps = other.remediation_steps.clone();
        }
        if !other.code_examples.is_empty() {
            self.code_examples = other.code_examples.clone();
        }
        self.risk_score = match (self.risk_score, other.risk_score) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if other.augmented_at.is_some() {
            self.augmented_at = other.augmented_at;
        }
    }
}

/// A single issue reported by the analysis server.
///
/// Server-reported fields are immutable on the client, with one exception:
/// severity may be raised under an explicit upgrade policy. Everything the
/// client derives lives in `correlation` and `augmented`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,

    pub scanner_id: String,

    pub finding_type: String,

    pub severity: Severity,

    pub confidence: Confidence,

    pub title: String,

    pub description: String,

    pub location: Location,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub references: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scanner_kind: Option<ScannerKind>,

    /// Server-side hint that this finding relates to another id.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub related_to: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation: Option<CorrelationMetadata>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub augmented: Option<AugmentedData>,
}

impl Finding {
    pub fn new(
        id: String,
        scanner_id: String,
        severity: Severity,
        confidence: Confidence,
        title: String,
        description: String,
        location: Location,
    ) -> Self {
        Self {
            id,
            scanner_id: scanner_id.clone(),
            finding_type: scanner_id,
            severity,
            confidence,
            title,
            description,
            location,
            references: Vec::new(),
            scanner_kind: None,
            related_to: None,
            correlation: None,
            augmented: None,
        }
    }

    pub fn with_finding_type(mut self, finding_type: String) -> Self {
        self.finding_type = finding_type;
        self
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    pub fn with_scanner_kind(mut self, kind: ScannerKind) -> Self {
        self.scanner_kind = Some(kind);
        self
    }

    pub fn with_related_to(mut self, id: String) -> Self {
        self.related_to = Some(id);
        self
    }

    pub fn with_augmented(mut self, augmented: AugmentedData) -> Self {
        self.augmented = Some(augmented);
        self
    }

    /// Explicit kind if the server tagged one, inferred from the scanner id
    /// otherwise.
    pub fn kind(&self) -> ScannerKind {
        self.scanner_kind
            .unwrap_or_else(|| ScannerKind::infer(&self.scanner_id))
    }

    /// Inclusive 1-based line range, collapsing to the start line when no
    /// end was reported.
    pub fn line_range(&self) -> (usize, usize) {
        let start = self.location.line;
        let end = self.location.end_line.unwrap_or(start).max(start);
        (start, end)
    }

    pub fn correlation_mut(&mut self) -> &mut CorrelationMetadata {
        self.correlation.get_or_insert_with(CorrelationMetadata::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(scanner_id: &str) -> Finding {
        Finding::new(
            "f-1".to_string(),
            scanner_id.to_string(),
            Severity::High,
            Confidence::High,
            "Test".to_string(),
            "Test".to_string(),
            Location::new("test.sol".to_string(), 10, 1),
        )
    }

    #[test]
    fn test_scanner_kind_inference() {
        assert_eq!(ScannerKind::infer("llm_scanner"), ScannerKind::Llm);
        assert_eq!(ScannerKind::infer("source_reentrancy"), ScannerKind::Source);
        assert_eq!(ScannerKind::infer("cranelift_reentrancy"), ScannerKind::Ir);
        assert_eq!(ScannerKind::infer("hybrid_overflow"), ScannerKind::Hybrid);
        assert_eq!(ScannerKind::infer("reentrancy"), ScannerKind::Deterministic);
    }

    #[test]
    fn test_explicit_kind_wins_over_inference() {
        let f = finding("source_reentrancy").with_scanner_kind(ScannerKind::Hybrid);
        assert_eq!(f.kind(), ScannerKind::Hybrid);
    }

    #[test]
    fn test_line_range_collapses_without_end() {
        let f = finding("source_reentrancy");
        assert_eq!(f.line_range(), (10, 10));

        let mut g = finding("source_reentrancy");
        g.location = g.location.with_end(14, 1);
        assert_eq!(g.line_range(), (10, 14));
    }

    #[test]
    fn test_augmented_merge_takes_max_risk_score() {
        let mut a = AugmentedData {
            risk_score: Some(80),
            contextual_analysis: Some("a".to_string()),
            ..Default::default()
        };
        let b = AugmentedData {
            risk_score: Some(40),
            impact_assessment: Some("b".to_string()),
            ..Default::default()
        };
        a.merge_from(&b);
        assert_eq!(a.risk_score, Some(80));
        assert_eq!(a.contextual_analysis.as_deref(), Some("a"));
        assert_eq!(a.impact_assessment.as_deref(), Some("b"));
    }

    #[test]
    fn test_finding_roundtrip_keeps_optional_fields_off_the_wire() {
        let f = finding("source_reentrancy");
        let json = serde_json::to_string(&f).unwrap();
        assert!(!json.contains("correlation"));
        assert!(!json.contains("augmented"));
        let back: Finding = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scanner_id, "source_reentrancy");
    }
}
