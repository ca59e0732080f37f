//! Finding correlation and merge engine.
//!
//! Relates findings produced by heterogeneous scanners (deterministic static
//! analyzers vs. LLM-based analyzers) over the same code region: scores pair
//! similarity, links cross-scanner pairs into correlation metadata, upgrades
//! severity under policy, and collapses duplicates into one record.
//!
//! The service is stateless. `correlate_findings` mutates the correlation
//! metadata of the findings passed in (two-phase: the full link graph is
//! built before any metadata is applied, so results are order-independent);
//! `augment_finding` and `merge_duplicates` build fresh records.

use crate::core::{AugmentedData, CorrelationType, Finding, ScannerAgreement};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Scanner-family prefixes stripped before comparing rule identifiers.
const FAMILY_PREFIXES: [&str; 3] = ["source_", "hybrid_", "cranelift_"];

/// Width of the coarse spatial buckets used by `correlate_findings`.
/// Findings whose ranges straddle a bucket boundary can miss each other;
/// behavior is kept as shipped.
const BUCKET_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityUpgradePolicy {
    /// Never upgrade severity.
    Off,
    /// Upgrade only from LLM findings with high confidence.
    LlmHighConfOnly,
    /// Upgrade from any LLM-classified finding.
    AnyLlm,
    /// Upgrade only when the LLM finding is itself corroborated.
    MultiScanner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Pairs scoring above this are linked during correlation.
    #[serde(default = "default_link_threshold")]
    pub link_threshold: f64,

    /// Pairs scoring at or above this (same file and line, similar type)
    /// are collapsed by `merge_duplicates`.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,

    /// Floor for `find_related_findings`.
    #[serde(default = "default_related_threshold")]
    pub related_threshold: f64,

    /// LLM findings below this confidence never contribute augmented data.
    #[serde(default = "default_min_augmentation_confidence")]
    pub min_augmentation_confidence: crate::core::Confidence,

    #[serde(default = "default_severity_upgrade")]
    pub severity_upgrade: SeverityUpgradePolicy,
}

fn default_link_threshold() -> f64 {
    0.7
}
fn default_duplicate_threshold() -> f64 {
    0.8
}
fn default_related_threshold() -> f64 {
    0.5
}
fn default_min_augmentation_confidence() -> crate::core::Confidence {
    crate::core::Confidence::Medium
}
fn default_severity_upgrade() -> SeverityUpgradePolicy {
    SeverityUpgradePolicy::LlmHighConfOnly
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            link_threshold: default_link_threshold(),
            duplicate_threshold: default_duplicate_threshold(),
            related_threshold: default_related_threshold(),
            min_augmentation_confidence: default_min_augmentation_confidence(),
            severity_upgrade: default_severity_upgrade(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationService {
    config: CorrelationConfig,
}

impl CorrelationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Similarity score for a pair of findings, in [0, 1].
    ///
    /// Location overlap contributes up to 0.4, type similarity 0.4,
    /// identical severity 0.1, and an explicit related-to reference either
    /// way 0.1.
    pub fn correlation_score(&self, a: &Finding, b: &Finding) -> f64 {
        let mut score = 0.0;

        if a.location.file == b.location.file {
            let (start_a, end_a) = a.line_range();
            let (start_b, end_b) = b.line_range();
            let overlap_start = start_a.max(start_b);
            let overlap_end = end_a.min(end_b);
            if overlap_end >= overlap_start {
                let overlap = (overlap_end - overlap_start + 1) as f64;
                let len_a = (end_a - start_a + 1) as f64;
                let len_b = (end_b - start_b + 1) as f64;
                score += 0.4 * (overlap / len_a.max(len_b));
            }
        }

        if self.similar_type(a, b) {
            score += 0.4;
        }

        if a.severity == b.severity {
            score += 0.1;
        }

        let references_other = a.related_to.as_deref() == Some(b.id.as_str())
            || b.related_to.as_deref() == Some(a.id.as_str());
        if references_other {
            score += 0.1;
        }

        score.min(1.0)
    }

    /// Same explicit finding type, or rule identifiers equal once the
    /// scanner-family prefix is stripped.
    pub fn similar_type(&self, a: &Finding, b: &Finding) -> bool {
        a.finding_type == b.finding_type
            || strip_family_prefix(&a.scanner_id) == strip_family_prefix(&b.scanner_id)
    }

    /// Link deterministic/AI cross pairs within coarse spatial buckets.
    ///
    /// Each linked finding gains the other's id in its related set; a
    /// correlation type, score, and scanner agreement are assigned only if
    /// not already set (first link wins). Same-category pairs are left to
    /// `merge_duplicates`.
    pub fn correlate_findings(&self, findings: &mut [Finding]) {
        let mut buckets: HashMap<(String, usize), Vec<usize>> = HashMap::new();
        for (idx, finding) in findings.iter().enumerate() {
            let key = (
                finding.location.file.clone(),
                finding.location.line / BUCKET_LINES,
            );
            buckets.entry(key).or_default().push(idx);
        }

        // Phase one: collect every link before touching metadata.
        let mut links: Vec<Link> = Vec::new();
        for members in buckets.values() {
            for (pos, &i) in members.iter().enumerate() {
                for &j in &members[pos + 1..] {
                    let a = &findings[i];
                    let b = &findings[j];
                    if a.kind().is_ai() == b.kind().is_ai() {
                        continue;
                    }

                    let score = self.correlation_score(a, b);
                    if score > self.config.link_threshold {
                        links.push(Link {
                            a: i,
                            b: j,
                            score,
                            type_for_a: self.infer_correlation_type(a, b, score),
                            type_for_b: self.infer_correlation_type(b, a, score),
                            agreement: self.scanner_agreement(a, b),
                        });
                    }
                }
            }
        }

        // Bucket iteration order is arbitrary; fix the application order so
        // first-wins assignment is deterministic.
        links.sort_by_key(|l| (l.a, l.b));
        debug!(links = links.len(), "applying correlation links");

        for link in links {
            let other_id = findings[link.b].id.clone();
            Self::apply_link(
                &mut findings[link.a],
                other_id,
                link.type_for_a,
                link.score,
                link.agreement,
            );
            let other_id = findings[link.a].id.clone();
            Self::apply_link(
                &mut findings[link.b],
                other_id,
                link.type_for_b,
                link.score,
                link.agreement,
            );
        }
    }

    fn apply_link(
        finding: &mut Finding,
        other_id: String,
        correlation_type: CorrelationType,
        score: f64,
        agreement: ScannerAgreement,
    ) {
        let meta = finding.correlation_mut();
        if !meta.related_finding_ids.contains(&other_id) {
            meta.related_finding_ids.push(other_id);
        }
        if meta.correlation_type.is_none() {
            meta.correlation_type = Some(correlation_type);
        }
        if meta.correlation_score.is_none() {
            meta.correlation_score = Some(score);
        }
        if meta.scanner_agreement.is_none() {
            meta.scanner_agreement = Some(agreement);
        }
    }

    /// Correlation type for a linked pair, from `finding`'s point of view.
    pub fn infer_correlation_type(
        &self,
        finding: &Finding,
        other: &Finding,
        score: f64,
    ) -> CorrelationType {
        if finding.kind().is_ai() != other.kind().is_ai() {
            return CorrelationType::Augmentation;
        }
        if score > 0.85 && finding.kind() == other.kind() {
            return CorrelationType::Duplicate;
        }
        let gap = finding
            .severity
            .ordinal()
            .abs_diff(other.severity.ordinal());
        if gap > 1 {
            return CorrelationType::Conflict;
        }
        CorrelationType::Related
    }

    pub fn scanner_agreement(&self, a: &Finding, b: &Finding) -> ScannerAgreement {
        let severity_match = a.severity == b.severity;
        let type_match = self.similar_type(a, b);
        match (severity_match, type_match) {
            (true, true) => ScannerAgreement::Full,
            (false, false) => ScannerAgreement::Conflict,
            _ => ScannerAgreement::Partial,
        }
    }

    /// Derive a new finding from `base`, enriched by an LLM finding.
    ///
    /// Confidence boost: 0.2 base, +0.1 matching severity, +0.15 high LLM
    /// confidence, capped at 0.5. Augmented data is copied only when the LLM
    /// confidence meets the configured gate; severity is raised only when
    /// the upgrade policy permits and the LLM severity is strictly higher.
    pub fn augment_finding(&self, base: &Finding, llm: &Finding) -> Finding {
        let mut out = base.clone();

        let mut boost = 0.2;
        if base.severity == llm.severity {
            boost += 0.1;
        }
        if llm.confidence == crate::core::Confidence::High {
            boost += 0.15;
        }
        let boost = f64::min(boost, 0.5);

        {
            let meta = out.correlation_mut();
            if !meta.related_finding_ids.contains(&llm.id) {
                meta.related_finding_ids.push(llm.id.clone());
            }
            meta.correlation_type = Some(CorrelationType::Augmentation);
            meta.confidence_boost = Some(boost);
        }

        if llm.confidence >= self.config.min_augmentation_confidence {
            if let Some(data) = &llm.augmented {
                let mut data = data.clone();
                data.augmented_at = Some(Utc::now());
                out.augmented = Some(data);
            }
        }

        if llm.severity > out.severity && self.upgrade_permitted(llm) {
            debug!(
                finding = %out.id,
                from = %out.severity,
                to = %llm.severity,
                "severity upgraded from LLM finding"
            );
            out.severity = llm.severity;
        }

        out
    }

    fn upgrade_permitted(&self, llm: &Finding) -> bool {
        use crate::core::{Confidence, ScannerKind};
        match self.config.severity_upgrade {
            SeverityUpgradePolicy::Off => false,
            SeverityUpgradePolicy::LlmHighConfOnly => {
                llm.kind() == ScannerKind::Llm && llm.confidence == Confidence::High
            }
            SeverityUpgradePolicy::AnyLlm => llm.kind() == ScannerKind::Llm,
            SeverityUpgradePolicy::MultiScanner => llm
                .correlation
                .as_ref()
                .is_some_and(|m| !m.related_finding_ids.is_empty()),
        }
    }

    /// Collapse duplicate findings (same file and line, similar type, score
    /// at or above the duplicate threshold) into one representative record.
    ///
    /// The representative is the highest-severity member; unmatched findings
    /// pass through unchanged. Running the merge twice yields the same set.
    pub fn merge_duplicates(&self, findings: Vec<Finding>) -> Vec<Finding> {
        let mut groups: Vec<Vec<Finding>> = Vec::new();

        for finding in findings {
            let slot = groups
                .iter()
                .position(|group| self.is_duplicate_pair(&group[0], &finding));
            match slot {
                Some(idx) => groups[idx].push(finding),
                None => groups.push(vec![finding]),
            }
        }

        groups
            .into_iter()
            .map(|group| self.merge_group(group))
            .collect()
    }

    fn is_duplicate_pair(&self, a: &Finding, b: &Finding) -> bool {
        a.location.file == b.location.file
            && a.location.line == b.location.line
            && self.similar_type(a, b)
            && self.correlation_score(a, b) >= self.config.duplicate_threshold
    }

    fn merge_group(&self, group: Vec<Finding>) -> Finding {
        if group.len() == 1 {
            return group.into_iter().next().expect("non-empty group");
        }

        let rep_idx = group
            .iter()
            .enumerate()
            .max_by_key(|&(idx, f)| (f.severity, std::cmp::Reverse(idx)))
            .map(|(idx, _)| idx)
            .unwrap_or(0);

        let mut merged = group[rep_idx].clone();
        merged.title = format!(
            "{} (Confirmed by {} scanners)",
            merged.title,
            group.len()
        );
        merged.description = group
            .iter()
            .map(|f| f.description.as_str())
            .collect::<Vec<_>>()
            .join(" | ");

        let source_ids: Vec<String> = group.iter().map(|f| f.id.clone()).collect();
        merged.correlation_mut().merged_source_ids = source_ids;

        let mut augmented: Option<AugmentedData> = None;
        for member in &group {
            if let Some(data) = &member.augmented {
                match augmented.as_mut() {
                    Some(acc) => acc.merge_from(data),
                    None => augmented = Some(data.clone()),
                }
            }
        }
        if augmented.is_some() {
            merged.augmented = augmented;
        }

        merged
    }

    /// All other findings scoring above the related threshold, best first.
    pub fn find_related_findings<'a>(
        &self,
        finding: &Finding,
        all: &'a [Finding],
    ) -> Vec<(&'a Finding, f64)> {
        let mut related: Vec<(&Finding, f64)> = all
            .iter()
            .filter(|other| other.id != finding.id)
            .map(|other| (other, self.correlation_score(finding, other)))
            .filter(|(_, score)| *score > self.config.related_threshold)
            .collect();

        related.sort_by(|(_, x), (_, y)| y.partial_cmp(x).unwrap_or(std::cmp::Ordering::Equal));
        related
    }
}

struct Link {
    a: usize,
    b: usize,
    score: f64,
    type_for_a: CorrelationType,
    type_for_b: CorrelationType,
    agreement: ScannerAgreement,
}

fn strip_family_prefix(scanner_id: &str) -> &str {
    for prefix in FAMILY_PREFIXES {
        if let Some(rest) = scanner_id.strip_prefix(prefix) {
            return rest;
        }
    }
    scanner_id
}

/// Count of findings carrying at least one correlation link.
pub fn correlated_count(findings: &[Finding]) -> usize {
    findings
        .iter()
        .filter(|f| {
            f.correlation
                .as_ref()
                .is_some_and(|m| !m.related_finding_ids.is_empty())
        })
        .count()
}
