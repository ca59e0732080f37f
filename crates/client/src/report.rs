//! Markdown report over a correlated finding set.

use crate::core::{CorrelationType, Finding, Severity};

#[derive(Debug, Default)]
pub struct SeverityCount {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub informational: usize,
}

pub fn count_by_severity(findings: &[Finding]) -> SeverityCount {
    let mut count = SeverityCount::default();
    for finding in findings {
        match finding.severity {
            Severity::Critical => count.critical += 1,
            Severity::High => count.high += 1,
            Severity::Medium => count.medium += 1,
            Severity::Low => count.low += 1,
            Severity::Informational => count.informational += 1,
        }
    }
    count
}

/// Render a correlated (and optionally merged) finding set as markdown.
pub fn generate_report(findings: &[Finding]) -> String {
    let mut report = String::from("# Correlation Report\n\n");

    let count = count_by_severity(findings);
    report.push_str("## Summary\n\n");
    report.push_str(&format!("- Total findings: {}\n", findings.len()));
    report.push_str(&format!("- Critical: {}\n", count.critical));
    report.push_str(&format!("- High: {}\n", count.high));
    report.push_str(&format!("- Medium: {}\n", count.medium));
    report.push_str(&format!("- Low: {}\n", count.low));
    report.push_str(&format!("- Informational: {}\n", count.informational));
    report.push_str(&format!(
        "- Correlated: {}\n\n",
        crate::correlation::correlated_count(findings)
    ));

    let confirmed: Vec<_> = findings
        .iter()
        .filter(|f| {
            f.correlation
                .as_ref()
                .is_some_and(|m| !m.merged_source_ids.is_empty())
        })
        .collect();
    if !confirmed.is_empty() {
        report.push_str("## Cross-Scanner Confirmations\n\n");
        for finding in &confirmed {
            let meta = finding.correlation.as_ref().expect("filtered above");
            report.push_str(&format!(
                "- {} **{}** — merged from {} ({}:{})\n",
                finding.severity.emoji(),
                finding.title,
                meta.merged_source_ids.join(", "),
                finding.location.file,
                finding.location.line,
            ));
        }
        report.push('\n');
    }

    report.push_str("## Findings\n\n");
    for finding in findings {
        report.push_str(&format!(
            "### {} {}: {}\n\n",
            finding.severity.emoji(),
            finding.severity,
            finding.title
        ));
        report.push_str(&format!("**Scanner:** {}\n", finding.scanner_id));
        report.push_str(&format!(
            "**Confidence:** {} ({}%)\n",
            finding.confidence,
            finding.confidence.percentage()
        ));
        report.push_str(&format!(
            "**Location:** {}:{}:{}\n\n",
            finding.location.file, finding.location.line, finding.location.column
        ));
        report.push_str(&format!("{}\n\n", finding.description));

        if let Some(meta) = &finding.correlation {
            if meta.correlation_type == Some(CorrelationType::Augmentation)
                && !meta.related_finding_ids.is_empty()
            {
                report.push_str(&format!(
                    "**Augmented by:** {}\n\n",
                    meta.related_finding_ids.join(", ")
                ));
            }
        }

        if let Some(data) = &finding.augmented {
            if let Some(analysis) = &data.contextual_analysis {
                report.push_str(&format!("**Context:** {analysis}\n\n"));
            }
            if let Some(impact) = &data.impact_assessment {
                report.push_str(&format!("**Impact:** {impact}\n\n"));
            }
            if !data.remediation_steps.is_empty() {
                report.push_str("**Remediation:**\n");
                for step in &data.remediation_steps {
                    report.push_str(&format!("- {step}\n"));
                }
                report.push('\n');
            }
            if let Some(risk) = data.risk_score {
                report.push_str(&format!("**Risk score:** {risk}/100\n\n"));
            }
        }
    }

    report
}
