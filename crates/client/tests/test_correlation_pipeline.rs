//! Correlate-then-merge pipeline over realistic multi-scanner result sets.

use tameshi_client::{
    Confidence, CorrelationService, CorrelationType, Finding, Location, Severity,
};

fn finding(
    id: &str,
    scanner_id: &str,
    file: &str,
    line: usize,
    severity: Severity,
) -> Finding {
    Finding::new(
        id.to_string(),
        scanner_id.to_string(),
        severity,
        Confidence::High,
        format!("{scanner_id} finding"),
        format!("description from {scanner_id}"),
        Location::new(file.to_string(), line, 1),
    )
}

#[test]
fn test_duplicate_scanners_collapse_to_one_confirmed_finding() {
    let service = CorrelationService::new();
    let findings = vec![
        finding("det-1", "source_reentrancy", "vault.sol", 42, Severity::High),
        finding("det-2", "cranelift_reentrancy", "vault.sol", 42, Severity::High),
    ];

    let merged = service.merge_duplicates(findings);
    assert_eq!(merged.len(), 1);
    assert!(merged[0].title.contains("Confirmed by 2 scanners"));
    assert!(merged[0].description.contains("source_reentrancy"));
    assert!(merged[0].description.contains("cranelift_reentrancy"));
}

#[test]
fn test_deterministic_and_llm_findings_link_as_augmentation() {
    let service = CorrelationService::new();
    let mut det = finding("det-1", "source_reentrancy", "vault.sol", 42, Severity::High);
    det.location = det.location.with_end(45, 1);
    let mut llm = finding("llm-1", "llm_scanner", "vault.sol", 42, Severity::High);
    llm.location = llm.location.with_end(44, 1);
    llm.finding_type = "source_reentrancy".to_string();

    let mut findings = vec![det, llm];
    service.correlate_findings(&mut findings);

    for f in &findings {
        let meta = f.correlation.as_ref().expect("both sides linked");
        assert_eq!(meta.correlation_type, Some(CorrelationType::Augmentation));
        assert_eq!(meta.related_finding_ids.len(), 1);
    }
    assert_eq!(
        findings[0].correlation.as_ref().unwrap().related_finding_ids[0],
        "llm-1"
    );
    assert_eq!(
        findings[1].correlation.as_ref().unwrap().related_finding_ids[0],
        "det-1"
    );
}

#[test]
fn test_full_pipeline_correlate_then_merge() {
    let service = CorrelationService::new();

    let mut batch = vec![
        finding("s-1", "source_reentrancy", "vault.sol", 42, Severity::High),
        finding("c-1", "cranelift_reentrancy", "vault.sol", 42, Severity::High),
        finding("l-1", "llm_scanner", "vault.sol", 42, Severity::Critical),
        finding("s-2", "source_dos", "token.sol", 10, Severity::Medium),
    ];
    batch[1].finding_type = "source_reentrancy".to_string();
    batch[2].finding_type = "source_reentrancy".to_string();

    service.correlate_findings(&mut batch);

    // The LLM finding links both deterministic findings before the merge.
    let llm_meta = batch[2].correlation.as_ref().expect("llm side linked");
    assert_eq!(llm_meta.related_finding_ids.len(), 2);
    assert_eq!(llm_meta.correlation_type, Some(CorrelationType::Augmentation));

    let merged = service.merge_duplicates(batch);

    // All three reentrancy findings collapse; the DoS finding survives.
    assert_eq!(merged.len(), 2);
    let confirmed = merged
        .iter()
        .find(|f| f.title.contains("Confirmed by 3 scanners"))
        .expect("one merged record");
    assert_eq!(confirmed.location.line, 42);
    // Highest-severity member represents the group, link metadata intact.
    assert_eq!(confirmed.id, "l-1");
    assert_eq!(confirmed.severity, Severity::Critical);
    assert_eq!(
        confirmed
            .correlation
            .as_ref()
            .unwrap()
            .related_finding_ids
            .len(),
        2
    );
}

#[test]
fn test_pipeline_is_stable_under_repetition() {
    let service = CorrelationService::new();
    let mut batch = vec![
        finding("s-1", "source_reentrancy", "vault.sol", 42, Severity::High),
        finding("c-1", "cranelift_reentrancy", "vault.sol", 42, Severity::Medium),
        finding("s-2", "source_overflow", "vault.sol", 42, Severity::Low),
        finding("x-1", "source_reentrancy", "pool.sol", 7, Severity::High),
    ];

    service.correlate_findings(&mut batch);
    let once = service.merge_duplicates(batch);
    let twice = service.merge_duplicates(once.clone());
    let thrice = service.merge_duplicates(twice.clone());

    let titles = |set: &[Finding]| {
        let mut t: Vec<String> = set.iter().map(|f| f.title.clone()).collect();
        t.sort();
        t
    };
    assert_eq!(titles(&once), titles(&twice));
    assert_eq!(titles(&twice), titles(&thrice));
}
