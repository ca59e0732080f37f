use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::fs;
use std::path::PathBuf;
use tameshi_client::{correlation::correlated_count, CorrelationService, Finding};

#[derive(Args, Clone)]
pub struct CorrelateArgs {
    /// Findings export (JSON array) produced by the analysis server.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Write the correlated finding set as JSON.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Collapse duplicate findings after correlating.
    #[arg(long)]
    pub merge: bool,

    /// Link threshold override (0.0 - 1.0).
    #[arg(long)]
    pub threshold: Option<f64>,
}

pub fn execute(args: CorrelateArgs) -> Result<()> {
    let content = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let mut findings: Vec<Finding> =
        serde_json::from_str(&content).context("invalid findings export")?;

    let mut config = tameshi_client::CorrelationConfig::default();
    if let Some(threshold) = args.threshold {
        config.link_threshold = threshold.clamp(0.0, 1.0);
    }
    let service = CorrelationService::with_config(config);

    let total = findings.len();
    service.correlate_findings(&mut findings);
    let linked = correlated_count(&findings);

    let findings = if args.merge {
        service.merge_duplicates(findings)
    } else {
        findings
    };

    println!("{}", "🔗 Finding Correlation".bright_blue().bold());
    println!("{}", "=".repeat(50).bright_blue());
    println!("📁 Input: {}", args.input.display());
    println!("   Findings: {total}");
    println!("   Correlated: {linked}");
    if args.merge {
        println!("   After merge: {}", findings.len());
    }

    for finding in &findings {
        if finding.title.contains("Confirmed by") {
            println!(
                "   {} {}",
                finding.severity.emoji(),
                finding.title.bright_green()
            );
        }
    }

    if let Some(output) = &args.output {
        let json = serde_json::to_string_pretty(&findings)?;
        fs::write(output, json)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("💾 Output: {}", output.display());
    }

    println!(
        "\n✅ {} {} findings processed",
        "SUCCESS:".bright_green().bold(),
        findings.len()
    );

    Ok(())
}
