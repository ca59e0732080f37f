use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::fs;
use std::path::PathBuf;
use tameshi_client::{report::generate_report, CorrelationService, Finding};

#[derive(Args, Clone)]
pub struct ReportArgs {
    /// Findings export (JSON array) produced by the analysis server.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Destination markdown file; prints to stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn execute(args: ReportArgs) -> Result<()> {
    let content = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let mut findings: Vec<Finding> =
        serde_json::from_str(&content).context("invalid findings export")?;

    let service = CorrelationService::new();
    service.correlate_findings(&mut findings);
    let findings = service.merge_duplicates(findings);

    let report = generate_report(&findings);

    match &args.output {
        Some(output) => {
            fs::write(output, &report)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "✅ {} report written to {}",
                "SUCCESS:".bright_green().bold(),
                output.display()
            );
        }
        None => print!("{report}"),
    }

    Ok(())
}
