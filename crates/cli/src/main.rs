use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
use commands::{correlate::CorrelateArgs, report::ReportArgs};

#[derive(Parser)]
#[command(name = "tameshi-client")]
#[command(about = "Correlate and report Tameshi analysis findings")]
#[command(version = "0.2.0")]
#[command(author = "Tameshi Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Correlate a findings export across scanners and merge duplicates.
    Correlate(CorrelateArgs),

    /// Render a markdown correlation report from a findings export.
    Report(ReportArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Correlate(args) => commands::correlate::execute(args),
        Commands::Report(args) => commands::report::execute(args),
    }
}
