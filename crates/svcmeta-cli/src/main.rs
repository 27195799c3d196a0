use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use svcmeta_portal::load_catalog_export;
use svcmeta_report::{compare_files, ReportConfig, ReportPipeline, ReportSheet};
use svcmeta_storage::write_workbook;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "svcmeta")]
#[command(about = "Portal service metadata report")]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Overrides for the `SVCMETA_*` environment settings.
#[derive(Debug, Args)]
struct PathArgs {
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    #[arg(long, global = true)]
    report: Option<PathBuf>,
    #[arg(long, global = true)]
    archive_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    comparison_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    rules_dir: Option<PathBuf>,
    /// Portal group to report on; repeat for several.
    #[arg(long = "group", global = true)]
    groups: Vec<String>,
    #[arg(long, global = true)]
    no_parquet: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Archive, rebuild and compare the report.
    Run,
    /// Build the report workbook only.
    Extract {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Compare two report files.
    Compare {
        current: PathBuf,
        previous: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

impl PathArgs {
    fn apply(self, mut config: ReportConfig) -> ReportConfig {
        if let Some(path) = self.catalog {
            config.catalog_path = path;
        }
        if let Some(path) = self.report {
            config.report_path = path;
        }
        if let Some(path) = self.archive_dir {
            config.archive_dir = path;
        }
        if let Some(path) = self.comparison_dir {
            config.comparison_dir = path;
        }
        if let Some(path) = self.rules_dir {
            config.rules_dir = path;
        }
        if !self.groups.is_empty() {
            config.groups = self.groups;
        }
        if self.no_parquet {
            config.parquet_export = false;
        }
        config
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.paths.apply(ReportConfig::from_env());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = ReportPipeline::new(config)?.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Extract { output } => {
            let output = output.unwrap_or_else(|| config.report_path.clone());
            let export = load_catalog_export(&config.catalog_path)?;
            let (outcome, workbook) = ReportPipeline::new(config)?.extract(&export)?;
            write_workbook(&output, &workbook).await?;
            info!(
                path = %output.display(),
                records = outcome.records.len(),
                excluded = outcome.excluded.len(),
                failed = outcome.failed.len(),
                "extract complete"
            );
        }
        Commands::Compare {
            current,
            previous,
            output,
        } => {
            let sheets = ReportSheet::COMPARED.map(ReportSheet::name);
            let summaries = compare_files(&current, &previous, &sheets, &output).await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
    }

    Ok(())
}
