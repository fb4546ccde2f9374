use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tfdiscover::config::{self, Config};
use tfdiscover::core::pipeline::ImportPipeline;
use tfdiscover::core::report::{ReconciliationStatus, RunReport};
use tfdiscover::discovery::model::ResourceKind;
use tfdiscover::formatters::OutputFormatter;
use tfdiscover::generate::artifact;
use tfdiscover::shared::logging;
use tracing::{error, info};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status when the dry-run plan found drift; files for the clean
/// resources are still written
const EXIT_DRIFT: i32 = 2;

#[derive(Parser)]
#[command(
    name = "tfdiscover",
    about = "Discover existing GCP resources and generate Terraform configuration and import blocks for them",
    version = APP_VERSION,
    disable_version_flag(true)
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(
        long,
        short = 'c',
        value_name = "PATH",
        help = "Path to the configuration file"
    )]
    pub config: Option<String>,

    #[arg(long, short = 'V', help = "Print version")]
    pub version: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(name = "discover", about = "List project resources and inferred service roles")]
    Discover(TargetArgs),

    #[command(name = "generate", about = "Generate Terraform files and import blocks")]
    Generate(GenerateArgs),
}

#[derive(Args)]
struct TargetArgs {
    #[arg(long, short = 'p', value_name = "PROJECT_ID", help = "GCP project to scan")]
    project: String,

    #[arg(
        long,
        value_delimiter = ',',
        value_name = "KIND,...",
        help = "Only scan these resource kinds (e.g. cloud_run,bucket)"
    )]
    kinds: Vec<ResourceKind>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text, help = "Report format")]
    format: OutputFormat,
}

#[derive(Args)]
struct GenerateArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(
        long,
        short = 'o',
        value_name = "DIR",
        default_value = "terraform",
        help = "Directory the Terraform files are written to"
    )]
    out: PathBuf,

    #[arg(long, help = "Run a dry-run plan and withhold drifted resources")]
    reconcile: bool,

    #[arg(
        long,
        help = "Add new resources to existing files instead of overwriting them"
    )]
    append: bool,

    #[arg(long, value_name = "NAME", help = "Client name used in generated headers")]
    client: Option<String>,

    #[arg(long, value_name = "BUCKET", help = "GCS bucket for the Terraform state backend")]
    state_bucket: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();

    if cli.version {
        println!("{}", APP_VERSION);
        std::process::exit(0);
    }

    let result = match &cli.command {
        Some(Commands::Discover(args)) => discover(&cli, args).await,
        Some(Commands::Generate(args)) => generate(&cli, args).await,
        None => {
            println!("No command specified. Use --help for usage information.");
            Ok(0)
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{:#}", err);
            std::process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = match &cli.config {
        Some(path) => config::init_from_path(path),
        None => config::init_default(),
    };
    config.context("Failed to load configuration")
}

fn build_pipeline(
    config: &Config,
    target: &TargetArgs,
    out_dir: Option<&std::path::Path>,
    reconcile: bool,
) -> anyhow::Result<ImportPipeline> {
    let pipeline = ImportPipeline::from_config(config, out_dir, reconcile)
        .context("Failed to initialize tfdiscover")?;
    Ok(if target.kinds.is_empty() {
        pipeline
    } else {
        pipeline.with_kinds(&target.kinds)
    })
}

async fn discover(cli: &Cli, args: &TargetArgs) -> anyhow::Result<i32> {
    let config = load_config(cli)?;
    let pipeline = build_pipeline(&config, args, None, false)?;

    info!("Discovering resources in project {}", args.project);
    let (inventory, classifications) = pipeline.discover(&args.project).await;

    match args.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&OutputFormatter::format_inventory(
                &inventory,
                &classifications
            ))?
        ),
        OutputFormat::Text => print!(
            "{}",
            OutputFormatter::format_inventory_text(&inventory, &classifications)
        ),
    }
    Ok(0)
}

async fn generate(cli: &Cli, args: &GenerateArgs) -> anyhow::Result<i32> {
    let mut config = load_config(cli)?;
    if let Some(client) = &args.client {
        config.generation.client = Some(client.clone());
    }
    if let Some(bucket) = &args.state_bucket {
        config.generation.state_bucket = Some(bucket.clone());
    }

    let pipeline = build_pipeline(&config, &args.target, Some(&args.out), args.reconcile)?;

    info!("Generating Terraform for project {}", args.target.project);
    let outcome = match pipeline.run(&args.target.project).await {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(report) = err.report() {
                print_report(report, &[], args.target.format)?;
            }
            return Err(err.into());
        }
    };

    let written = if args.append {
        artifact::persist_merged(&outcome.apply_artifact, &args.out).await
    } else {
        artifact::persist(&outcome.apply_artifact, &args.out).await
    };
    written.with_context(|| format!("Failed to write files to {}", args.out.display()))?;

    print_report(
        &outcome.report,
        &outcome.apply_artifact.import_commands(),
        args.target.format,
    )?;

    Ok(match outcome.report.reconciliation {
        ReconciliationStatus::DriftDetected => EXIT_DRIFT,
        _ => 0,
    })
}

fn print_report(
    report: &RunReport,
    import_commands: &[String],
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&OutputFormatter::format_report(report, import_commands))?
        ),
        OutputFormat::Text => print!("{}", OutputFormatter::format_report_text(report)),
    }
    Ok(())
}
