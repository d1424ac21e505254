use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_ena_pipeline::config::{ConfigLoader, ConfigOverrides, PipelineConfig};
use kira_ena_pipeline::ena::EnaHttpClient;
use kira_ena_pipeline::error::KiraError;
use kira_ena_pipeline::layout::Layout;
use kira_ena_pipeline::output::{JsonOutput, OutputMode, print_run_summary};
use kira_ena_pipeline::project::{ProjectOrchestrator, SkipPolicy};
use kira_ena_pipeline::sample::SampleOrchestrator;
use kira_ena_pipeline::tool::{SystemToolRunner, inspect_tools};
use kira_ena_pipeline::transport::HttpsMirrorTransport;

#[derive(Parser)]
#[command(name = "kira-ep")]
#[command(about = "Download an ENA project's reads and run them through alignment clean-up and analysis")]
#[command(version, author)]
struct Cli {
    /// JSON config file (defaults to ./kira-ep.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of the human summary
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the whole pipeline for every sample of a project")]
    Run(RunArgs),
    #[command(about = "Fetch the project's file report and print the per-sample file index")]
    Index(IndexArgs),
    #[command(about = "Show where the configured external tools resolve to")]
    Tools,
}

#[derive(Args)]
struct RunArgs {
    /// ENA project accession (e.g. PRJEB19970)
    project: Option<String>,

    #[arg(long)]
    raw_dir: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Parallel downloads per sample
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    threads: Option<usize>,

    /// Java heap for Picard, e.g. 8G
    #[arg(long)]
    java_mem: Option<String>,

    #[arg(long)]
    reference: Option<PathBuf>,

    /// Exit with an error when every sample was skipped
    #[arg(long)]
    fail_when_all_skipped: bool,

    /// Decode each downloaded archive before accepting it
    #[arg(long)]
    verify_downloads: bool,

    /// Abort before downloading if a configured tool is missing
    #[arg(long)]
    check_tools: bool,
}

#[derive(Args)]
struct IndexArgs {
    project: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MetadataHttp(_) | KiraError::MetadataStatus { .. } => 3,
        KiraError::IndexParse(_)
        | KiraError::InvalidAccession(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::MissingTool(_) => 2,
        KiraError::AllSamplesSkipped(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Run(args) => run_pipeline(cli.config, args, output_mode),
        Commands::Index(args) => run_index(cli.config, args),
        Commands::Tools => run_tools(cli.config),
    }
}

fn run_pipeline(
    config_path: Option<PathBuf>,
    args: RunArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        project: args.project,
        raw_dir: args.raw_dir,
        output_dir: args.output_dir,
        workers: args.workers,
        threads: args.threads,
        java_mem: args.java_mem,
        reference: args.reference,
        fail_when_all_skipped: args.fail_when_all_skipped,
        verify_downloads: args.verify_downloads,
    };
    let config = ConfigLoader::resolve(config_path.as_deref(), overrides)?;

    if args.check_tools {
        let report = inspect_tools(&config.tools);
        if let Some(missing) = report.missing.first() {
            return Err(KiraError::MissingTool(missing.clone()).into());
        }
    }

    let orchestrator = build_orchestrator(&config)?;
    let summary = orchestrator.run()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_run(&summary).into_diagnostic()?,
        OutputMode::Human => print_run_summary(&summary),
    }
    summary.verdict(SkipPolicy::from_flag(config.fail_when_all_skipped))?;
    Ok(())
}

fn run_index(config_path: Option<PathBuf>, args: IndexArgs) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        project: Some(args.project),
        ..ConfigOverrides::default()
    };
    let config = ConfigLoader::resolve(config_path.as_deref(), overrides)?;
    let orchestrator = build_orchestrator(&config)?;
    let index = orchestrator.fetch_index()?;
    JsonOutput::print_index(&index).into_diagnostic()
}

fn run_tools(config_path: Option<PathBuf>) -> miette::Result<()> {
    let config = ConfigLoader::resolve(config_path.as_deref(), ConfigOverrides::default())?;
    let report = inspect_tools(&config.tools);
    JsonOutput::print_tools(&report).into_diagnostic()?;
    if !report.missing.is_empty() {
        info!(missing = ?report.missing, "some tools could not be resolved");
    }
    Ok(())
}

fn build_orchestrator(
    config: &PipelineConfig,
) -> miette::Result<ProjectOrchestrator<EnaHttpClient, HttpsMirrorTransport, SystemToolRunner>> {
    let project = config.require_project()?.clone();
    let metadata = EnaHttpClient::new(&config.metadata_base_url, config.metadata_timeout)?;
    let transport = HttpsMirrorTransport::new(config.verify_downloads)?;
    let layout = Layout::new(&config.raw_dir, &config.output_dir, &project)?;
    let samples = SampleOrchestrator::new(config, layout, transport, SystemToolRunner);
    Ok(ProjectOrchestrator::new(project, metadata, samples))
}
