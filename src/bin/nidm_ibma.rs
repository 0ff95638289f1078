use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use nidm_ibma::config::{ConfigLoader, ResolvedConfig};
use nidm_ibma::engine::{DryRunEngine, FslEngine};
use nidm_ibma::error::MetaError;
use nidm_ibma::output::{HumanOutput, JsonOutput, LogProgress, OutputMode};
use nidm_ibma::pipeline::{MetaAnalysis, write_summary};
use nidm_ibma::provenance::SparqlCliQuery;

#[derive(Parser)]
#[command(name = "nidm-ibma")]
#[command(about = "Image-based meta-analysis of NIDM-Results packs (third-level GLM)")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Path to a JSON config file (default: ./nidm-ibma.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Harmonize every study and fit the group model")]
    Run(RunArgs),
    #[command(about = "Report which external programs can be found")]
    Tools,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Directory holding the <study>.nidm.zip archives
    #[arg(long)]
    data_dir: Option<Utf8PathBuf>,

    /// Directory receiving intermediate maps, merged stacks and statistics
    #[arg(long)]
    work_dir: Option<Utf8PathBuf>,

    /// Directory with the .mat/.grp/.con design files
    #[arg(long)]
    design_dir: Option<Utf8PathBuf>,

    /// Contrast to meta-analyse
    #[arg(long)]
    contrast: Option<String>,

    /// Record the FSL commands without running them
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MetaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MetaError) -> u8 {
    match error.root() {
        MetaError::ConfigRead(_)
        | MetaError::ConfigParse(_)
        | MetaError::InvalidConfig(_)
        | MetaError::MissingDataDir(_)
        | MetaError::MissingDesign(_)
        | MetaError::MissingTemplate
        | MetaError::InvalidArchiveName(_)
        | MetaError::InvalidStudyId(_)
        | MetaError::MissingProvenance(_)
        | MetaError::UnrecognizedToolchain { .. } => 2,
        MetaError::MissingTool(_)
        | MetaError::QueryFailed(_)
        | MetaError::QueryParse(_)
        | MetaError::EngineFailure { .. } => 3,
        MetaError::DuplicateStudy(_) | MetaError::IndexMismatch { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_analysis(args, config, output_mode),
        Commands::Tools => run_tools(config, output_mode),
    }
}

fn apply_overrides(args: &RunArgs, mut config: ResolvedConfig) -> ResolvedConfig {
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(work_dir) = &args.work_dir {
        if config.extract_dir == config.work_dir.join("studies") {
            config.extract_dir = work_dir.join("studies");
        }
        config.work_dir = work_dir.clone();
    }
    if let Some(design_dir) = &args.design_dir {
        config.design_dir = design_dir.clone();
    }
    if let Some(contrast) = &args.contrast {
        config.contrast = contrast.clone();
    }
    config
}

fn run_analysis(
    args: RunArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let config = apply_overrides(&args, config);
    let query = SparqlCliQuery::new(config.query_program.clone());

    let summary = if args.dry_run {
        let analysis = MetaAnalysis::new(config, query, DryRunEngine::new());
        let mut summary = analysis.run(&LogProgress)?;
        summary.planned = analysis.engine().planned();
        summary
    } else {
        let engine = FslEngine::new(config.fsl_dir.clone());
        let analysis = MetaAnalysis::new(config, query, engine);
        analysis.run(&LogProgress)?
    };
    let written = write_summary(&summary.work_dir, &summary)?;
    tracing::info!(path = %written, "run summary written");

    match output_mode {
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
        OutputMode::Human => print!("{}", HumanOutput::render_summary(&summary)),
    }
    Ok(())
}

fn run_tools(config: ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let mut tools = FslEngine::new(config.fsl_dir.clone()).tool_info();
    tools.push(SparqlCliQuery::new(config.query_program.clone()).tool_info());

    match output_mode {
        OutputMode::Json => JsonOutput::print_tools(&tools).into_diagnostic()?,
        OutputMode::Human => print!("{}", HumanOutput::render_tools(&tools)),
    }
    if tools.iter().any(|tool| tool.path.is_none()) {
        let missing = tools
            .iter()
            .filter(|tool| tool.path.is_none())
            .map(|tool| tool.name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(MetaError::MissingTool(missing).into());
    }
    Ok(())
}
