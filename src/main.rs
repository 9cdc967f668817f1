use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use stackgraph::config::Config;
use stackgraph::engine::Engine;
use stackgraph::graph::Topology;
use stackgraph::provider::auth::Credentials;
use stackgraph::provider::{Provisioner, RestProvisioner, SimulatedProvisioner};
use stackgraph::state::StateStore;
use stackgraph::topology::{self, DirectoryBundler, EnvSource};
use stackgraph::{ApplyReport, GraphError, VERSION};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Plan and apply the cart-service resource graph
#[derive(Parser, Debug)]
#[command(name = "stackgraph", version, about, long_about = None)]
struct Args {
    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what apply would do, without provisioning anything
    Plan(RunArgs),
    /// Realize the topology and record the result
    Apply(RunArgs),
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// State file
    #[arg(long)]
    state: Option<PathBuf>,

    /// Maximum concurrent provisioning calls
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,

    /// Provisioning backend
    #[arg(long, value_enum, default_value = "simulated")]
    provider: ProviderKind,

    /// Provisioning API base URL (rest provider)
    #[arg(long)]
    endpoint: Option<String>,

    /// Project to provision into (rest provider)
    #[arg(short, long)]
    project: Option<String>,

    /// Handler source directory
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderKind {
    Simulated,
    Rest,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("stackgraph {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("stackgraph").join("stackgraph.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".stackgraph").join("stackgraph.log");
    }
    PathBuf::from("stackgraph.log")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let (run, apply) = match args.command {
        Command::Plan(run) => (run, false),
        Command::Apply(run) => (run, true),
    };

    let code = match execute(&config, run, apply).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {err:#}");
            error_exit_code(&err)
        }
    };
    Ok(ExitCode::from(code))
}

/// Exit status of a finished apply: 0 only when every resource was realized
fn report_exit_code(report: &ApplyReport) -> u8 {
    if report.is_success() {
        0
    } else {
        1
    }
}

/// Exit status of a run that stopped early: 2 for graph and definition errors
fn error_exit_code(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.is::<GraphError>()) {
        2
    } else {
        1
    }
}

async fn execute(config: &Config, run: RunArgs, apply: bool) -> Result<u8> {
    let state_path = config.effective_state_path(run.state.clone());
    let mut state = StateStore::load(&state_path)?;

    let source_dir = config.effective_source_dir(run.source_dir.clone());
    let bundler = DirectoryBundler::new(config.bundle_options());
    let mut topology: Topology = topology::from_environment(&EnvSource, &bundler, &source_dir)?;

    let provisioner = build_provisioner(config, &run).await?;
    let engine = Engine::new(provisioner).with_parallelism(config.effective_parallelism(run.parallelism));

    let plan = engine.plan(&topology, &state)?;
    if !apply {
        print_output(run.output, &plan, || plan.render_text())?;
        return Ok(0);
    }
    if matches!(run.output, OutputFormat::Text) {
        println!("{}", plan.render_text());
    }

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, waiting for in-flight resources to finish...");
                cancel.cancel();
            }
        })
    };

    let report = engine.apply(&mut topology, &mut state, &cancel).await?;
    watcher.abort();

    state
        .save(&state_path)
        .with_context(|| format!("Failed to save state to {:?}", state_path))?;
    tracing::info!("State saved to {:?}", state_path);

    print_output(run.output, &report, || report.render_text())?;

    Ok(report_exit_code(&report))
}

async fn build_provisioner(config: &Config, run: &RunArgs) -> Result<Arc<dyn Provisioner>> {
    match run.provider {
        ProviderKind::Simulated => Ok(Arc::new(SimulatedProvisioner::new())),
        ProviderKind::Rest => {
            let endpoint = config
                .effective_endpoint(run.endpoint.clone())
                .context("The rest provider needs --endpoint or provider.endpoint in the config")?;
            let project = config
                .effective_project(run.project.clone())
                .context("The rest provider needs --project or provider.project_id in the config")?;
            let credentials = Credentials::discover().await?;
            let provisioner = RestProvisioner::new(&endpoint, &project, credentials)?
                .with_polling(config.provider.poll_interval(), config.provider.operation_timeout());
            Ok(Arc::new(provisioner))
        }
    }
}

fn print_output<T, F>(format: OutputFormat, value: &T, text: F) -> Result<()>
where
    T: serde::Serialize,
    F: FnOnce() -> String,
{
    match format {
        OutputFormat::Text => println!("{}", text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
