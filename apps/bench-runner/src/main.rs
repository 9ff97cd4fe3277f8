//! Benchmark runner binary
//!
//! Runs the selected benchmarks against the selected implementations and
//! prints warnings and failures. With the hidden `worker` subcommand it
//! answers a single worker request on stdin/stdout instead.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use framework_bench::audit::LighthouseCli;
use framework_bench::catalog::Catalog;
use framework_bench::orchestrator::{select_frameworks, Orchestrator};
use framework_bench::session::ChromiumFactory;
use framework_bench::transport::{
    serve_stdio, InProcessTransport, ProcessTransport, WorkerTransport,
};
use framework_bench::{BatchReport, Config, OutputFormat, Reporter, Worker};

#[derive(Parser, Debug)]
#[command(name = "bench-runner")]
#[command(version, about = "Benchmark web UI framework implementations in Chromium")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Batch configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run implementations whose full name contains any of these
    #[arg(long, num_args = 1..)]
    framework: Vec<String>,

    /// Run benchmarks whose id contains any of these
    #[arg(long, num_args = 1..)]
    benchmark: Vec<String>,

    /// Iterations per benchmark; memory and startup runs are capped at their defaults
    #[arg(long)]
    count: Option<u32>,

    /// Abort the batch on the first error
    #[arg(long)]
    exit_on_error: bool,

    /// Do not write result files
    #[arg(long)]
    no_results: bool,

    #[arg(long)]
    headless: bool,

    /// Chrome or Chromium executable
    #[arg(long)]
    chrome_binary: Option<PathBuf>,

    /// Run workers inside this process instead of a child process
    #[arg(long)]
    no_fork: bool,

    /// Port of the HTTP server serving the implementations
    #[arg(long)]
    port: Option<u16>,

    /// Lighthouse executable for the startup benchmark
    #[arg(long, default_value = "lighthouse")]
    lighthouse: PathBuf,

    #[arg(long, value_enum, default_value = "console")]
    format: Format,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one worker request from stdin
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "lighthouse")]
        lighthouse: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Console,
    Json,
    JsonPretty,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Console => OutputFormat::Console,
            Format::Json => OutputFormat::Json,
            Format::JsonPretty => OutputFormat::JsonPretty,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

/// Apply command line flags on top of the file configuration
fn apply_args(mut config: Config, args: &Args) -> Config {
    if let Some(count) = args.count {
        config.run = config.run.with_count(count);
    }
    if let Some(port) = args.port {
        config.run.port = port;
    }
    if args.headless {
        config.run.headless = true;
    }
    if let Some(chrome) = &args.chrome_binary {
        config.run.chrome_binary = Some(chrome.clone());
    }
    if args.no_results {
        config.run.write_results = false;
    }
    if args.exit_on_error {
        config.orchestrator.exit_on_error = true;
    }
    if args.no_fork {
        config.orchestrator.fork_worker = false;
    }
    config
}

async fn run_batch_with<T: WorkerTransport>(
    transport: T,
    config: &Config,
    args: &Args,
) -> anyhow::Result<BatchReport> {
    let catalog = Catalog::with_custom(&config.run, &config.benchmarks)?;
    let frameworks = select_frameworks(&config.frameworks, &args.framework);
    let benchmarks = catalog.select(&args.benchmark);
    if frameworks.is_empty() {
        warn!("No implementation matches {:?}", args.framework);
    }
    if benchmarks.is_empty() {
        warn!("No benchmark matches {:?}", args.benchmark);
    }

    let orchestrator = Orchestrator::new(
        transport,
        config.orchestrator.clone(),
        config.run.clone(),
    );
    Ok(orchestrator.run_batch(&frameworks, &benchmarks).await?)
}

async fn run(args: Args) -> anyhow::Result<bool> {
    if let Some(Command::Worker { config, lighthouse }) = &args.command {
        let config = load_config(config.as_ref())?;
        let worker = Worker::new(ChromiumFactory, LighthouseCli::new(lighthouse))
            .with_benchmarks(config.benchmarks);
        serve_stdio(worker).await?;
        return Ok(true);
    }

    let config = apply_args(load_config(args.config.as_ref())?, &args);
    info!(
        "Write results? {} Fork workers? {}",
        config.run.write_results, config.orchestrator.fork_worker
    );

    let report = if config.orchestrator.fork_worker {
        let mut transport_args = vec!["worker".to_string()];
        if let Some(path) = &args.config {
            transport_args.push("--config".to_string());
            transport_args.push(path.display().to_string());
        }
        transport_args.push("--lighthouse".to_string());
        transport_args.push(args.lighthouse.display().to_string());

        let program = std::env::current_exe().context("Failed to locate the runner binary")?;
        let transport =
            ProcessTransport::new(program, transport_args, config.orchestrator.worker_timeout);
        run_batch_with(transport, &config, &args).await?
    } else {
        let worker = Worker::new(ChromiumFactory, LighthouseCli::new(&args.lighthouse))
            .with_benchmarks(config.benchmarks.clone());
        run_batch_with(InProcessTransport::new(worker), &config, &args).await?
    };

    Reporter::new(args.format.into()).report(&report)?;
    Ok(report.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // stdout carries worker responses and reports; logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
