use anyhow::{Context, Result};
use arnscan::aws::ReplayClientFactory;
use arnscan::{dump, Config, Locator, Registry, ResourceInstance, Scanner};
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Resolve a resource locator and list what it addresses
#[derive(Parser, Debug)]
#[command(name = "arnscan", version = arnscan::VERSION, about, long_about = None)]
struct Args {
    /// Locator, e.g. `arn:aws:sqs:*:*:queue/*` or
    /// `arn:aws:dynamodb:us-east-1:*:table/orders|ItemCount`. Everything after
    /// the first `|` is a field path, so segments cannot use regex alternation.
    locator: String,

    /// Write one JSON file per resource under this directory instead of printing ARNs
    #[arg(short, long)]
    output_path: Option<PathBuf>,

    /// Convert CamelCase keys to snake_case in JSON output
    #[arg(long)]
    normalize: bool,

    /// Number of (region, account) pairs scanned at once
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Print results as they arrive instead of in locator order
    #[arg(long)]
    unordered: bool,

    /// Configuration file (default: $ARNSCAN_CONFIG or <config dir>/arnscan/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Record every backend response under this directory
    #[arg(long, conflicts_with = "replay")]
    record: Option<PathBuf>,

    /// Serve backend calls from responses recorded under this directory
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
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

    // RUST_LOG narrows output further, e.g. `arnscan::aws=trace`
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.as_str().to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("arnscan started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("arnscan").join("arnscan.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".arnscan").join("arnscan.log");
    }
    PathBuf::from("arnscan.log")
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(n) = args.concurrency {
        config.concurrency = n.max(1);
    }
    if args.unordered {
        config.ordered = false;
    }
    if args.record.is_some() {
        config.record_path = args.record.clone();
    }
    Ok(config)
}

fn build_scanner(args: &Args, config: &Config) -> Result<Scanner> {
    match &args.replay {
        Some(dir) => {
            tracing::info!("replaying responses from {:?}", dir);
            Ok(
                Scanner::new(Registry::builtin(), Arc::new(ReplayClientFactory::new(dir)))
                    .with_scheme(&config.scheme)
                    .with_provider(&config.provider)
                    .with_options(config.scan_options()),
            )
        },
        None => Scanner::from_config(config),
    }
}

/// Path segments are made filesystem-safe; an empty region becomes `_`
fn output_file(root: &Path, resource: &ResourceInstance) -> PathBuf {
    let safe = |s: &str| -> String {
        if s.is_empty() {
            return "_".to_string();
        }
        s.chars()
            .map(|c| if c == '/' || c == ':' || c == '\\' { '_' } else { c })
            .collect()
    };

    root.join(safe(resource.provider()))
        .join(safe(resource.service()))
        .join(safe(resource.region()))
        .join(safe(resource.account()))
        .join(safe(resource.resource_type()))
        .join(format!("{}.json", safe(resource.id())))
}

async fn write_resource(root: &Path, resource: &ResourceInstance, normalize: bool) -> Result<()> {
    if let Err(e) = resource.tags().await {
        tracing::warn!("{}: cannot fetch tags: {}", resource.arn(), e);
    }

    let path = output_file(root, resource);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let body = dump::to_json(resource, normalize)?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

async fn run(args: Args) -> Result<usize> {
    let config = load_config(&args)?;
    let locator = Locator::parse(&args.locator).context("Invalid locator")?;

    let cancel = CancellationToken::new();
    let scanner = build_scanner(&args, &config)?.with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping scan");
            cancel.cancel();
        }
    });

    let mut scan = scanner.scan(&locator);
    tracing::info!("{} expands to {} leaves", locator, scan.leaf_count());

    let mut failures = 0;
    while let Some(item) = scan.next().await {
        match item {
            Ok(resource) => match &args.output_path {
                Some(root) => {
                    if let Err(e) = write_resource(root, &resource, args.normalize).await {
                        eprintln!("error: {:#}", e);
                        failures += 1;
                    }
                },
                None => println!("{}", resource.arn()),
            },
            Err(e) => {
                eprintln!("error: {}", e);
                failures += 1;
            },
        }
    }

    Ok(failures)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: logging disabled: {:#}", e);
            None
        },
    };

    match run(args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            tracing::warn!("{} leaf error(s)", failures);
            ExitCode::FAILURE
        },
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        },
    }
}
