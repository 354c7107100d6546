//! # Postback-Bench CLI
//!
//! Command-line front end for the dispatcher side of a postback load test.
//!
//! This module provides CLI commands for:
//! - Running a load test against a receiver (`run`)
//! - Re-checking delivery of an earlier run (`verify`)
//! - Comparing stored fields of sent and received postbacks (`integrity`)
//! - Listing recent runs (`history`)

use clap::{Args, Parser, Subcommand, ValueEnum};
use postback_bench_core::{
    PostbackStore, ReconcilePolicy, Reconciler, SqlitePostbackStore, StoreError, TestId,
};
use postback_bench_dispatcher::{
    run_load_test, HistoryView, HttpPostbackSender, LoadTestConfig, VerificationView,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use postback_bench_dispatcher::ConfigError;

/// Prefix for configuration values taken from the environment
/// (`PB_REQUEST_COUNT=500`)
const ENV_PREFIX: &str = "PB";

// ============================================================================
// CLI Structure
// ============================================================================

/// Postback-Bench - load tests for postback delivery pipelines
#[derive(Parser, Debug)]
#[command(name = "postback-bench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Load tests for postback delivery pipelines")]
#[command(
    long_about = "Sends synthetic attribution postbacks at a controlled rate and reconciles them against what the receiver stored"
)]
pub struct Cli {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "PB_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database shared with the receiver
    #[arg(long, env = "PB_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate, send and reconcile a batch of postbacks
    Run(RunArgs),

    /// Count how many postbacks of a run reached the receiver
    Verify {
        /// Run to verify; defaults to the most recent run
        #[arg(long)]
        test_id: Option<String>,

        /// Reconciliation attempts before giving up
        #[arg(long, default_value = "1")]
        attempts: u32,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Compare every field of sent and received postbacks
    Integrity {
        /// Run to check; defaults to the most recent run
        #[arg(long)]
        test_id: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show recent runs
    History {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value = "5")]
        limit: u32,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Overrides for a single run; unset flags keep the configured value
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Run identifier (generated when absent)
    #[arg(long)]
    pub test_id: Option<String>,

    /// Number of postbacks to send
    #[arg(short = 'n', long)]
    pub request_count: Option<usize>,

    /// Dispatch workers
    #[arg(short, long, alias = "parallel-threads-count")]
    pub workers: Option<usize>,

    /// Aggregate send rate (0 = unlimited)
    #[arg(short, long)]
    pub rps: Option<u32>,

    /// Postbacks admitted but not yet resolved
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Deadline for the dispatch phase
    #[arg(long)]
    pub max_duration_minutes: Option<f64>,

    /// Receiver endpoint
    #[arg(short, long)]
    pub target_url: Option<String>,

    /// Reconciliation attempts
    #[arg(long)]
    pub retry_budget: Option<u32>,

    /// Pause between reconciliation attempts
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Pause before the first reconciliation attempt
    #[arg(long)]
    pub settle_delay_ms: Option<u64>,

    /// Recent runs to print after the report (0 = none)
    #[arg(long, default_value = "5")]
    pub history: u32,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

impl RunArgs {
    /// Apply the flags that were given on top of `config`
    pub fn apply(&self, config: &mut LoadTestConfig) -> Result<(), CliError> {
        if let Some(test_id) = &self.test_id {
            config.test_id = Some(parse_test_id(test_id)?);
        }
        if let Some(value) = self.request_count {
            config.request_count = value;
        }
        if let Some(value) = self.workers {
            config.worker_count = value;
        }
        if let Some(value) = self.rps {
            config.max_requests_per_second = value;
        }
        if let Some(value) = self.max_in_flight {
            config.max_in_flight = Some(value);
        }
        if let Some(value) = self.max_duration_minutes {
            config.max_duration_minutes = value;
        }
        if let Some(value) = &self.target_url {
            config.target_url = value.clone();
        }
        if let Some(value) = self.retry_budget {
            config.retry_budget = value;
        }
        if let Some(value) = self.retry_delay_ms {
            config.retry_delay_ms = value;
        }
        if let Some(value) = self.settle_delay_ms {
            config.settle_delay_ms = value;
        }
        Ok(())
    }
}

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// Error Types
// ============================================================================

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::ConfigLoad(_) => 1,
            Self::Store(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Output(_) => 5,
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// Parse arguments, execute the command and print its output
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli);

    let mut config = load_configuration(cli.config.as_deref(), true)?;
    if let Some(database_url) = &cli.database_url {
        config.database_url = database_url.clone();
    }

    let store = SqlitePostbackStore::connect(&config.database_url).await?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping the run");
            trigger.cancel();
        }
    });

    let output = execute(cli.command, config, Arc::new(store), cancel).await?;
    print!("{}", output);
    Ok(())
}

/// Execute one command and return what should be printed
pub async fn execute(
    command: Commands,
    mut config: LoadTestConfig,
    store: Arc<dyn PostbackStore>,
    cancel: CancellationToken,
) -> Result<String, CliError> {
    match command {
        Commands::Run(args) => {
            args.apply(&mut config)?;
            execute_run_command(&args, config, store, cancel).await
        }
        Commands::Verify {
            test_id,
            attempts,
            format,
        } => {
            let test_id = resolve_test_id(test_id.as_deref(), store.as_ref()).await?;
            let policy = ReconcilePolicy {
                retry_budget: attempts.max(1),
                retry_delay: Duration::from_millis(config.retry_delay_ms),
                settle_delay: Duration::ZERO,
            };
            let result = Reconciler::new(store, policy)
                .with_cancellation(cancel)
                .reconcile(&test_id)
                .await?;
            render(format, &result, |r| VerificationView(r).to_string())
        }
        Commands::Integrity { test_id, format } => {
            let test_id = resolve_test_id(test_id.as_deref(), store.as_ref()).await?;
            let result = Reconciler::new(store, config.reconcile_policy())
                .verify_integrity(&test_id)
                .await?;
            render(format, &result, |r| VerificationView(r).to_string())
        }
        Commands::History { limit, format } => {
            let runs = store.recent_runs(limit).await?;
            render(format, &runs, |r| HistoryView(r).to_string())
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn execute_run_command(
    args: &RunArgs,
    config: LoadTestConfig,
    store: Arc<dyn PostbackStore>,
    cancel: CancellationToken,
) -> Result<String, CliError> {
    config.validate()?;
    info!(
        request_count = config.request_count,
        workers = config.worker_count,
        rps = config.max_requests_per_second,
        target_url = %config.target_url,
        "Starting load test"
    );

    let sender = Arc::new(HttpPostbackSender::new(config.sender_config())?);
    let report = run_load_test(config, sender, Arc::clone(&store), cancel).await?;

    if report.is_interrupted() {
        warn!(test_id = %report.test_id, state = %report.state, "Load test did not complete");
    }

    if args.format == OutputFormat::Json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&report)?));
    }

    let mut output = report.to_string();
    if args.history > 0 {
        match store.recent_runs(args.history).await {
            Ok(runs) => output.push_str(&HistoryView(&runs).to_string()),
            Err(e) => warn!(error = %e, "Could not load run history"),
        }
    }
    Ok(output)
}

// ============================================================================
// Helpers
// ============================================================================

/// Initialize logging based on CLI arguments
fn initialize_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "postback_bench={level},postback_bench_cli={level},postback_bench_dispatcher={level},postback_bench_core={level}",
            level = cli.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Load configuration: defaults, then the YAML file, then `PB_` variables
pub fn load_configuration(
    path: Option<&Path>,
    use_env: bool,
) -> Result<LoadTestConfig, CliError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(CliError::InvalidArgument {
                arg: "config".to_string(),
                message: format!("{} does not exist", path.display()),
            });
        }
        builder = builder.add_source(
            config::File::from(path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    if use_env {
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("postback_types")
                .with_list_parse_key("event_names")
                .with_list_parse_key("source_ids")
                .with_list_parse_key("mmps")
                .with_list_parse_key("adset_ids")
                .with_list_parse_key("ad_ids"),
        );
    }

    Ok(builder.build()?.try_deserialize()?)
}

fn parse_test_id(value: &str) -> Result<TestId, CliError> {
    TestId::new(value).map_err(|e| CliError::InvalidArgument {
        arg: "test-id".to_string(),
        message: e.to_string(),
    })
}

/// Explicit test ID, else the most recent run in the sent store
async fn resolve_test_id(
    explicit: Option<&str>,
    store: &dyn PostbackStore,
) -> Result<TestId, CliError> {
    if let Some(value) = explicit {
        return parse_test_id(value);
    }

    store
        .latest_test_id()
        .await?
        .ok_or_else(|| CliError::CommandFailed {
            message: "no runs recorded; pass --test-id".to_string(),
        })
}

fn render<T, F>(format: OutputFormat, value: &T, text: F) -> Result<String, CliError>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Text => Ok(text(value)),
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(value)?)),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
