//! # Postback Receiver
//!
//! Binary entry point for the ingestion side of a postback load test.
//!
//! This executable:
//! - Loads configuration from defaults, YAML files and the environment
//! - Initializes logging
//! - Opens the shared SQLite store and applies the schema
//! - Starts the HTTP server from postback-bench-api and flushes the
//!   ingestion buffer on shutdown

use postback_bench_api::{start_server, LoggingConfig, ServiceConfig, ServiceError};
use postback_bench_core::SqlitePostbackStore;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable naming an explicit configuration file
const CONFIG_FILE_ENV: &str = "PBR_CONFIG_FILE";

/// Prefix for configuration overrides (`PBR__SERVER__PORT=9001`)
const ENV_PREFIX: &str = "PBR";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let explicit_path = std::env::var(CONFIG_FILE_ENV)
        .ok()
        .filter(|path| !path.is_empty());
    let loaded = load_config(explicit_path.as_deref(), true);

    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    info!("Starting postback receiver");

    let service_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration; aborting");
            std::process::exit(3);
        }
    };

    if let Some(path) = &explicit_path {
        info!(path = %path, "Loaded configuration from explicit path");
    }

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    let store = match open_store(&service_config.storage.database_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to open received-record store");
            std::process::exit(e.exit_code());
        }
    };

    info!(
        host = %service_config.server.host,
        port = service_config.server.port,
        batch_size = service_config.ingestion.batch_size,
        database_url = %service_config.storage.database_url,
        "Starting HTTP server"
    );

    if let Err(e) = start_server(service_config, Arc::new(store)).await {
        error!("Server stopped with error: {}", e);
        std::process::exit(e.exit_code());
    }

    Ok(())
}

// ============================================================================
// Private helpers
// ============================================================================

/// Build the service configuration
///
/// Sources, later ones overriding earlier ones:
///  1. built-in defaults
///  2. `./config/receiver.yaml` (optional)
///  3. the file named by `PBR_CONFIG_FILE` (required when given)
///  4. `PBR__`-prefixed environment variables when `use_env` is set
fn load_config(
    explicit_path: Option<&str>,
    use_env: bool,
) -> Result<ServiceConfig, config::ConfigError> {
    let mut builder = config::Config::builder().add_source(
        config::File::with_name("config/receiver")
            .required(false)
            .format(config::FileFormat::Yaml),
    );

    if let Some(path) = explicit_path {
        builder = builder.add_source(
            config::File::with_name(path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    if use_env {
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
    }

    builder.build()?.try_deserialize()
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "postback_receiver={level},postback_bench_api={level},postback_bench_core={level},tower_http=warn",
            level = logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(database_url: &str) -> Result<SqlitePostbackStore, ServiceError> {
    Ok(SqlitePostbackStore::connect(database_url).await?)
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
