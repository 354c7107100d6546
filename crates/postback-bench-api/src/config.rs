//! Configuration types for the ingestion service

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Buffering of received postbacks
    pub ingestion: IngestionConfig,

    /// Received-record store
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "server.host".to_string(),
            });
        }

        if self.ingestion.batch_size == 0 {
            return Err(ConfigError::Invalid {
                message: "ingestion.batch_size must be at least 1".to_string(),
            });
        }

        if self.storage.database_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "storage.database_url".to_string(),
            });
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Received-postback buffering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Records per multi-row insert
    pub batch_size: usize,

    /// Flush a partial buffer this often (0 disables the periodic flush)
    pub flush_interval_seconds: u64,
}

impl IngestionConfig {
    /// Periodic flush interval, `None` when disabled
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_seconds > 0).then(|| Duration::from_secs(self.flush_interval_seconds))
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            flush_interval_seconds: 5,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite connection URL, shared with the dispatcher
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://requests.db".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
