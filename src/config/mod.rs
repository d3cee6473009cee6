/// Configuration management for the Storyloom workflow core
///
/// Handles server configuration, database location, and the version-lock
/// enforcement switch.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// When true, a held version lock blocks GraphEditor mutation of that
    /// definition's current graph. Off restores the legacy behavior where
    /// locks and drafts are independent.
    pub enforce_version_locks: bool,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite database file (default: "data")
    pub data_dir: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("STORYLOOM_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("STORYLOOM_PORT")
                    .unwrap_or_else(|_| "3010".to_string())
                    .parse()
                    .unwrap_or(3010),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("STORYLOOM_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
            },
            enforce_version_locks: std::env::var("STORYLOOM_ENFORCE_LOCKS")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(true),
        }
    }
}
