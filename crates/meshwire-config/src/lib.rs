//! Minimal configuration loading for meshwire.
//!
//! This crate provides process configuration loading with minimal
//! dependencies, designed to be imported by every meshwire crate without
//! causing circular dependency issues.
//!
//! # Configuration Philosophy
//!
//! Everything here is *infrastructure*: the coordinator connect string, the
//! process identity seed (`cell`), and the logging filter. None of it can
//! meaningfully change once the process has started — socket configuration
//! itself lives in the coordinator (see `meshwire-proto::config`), not here.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/meshwire/config.toml` (system)
//! 2. `~/.config/meshwire/config.toml` (user)
//! 3. `./meshwire.toml` (local override)
//! 4. Environment variables (`MESHWIRE_*`)
//!
//! # Example Config
//!
//! ```toml
//! [coordinator]
//! connect = "127.0.0.1:2181"
//! session_timeout_ms = 5000
//!
//! [identity]
//! cell = "localhost"
//!
//! [telemetry]
//! log_filter = "info"
//! ```

pub mod infra;
pub mod loader;

pub use infra::{CoordinatorConfig, IdentityConfig, InfraConfig, TelemetryConfig};
pub use loader::{ConfigSources, discover_config_files_with_override};

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl InfraConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/meshwire/config.toml`
    /// 3. `~/.config/meshwire/config.toml`
    /// 4. `./meshwire.toml`
    /// 5. Environment variables
    pub fn load() -> Self {
        Self::load_from(None)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./meshwire.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Self {
        let (config, _sources) = loader::load_layered(config_path);
        config
    }

    /// Load configuration and return information about where values came from.
    pub fn load_with_sources() -> (Self, ConfigSources) {
        loader::load_layered(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InfraConfig::default();
        assert_eq!(config.coordinator.connect, "127.0.0.1:2181");
        assert_eq!(config.identity.cell, "localhost");
        assert_eq!(config.telemetry.log_filter, "info");
    }

    #[test]
    fn test_load_defaults() {
        // Load should work even with no config files present.
        let config = InfraConfig::load();
        assert_eq!(config.coordinator.connect, "127.0.0.1:2181");
    }
}
