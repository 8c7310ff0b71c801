//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, InfraConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/meshwire/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("meshwire/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("meshwire.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<InfraConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<InfraConfig, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load and layer every discovered config file (later files win), falling
/// back to defaults for any file that fails to parse (logged by the caller).
pub fn load_layered(cli_path: Option<&Path>) -> (InfraConfig, ConfigSources) {
    let files = discover_config_files_with_override(cli_path);
    let mut config = InfraConfig::default();
    let mut sources = ConfigSources::default();

    for file in &files {
        match load_from_file(file) {
            Ok(loaded) => {
                config = loaded;
                sources.files.push(file.clone());
            }
            Err(_) => continue,
        }
    }

    apply_env_overrides(&mut config, &mut sources);
    (config, sources)
}

/// Apply environment variable overrides to config.
///
/// `MESHWIRE_COORDINATOR_CONNECT`, `MESHWIRE_CELL`, `MESHWIRE_LOG_FILTER`
/// override their respective fields; `RUST_LOG` is also honored for the
/// log filter, matching the common tracing-subscriber convention.
pub fn apply_env_overrides(config: &mut InfraConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("MESHWIRE_COORDINATOR_CONNECT") {
        config.coordinator.connect = v;
        sources.env_overrides.push("MESHWIRE_COORDINATOR_CONNECT".to_string());
    }
    if let Ok(v) = env::var("MESHWIRE_SESSION_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.coordinator.session_timeout_ms = ms;
            sources.env_overrides.push("MESHWIRE_SESSION_TIMEOUT_MS".to_string());
        }
    }
    if let Ok(v) = env::var("MESHWIRE_CELL") {
        config.identity.cell = v;
        sources.env_overrides.push("MESHWIRE_CELL".to_string());
    }
    if let Ok(v) = env::var("MESHWIRE_LOG_FILTER") {
        config.telemetry.log_filter = v;
        sources.env_overrides.push("MESHWIRE_LOG_FILTER".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_filter = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[coordinator]
connect = "10.0.0.1:2181"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.coordinator.connect, "10.0.0.1:2181");
        assert_eq!(config.coordinator.session_timeout_ms, 5000);
        assert_eq!(config.identity.cell, "localhost");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[coordinator]
connect = "zk1:2181,zk2:2181"
session_timeout_ms = 10000

[identity]
cell = "us-east"

[telemetry]
log_filter = "debug"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.coordinator.connect, "zk1:2181,zk2:2181");
        assert_eq!(config.coordinator.session_timeout_ms, 10000);
        assert_eq!(config.identity.cell, "us-east");
        assert_eq!(config.telemetry.log_filter, "debug");
    }

    #[test]
    fn test_load_from_file_missing_returns_err() {
        let err = load_from_file(Path::new("/nonexistent/meshwire.toml"));
        assert!(err.is_err());
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshwire.toml");
        std::fs::write(&path, "[coordinator]\nconnect = \"127.0.0.1:2182\"\n").unwrap();
        let config = load_from_file(&path).unwrap();
        assert_eq!(config.coordinator.connect, "127.0.0.1:2182");
    }
}
