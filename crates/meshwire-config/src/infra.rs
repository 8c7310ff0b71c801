//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Coordinator (ZooKeeper-style tree) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Connect string, e.g. "127.0.0.1:2181".
    #[serde(default = "CoordinatorConfig::default_connect")]
    pub connect: String,

    /// Session timeout in milliseconds.
    #[serde(default = "CoordinatorConfig::default_session_timeout_ms")]
    pub session_timeout_ms: u32,
}

impl CoordinatorConfig {
    fn default_connect() -> String {
        "127.0.0.1:2181".to_string()
    }

    fn default_session_timeout_ms() -> u32 {
        5000
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connect: Self::default_connect(),
            session_timeout_ms: Self::default_session_timeout_ms(),
        }
    }
}

/// Identity seeded into every socket and service this process creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Cell (site/datacenter) name advertised alongside every listen record.
    /// Default: "localhost"
    #[serde(default = "IdentityConfig::default_cell")]
    pub cell: String,
}

impl IdentityConfig {
    fn default_cell() -> String {
        "localhost".to_string()
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cell: Self::default_cell(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// tracing-subscriber env-filter directive, e.g. "info" or "meshwire_core=debug".
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_filter")]
    pub log_filter: String,
}

impl TelemetryConfig {
    fn default_log_filter() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: Self::default_log_filter(),
        }
    }
}

/// Infrastructure configuration - cannot change at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    /// Coordinator connection settings.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Process identity defaults.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_defaults() {
        let c = CoordinatorConfig::default();
        assert_eq!(c.connect, "127.0.0.1:2181");
        assert_eq!(c.session_timeout_ms, 5000);
    }

    #[test]
    fn test_identity_defaults() {
        let i = IdentityConfig::default();
        assert_eq!(i.cell, "localhost");
    }

    #[test]
    fn test_telemetry_defaults() {
        let t = TelemetryConfig::default();
        assert_eq!(t.log_filter, "info");
    }
}
