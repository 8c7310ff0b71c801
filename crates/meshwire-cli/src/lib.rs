//! Shared plumbing for the `service` and `pipe` binaries: process
//! configuration loading, tracing init, and identity resolution. Neither
//! binary has any logic of its own beyond argv parsing and building an
//! entry environment (§4.7, §4.10) — this crate exists only so that small
//! amount of setup isn't duplicated between them.

use std::time::Duration;

use meshwire_config::InfraConfig;
use meshwire_core::Identity;
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber from the config's log
/// filter directive, honoring `RUST_LOG` if set (see
/// `meshwire_config::loader::apply_env_overrides`).
pub fn init_tracing(cfg: &InfraConfig) {
    let filter = EnvFilter::try_new(&cfg.telemetry.log_filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn session_timeout(cfg: &InfraConfig) -> Duration {
    Duration::from_millis(cfg.coordinator.session_timeout_ms as u64)
}

pub fn resolve_identity(cfg: &InfraConfig) -> Identity {
    Identity::generate(cfg.identity.cell.clone())
}

/// Strips trailing ASCII whitespace from one stdin line (§8 S6): `"hello\n"`
/// becomes `"hello"`. Leaves interior and leading whitespace untouched.
pub fn strip_trailing_ascii_whitespace(line: &str) -> &str {
    line.trim_end_matches(|c: char| c.is_ascii_whitespace())
}
