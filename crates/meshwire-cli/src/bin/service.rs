//! `service <srvtype>` — runs a service reading its manifest from
//! `/services/<srvtype>` (§4.10). Exit 0 on clean stop, non-zero on
//! reactor error.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use meshwire_config::InfraConfig;
use meshwire_core::ServiceEnv;

/// Run a meshwire service, loading its socket manifest from the coordinator.
#[derive(Parser)]
#[command(name = "service", version, about)]
struct Cli {
    /// Service type, e.g. "echo" — manifest is read from /services/<srvtype>.
    srvtype: String,

    /// Path to a meshwire.toml config file (overrides ./meshwire.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let infra = InfraConfig::load_from(cli.config.as_deref());
    meshwire_cli::init_tracing(&infra);

    let identity = meshwire_cli::resolve_identity(&infra);
    tracing::info!(target: "zsock", srvtype = %cli.srvtype, uuid = %identity.uuid, cell = %identity.cell, "starting service");

    let env = ServiceEnv::create(
        &infra.coordinator.connect,
        meshwire_cli::session_timeout(&infra),
        &identity,
        &cli.srvtype,
    )
    .context("failed to build service environment")?;

    env.reactor.run().context("reactor exited with an error")?;
    Ok(())
}
