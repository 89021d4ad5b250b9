pub mod cache;
pub mod clock;
pub mod commands;
pub mod config;
pub mod confirm;
pub mod date;
pub mod logging;
pub mod mutation;
pub mod rpc;
pub mod session;
pub mod state;
pub mod toast;
pub mod view;

use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

pub use crate::state::ClientState;

/// Startup for a desktop host: logging, config, then the long-lived client
/// state around `transport`.
#[tracing::instrument(skip_all)]
pub fn bootstrap<T: rpc::CommandTransport>(
    config_path: Option<&Path>,
    verbose: u8,
    quiet: u8,
    transport: T,
) -> anyhow::Result<ClientState<T>> {
    logging::init_tracing(verbose, quiet)?;

    info!(verbose, quiet, "starting tally client");

    let config = config::ClientConfig::load(config_path)
        .context("failed to load client configuration")?;
    debug!(?config, "client configuration");

    Ok(ClientState::with_system_clock(config, transport))
}
