// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-21

//! Command-line flags for the gateway daemon.

use std::path::PathBuf;

use clap::Parser;

/// Gateway daemon configuration.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct GatewayArgs {
    /// Gateway listen address for client connections.
    #[arg(long, default_value = "0.0.0.0:5432")]
    pub listen: String,

    /// Management HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub mgmt_listen: String,

    /// Storage root on a btrfs mount; the `master` subvolume must exist.
    #[arg(long, default_value = "/mnt/prism_data")]
    pub storage_root: PathBuf,

    /// Database image used for new backends.
    #[arg(long, default_value = "postgres:15-alpine")]
    pub image: String,

    /// Pre-existing container network backends attach to.
    #[arg(long, default_value = "prism-net")]
    pub network: String,

    /// Seconds between reaper scans.
    #[arg(long, default_value_t = 10)]
    pub reap_interval_secs: u64,

    /// Idle seconds after which a branch backend is stopped.
    #[arg(long, default_value_t = 30)]
    pub idle_threshold_secs: u64,

    /// Verbosity level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
