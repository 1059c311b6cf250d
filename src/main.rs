// CLASSIFICATION: COMMUNITY
// Filename: main.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-25

//! Gateway daemon bootstrap.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use prism::config::GatewayArgs;
use prism::engine::{DockerCli, Manager};
use prism::storage::BtrfsDriver;
use prism::{mgmt, session};

fn main() {
    let args = GatewayArgs::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level.as_str()),
    )
    .init();

    if let Err(err) = run(args) {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: GatewayArgs) -> anyhow::Result<()> {
    let driver = Arc::new(BtrfsDriver::new(&args.storage_root));
    driver.init().context("storage init failed")?;

    let runtime = DockerCli::connect().context("container runtime init failed")?;
    let manager = Arc::new(Manager::new(
        Box::new(runtime),
        args.image.clone(),
        args.network.clone(),
    ));

    manager.start_reaper(
        Duration::from_secs(args.reap_interval_secs),
        Duration::from_secs(args.idle_threshold_secs),
    );
    info!(
        "reaper active interval={}s idle_threshold={}s",
        args.reap_interval_secs, args.idle_threshold_secs
    );

    let mgmt_address = args.mgmt_listen.clone();
    let mgmt_manager = Arc::clone(&manager);
    thread::spawn(move || {
        if let Err(err) = mgmt::serve(&mgmt_address, mgmt_manager) {
            error!("management api failed: {err:#}");
        }
    });

    let listener = TcpListener::bind(&args.listen)
        .with_context(|| format!("failed to bind gateway port {}", args.listen))?;
    info!(
        "gateway live listen={} storage={}",
        args.listen,
        args.storage_root.display()
    );

    session::serve(listener, driver, manager)
}
