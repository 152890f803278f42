//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod daemon_config;

use std::process::ExitCode;
use std::sync::Arc;

use bfdd_core::auth::{AuthKey, Keystore, StandardAuthenticator};
use bfdd_core::{Manager, Reactor};
use daemon_config::DaemonConfig;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

// A `RoutingCollaborator` that only logs. The real routing-protocol glue is
// out of scope for this core; this is the minimal concrete implementation
// needed to run the bundled binary standalone.
#[derive(Debug, Default)]
struct LoggingCollaborator;

impl bfdd_core::RoutingCollaborator for LoggingCollaborator {
    fn disable_peer(&self, address: std::net::IpAddr, reason: &str) {
        info!(peer = %address, %reason, "would disable peer");
    }

    fn enable_peer(&self, address: std::net::IpAddr) {
        info!(peer = %address, "would enable peer");
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("bfdd=info".parse().unwrap())
        .from_env_lossy();
    let stdout = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .init();
}

fn load_config(path: &str) -> Result<DaemonConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|error| format!("failed to read {path}: {error}"))?;
    serde_json::from_str(&contents)
        .map_err(|error| format!("failed to parse {path}: {error}"))
}

fn main() -> ExitCode {
    init_tracing();

    let config_path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: bfdd <config-file>");
            return ExitCode::FAILURE;
        }
    };

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };

    // Abort the process if any spawned task panics, rather than silently
    // leaving sessions half-initialized.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    info!("starting up");

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(run(config));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "fatal error during startup");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: DaemonConfig) -> Result<(), String> {
    let mut keystore = Keystore::new();
    for key in config.keys {
        keystore.insert(
            key.key_id,
            AuthKey {
                auth_type: key.auth_type,
                material: key.material.into_bytes(),
            },
        );
    }

    let (state_changep, state_changec) = tokio::sync::mpsc::channel(64);
    let (manager, manager_rx, manager_handle) = Manager::new(
        Arc::new(StandardAuthenticator),
        Arc::new(keystore),
        state_changep,
    );

    let reactor = Reactor::new(state_changec, Box::new(LoggingCollaborator));

    let manager_task = tokio::spawn(manager.run(manager_rx));
    let reactor_task = tokio::spawn(reactor.run());

    for session in config.sessions {
        match manager_handle.create_session(session).await {
            Ok(discr) => info!(%discr, "session created"),
            Err(error) => {
                error.log();
                return Err("failed to create a configured session".to_string());
            }
        }
    }

    wait_for_shutdown_signal().await;
    info!("shutting down");

    manager_handle.shutdown().await;
    drop(manager_handle);

    let _ = manager_task.await;
    let _ = reactor_task.await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
