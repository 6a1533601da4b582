// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara Launcher - Runtime Supervisor
//!
//! Loads the runtime settings from the control plane, starts the runtime and
//! keeps it alive until a shutdown signal arrives.

use std::sync::Arc;
use tracing::{error, info, warn};

use runtara_launcher::config::Config;
use runtara_launcher::control_plane::HttpControlPlane;
use runtara_launcher::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runtara_launcher=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        control_plane = %config.control_plane_url,
        project_id = %config.project_id,
        exec_path = %config.exec_path.display(),
        log_dir = ?config.log_dir,
        "Starting Runtara Launcher"
    );

    let control_plane = Arc::new(HttpControlPlane::from_config(&config)?);
    let supervisor = Supervisor::from_config(&config, control_plane)?;

    // A failed load leaves the launcher up so an operator can retry.
    match supervisor.load_config().await {
        Ok(()) => {
            if let Err(e) = supervisor.start(None).await {
                error!(error = %e, "Failed to start runtime");
                supervisor.log_audit_event(
                    "start-failed",
                    Some(serde_json::json!({ "error": e.to_string() })),
                );
            }
        }
        Err(e) => error!(error = %e, "Failed to load runtime settings"),
    }

    info!(state = %supervisor.state(), "Launcher ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    supervisor.shutdown().await?;

    info!("Runtara Launcher shut down");

    Ok(())
}
