// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for runtara-launcher.

use std::path::PathBuf;
use std::time::Duration;

/// Launcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the control plane (settings, audit, state reports)
    pub control_plane_url: String,
    /// Project (instance) identifier on the control plane
    pub project_id: String,
    /// Bearer token used for every control plane request
    pub token: String,
    /// Path to the runtime executable
    pub exec_path: PathBuf,
    /// Capacity of the in-memory log ring
    pub log_buffer: usize,
    /// Directory for day-rotated log files (memory only when unset)
    pub log_dir: Option<PathBuf>,
    /// Grace period between SIGTERM and SIGKILL when stopping the runtime
    pub stop_timeout: Duration,
    /// Package manager used to reconcile runtime packages
    pub package_manager: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let control_plane_url = required("RUNTARA_LAUNCHER_CONTROL_PLANE_URL")?
            .trim_end_matches('/')
            .to_string();
        let project_id = required("RUNTARA_LAUNCHER_PROJECT_ID")?;
        let token = required("RUNTARA_LAUNCHER_TOKEN")?;

        let exec_path = PathBuf::from(required("RUNTARA_LAUNCHER_EXEC_PATH")?);
        if !exec_path.is_file() {
            return Err(ConfigError::ExecutableNotFound(exec_path));
        }

        let log_buffer: usize = std::env::var("RUNTARA_LAUNCHER_LOG_BUFFER")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidNumber("RUNTARA_LAUNCHER_LOG_BUFFER"))?;
        if log_buffer == 0 {
            return Err(ConfigError::InvalidNumber("RUNTARA_LAUNCHER_LOG_BUFFER"));
        }

        let log_dir = std::env::var("RUNTARA_LAUNCHER_LOG_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let stop_timeout_secs: u64 = std::env::var("RUNTARA_LAUNCHER_STOP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidNumber("RUNTARA_LAUNCHER_STOP_TIMEOUT_SECS"))?;

        let package_manager =
            std::env::var("RUNTARA_LAUNCHER_PACKAGE_MANAGER").unwrap_or_else(|_| "npm".to_string());

        Ok(Self {
            control_plane_url,
            project_id,
            token,
            exec_path,
            log_buffer,
            log_dir,
            stop_timeout: Duration::from_secs(stop_timeout_secs),
            package_manager,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingEnvVar(name))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A numeric variable could not be parsed.
    #[error("Invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),
    /// The runtime executable does not exist.
    #[error("Runtime executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),
}
