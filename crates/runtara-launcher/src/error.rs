// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runtara-launcher.
//!
//! Errors that reflect a caller mistake or an authorization problem are
//! returned to the caller. Operational turbulence (crashes, hangs, probe
//! failures, log persistence failures) is logged and handled by the
//! supervisor instead of being returned.

use thiserror::Error;

/// Launcher errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Launcher configuration could not be loaded from the environment.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The control plane could not provide the runtime settings.
    #[error("Settings unavailable: {0}")]
    ConfigUnavailable(String),

    /// The control plane rejected the launcher token.
    #[error("Unauthorized")]
    Unauthorized,

    /// `start` was called before settings were loaded.
    #[error("Runtime settings have not been loaded")]
    NotConfigured,

    /// The OS refused to spawn the runtime process.
    #[error("Failed to spawn runtime: {0}")]
    ChildSpawn(String),

    /// The runtime exited unexpectedly.
    #[error("Runtime exited unexpectedly (code={code:?}, signal={signal:?})")]
    ChildCrash {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Terminating signal, if the process was killed.
        signal: Option<i32>,
    },

    /// The runtime stopped answering health probes.
    #[error("Runtime unresponsive after {failures} failed health probes")]
    HealthCheckHang {
        /// Consecutive failed probes when the hang was declared.
        failures: u32,
    },

    /// Persisting or rotating log files failed.
    #[error("Log store error: {0}")]
    LogIo(String),

    /// Reconciling the runtime's packages failed.
    #[error("Package install failed: {0}")]
    PackageInstall(String),

    /// The supervisor task is no longer running.
    #[error("Supervisor is not running")]
    SupervisorGone,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type using launcher Error.
pub type Result<T> = std::result::Result<T, Error>;
