// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara Launcher - Runtime Process Supervision
//!
//! This crate supervises one long-running flow runtime on behalf of the
//! control plane. It launches the runtime as a child process, keeps it alive,
//! detects hangs and boot loops, and records what it observes so operators
//! can inspect and steer the instance.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            Control Plane                             │
//! │          settings · audit events · state reports (HTTP)              │
//! └──────────────────────────────────────────────────────────────────────┘
//!                    ▲                              ▲
//!                    │ fetch_settings               │ outbox (ordered)
//! ┌──────────────────┴──────────────────────────────┴───────────────────┐
//! │                     runtara-launcher (This Crate)                    │
//! │  ┌──────────────┐   ┌────────────────┐   ┌────────────────────────┐  │
//! │  │  Supervisor  │◄──│ health poller  │   │ RingLog (+ day files)  │  │
//! │  │    actor     │◄──│ resource poller│──►│ SampleRing             │  │
//! │  └──────┬───────┘   └────────────────┘   └────────────────────────┘  │
//! │         │ spawn / SIGTERM / SIGKILL              ▲ stdout / stderr   │
//! └─────────┼────────────────────────────────────────┼───────────────────┘
//!           ▼                                        │
//! ┌──────────────────────────────────────────────────┴───────────────────┐
//! │                 Runtime process  (-u <userDir> -p <port>)             │
//! │             health: GET /     metrics: GET /ff/metrics                │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `RUNTARA_LAUNCHER_CONTROL_PLANE_URL` | Yes | - | Control plane base URL |
//! | `RUNTARA_LAUNCHER_PROJECT_ID` | Yes | - | Instance id on the control plane |
//! | `RUNTARA_LAUNCHER_TOKEN` | Yes | - | Bearer token |
//! | `RUNTARA_LAUNCHER_EXEC_PATH` | Yes | - | Runtime executable |
//! | `RUNTARA_LAUNCHER_LOG_BUFFER` | No | `1000` | In-memory log capacity |
//! | `RUNTARA_LAUNCHER_LOG_DIR` | No | - | Directory for day-rotated log files |
//! | `RUNTARA_LAUNCHER_STOP_TIMEOUT_SECS` | No | `10` | SIGTERM to SIGKILL grace period |
//! | `RUNTARA_LAUNCHER_PACKAGE_MANAGER` | No | `npm` | Package manager for runtime packages |
//!
//! # Modules
//!
//! - [`config`]: Launcher configuration from environment variables
//! - [`control_plane`]: Control plane client and its mock
//! - [`error`]: Error types
//! - [`log_store`]: Ring log with cursor pagination and day-rotated files
//! - [`packages`]: Package reconciliation for the runtime's user directory
//! - [`resources`]: Resource samples, sample ring and pressure alarms
//! - [`settings`]: Settings document and runtime settings file
//! - [`supervisor`]: Process lifecycle, health probing and boot-loop detection

#![deny(missing_docs)]

/// Launcher configuration loaded from environment variables.
pub mod config;

/// Control plane client.
pub mod control_plane;

/// Error types for launcher operations.
pub mod error;

/// Log storage with cursor pagination.
pub mod log_store;

/// Package reconciliation.
pub mod packages;

/// Resource sampling and alarms.
pub mod resources;

/// Fixed-capacity ring buffer.
pub mod ring;

/// Settings served by the control plane.
pub mod settings;

/// Runtime process supervision.
pub mod supervisor;

pub use config::Config;
pub use control_plane::{ControlPlane, HttpControlPlane, MockControlPlane};
pub use error::{Error, Result};
pub use log_store::{LogEntry, LogPage, LogRecord, RingLog};
pub use resources::{Sample, SampleAverage, SampleRing};
pub use settings::LauncherSettings;
pub use supervisor::{
    BootLoopConfig, Supervisor, SupervisorBuilder, SupervisorConfig, SupervisorState,
    SupervisorStatus, TargetState,
};
