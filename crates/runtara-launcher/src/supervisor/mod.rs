// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime supervisor.
//!
//! The supervisor owns exactly one runtime process. It loads settings from the
//! control plane, spawns the runtime, probes its health, samples its resource
//! usage and decides after every exit whether to restart it, restart it in
//! safe mode, or leave it stopped.
//!
//! ```text
//!   stopped ─► loading ─► installing ─► (previous state)
//!   stopped ─► starting ─► running | safe
//!   starting | running | safe ─► crashed ─► starting          (restart)
//!                                        ─► starting (safe)   (boot loop)
//!                                        ─► stopped           (boot loop in safe mode)
//!   any ─► stopping ─► stopped                                 (explicit stop)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use runtara_launcher::{HttpControlPlane, Supervisor};
//!
//! let control_plane = Arc::new(HttpControlPlane::new(url, project, token)?);
//! let supervisor = Supervisor::builder("/usr/local/bin/runtime", control_plane).build()?;
//! supervisor.load_config().await?;
//! supervisor.start(None).await?;
//! ```

mod actor;
pub mod boot_loop;
pub mod child;
pub mod health;
mod outbox;
mod sampler;
pub mod state;

pub use actor::SupervisorStatus;
pub use boot_loop::{BootLoopConfig, BootLoopDetector, BootLoopVerdict, RestartHistory};
pub use child::{LaunchSpec, LineFramer, parse_line};
pub use health::HealthTracker;
pub use state::{SupervisorState, TargetState};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot, watch};

use crate::config::Config;
use crate::control_plane::ControlPlane;
use crate::error::{Error, Result};
use crate::log_store::{self, RingLog};
use crate::resources::{SampleRing, alarm, sample_ring};
use actor::{Actor, Command, Message};
use outbox::Outbound;

/// Supervisor tunables.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Runtime executable.
    pub exec_path: PathBuf,
    /// Package manager used for package reconciliation.
    pub package_manager: String,
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_timeout: Duration,
    /// Consecutive failed probes that count as a hang while starting.
    pub starting_failure_threshold: u32,
    /// Consecutive failed probes that count as a hang once healthy.
    pub running_failure_threshold: u32,
    /// Fixed health probe interval. When unset the interval comes from the
    /// settings document.
    pub health_interval: Option<Duration>,
    /// Resource sampling interval.
    pub sample_interval: Duration,
    /// Samples averaged by resource alarms.
    pub resource_window: usize,
    /// Fraction of a resource limit that raises an alarm.
    pub resource_ratio: f64,
    /// Resource samples kept.
    pub sample_capacity: usize,
    /// Log lines attached to a crash audit event.
    pub crash_log_lines: usize,
    /// Boot-loop thresholds.
    pub boot_loop: BootLoopConfig,
}

impl SupervisorConfig {
    /// Defaults for `exec_path`.
    pub fn new(exec_path: impl Into<PathBuf>) -> Self {
        Self {
            exec_path: exec_path.into(),
            package_manager: "npm".to_string(),
            stop_timeout: Duration::from_secs(10),
            starting_failure_threshold: health::DEFAULT_STARTING_THRESHOLD,
            running_failure_threshold: health::DEFAULT_RUNNING_THRESHOLD,
            health_interval: None,
            sample_interval: Duration::from_secs(10),
            resource_window: alarm::DEFAULT_WINDOW,
            resource_ratio: alarm::DEFAULT_RATIO,
            sample_capacity: sample_ring::DEFAULT_CAPACITY,
            crash_log_lines: 20,
            boot_loop: BootLoopConfig::default(),
        }
    }
}

/// Builder for a [`Supervisor`].
pub struct SupervisorBuilder {
    config: SupervisorConfig,
    control_plane: Arc<dyn ControlPlane>,
    log: Option<RingLog>,
}

impl SupervisorBuilder {
    /// Builder for `exec_path` reporting to `control_plane`.
    pub fn new(exec_path: impl Into<PathBuf>, control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            config: SupervisorConfig::new(exec_path),
            control_plane,
            log: None,
        }
    }

    /// Replace all tunables.
    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `log` instead of a memory-only log of default capacity.
    pub fn log(mut self, log: RingLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Set the package manager.
    ///
    /// Default: `npm`
    pub fn package_manager(mut self, package_manager: impl Into<String>) -> Self {
        self.config.package_manager = package_manager.into();
        self
    }

    /// Set the grace period between SIGTERM and SIGKILL.
    ///
    /// Default: 10 seconds
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    /// Probe health at a fixed interval regardless of the settings document.
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health_interval = Some(interval);
        self
    }

    /// Set the hang thresholds for the starting and running phases.
    ///
    /// Default: 10 and 3
    pub fn failure_thresholds(mut self, starting: u32, running: u32) -> Self {
        self.config.starting_failure_threshold = starting;
        self.config.running_failure_threshold = running;
        self
    }

    /// Set the resource sampling interval.
    ///
    /// Default: 10 seconds
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = interval;
        self
    }

    /// Set the resource alarm window and ratio.
    ///
    /// Default: 30 samples, 0.75
    pub fn resource_alarm(mut self, window: usize, ratio: f64) -> Self {
        self.config.resource_window = window;
        self.config.resource_ratio = ratio;
        self
    }

    /// Set the boot-loop thresholds.
    pub fn boot_loop(mut self, boot_loop: BootLoopConfig) -> Self {
        self.config.boot_loop = boot_loop;
        self
    }

    /// Spawn the supervisor. Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Supervisor> {
        let http = reqwest::Client::builder().no_proxy().build()?;
        let log = Arc::new(Mutex::new(
            self.log
                .unwrap_or_else(|| RingLog::new(log_store::DEFAULT_CAPACITY)),
        ));
        let samples = Arc::new(Mutex::new(SampleRing::new(self.config.sample_capacity)));

        let (tx, rx) = mpsc::unbounded_channel();
        let (outbox, _outbox_task) = outbox::spawn(self.control_plane.clone());
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::default());

        let actor = Actor::new(
            self.config,
            self.control_plane,
            http,
            log.clone(),
            samples.clone(),
            tx.clone(),
            outbox.clone(),
            status_tx,
        );
        tokio::spawn(actor.run(rx));

        Ok(Supervisor {
            commands: tx,
            status: status_rx,
            log,
            samples,
            outbox,
        })
    }
}

/// Handle to a running supervisor. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    commands: mpsc::UnboundedSender<Message>,
    status: watch::Receiver<SupervisorStatus>,
    log: Arc<Mutex<RingLog>>,
    samples: Arc<Mutex<SampleRing>>,
    outbox: mpsc::UnboundedSender<Outbound>,
}

impl Supervisor {
    /// Start building a supervisor.
    pub fn builder(
        exec_path: impl Into<PathBuf>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> SupervisorBuilder {
        SupervisorBuilder::new(exec_path, control_plane)
    }

    /// Supervisor configured from launcher configuration.
    pub fn from_config(config: &Config, control_plane: Arc<dyn ControlPlane>) -> Result<Self> {
        let log = match &config.log_dir {
            Some(dir) => RingLog::with_file_store(config.log_buffer, dir)?,
            None => RingLog::new(config.log_buffer),
        };
        Self::builder(config.exec_path.clone(), control_plane)
            .log(log)
            .package_manager(config.package_manager.clone())
            .stop_timeout(config.stop_timeout)
            .build()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(Message::Command(command))
            .map_err(|_| Error::SupervisorGone)
    }

    /// Fetch settings, reconcile packages and write the runtime settings file.
    ///
    /// Fails with `Unauthorized` or `ConfigUnavailable` when the control plane
    /// cannot provide settings, and with `PackageInstall` when reconciliation
    /// fails; the previous state is kept in every case.
    pub async fn load_config(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::LoadConfig { reply })?;
        rx.await.map_err(|_| Error::SupervisorGone)?
    }

    /// Start the runtime, optionally overriding the target state.
    ///
    /// Waits for an in-flight stop first. Does nothing when the runtime is
    /// already up or the target is `stopped`. Spawn failures are logged and
    /// leave the supervisor `crashed`; they are not returned.
    pub async fn start(&self, target: Option<TargetState>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { target, reply })?;
        rx.await.map_err(|_| Error::SupervisorGone)?
    }

    /// Stop the runtime and wait until it has exited.
    ///
    /// Concurrent callers share one termination.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply })?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Stop, reload settings and start again in normal or safe mode.
    pub async fn restart(&self, safe: bool) -> Result<()> {
        self.stop().await?;
        self.load_config().await?;
        let target = if safe {
            TargetState::Safe
        } else {
            TargetState::Running
        };
        self.start(Some(target)).await
    }

    /// Stop the runtime and end the supervisor task.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.status.borrow().state
    }

    /// Requested end state.
    pub fn target_state(&self) -> TargetState {
        self.status.borrow().target
    }

    /// Epoch milliseconds of the most recent spawn, or -1.
    pub fn last_start_time(&self) -> i64 {
        self.status
            .borrow()
            .last_start_time
            .map_or(-1, |t| t as i64)
    }

    /// Whether a runtime process is attached.
    pub fn is_healthy(&self) -> bool {
        self.status.borrow().child_attached
    }

    /// Full status snapshot.
    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    /// Log of launcher and runtime output.
    pub fn log(&self) -> Arc<Mutex<RingLog>> {
        self.log.clone()
    }

    /// Resource samples.
    pub fn resources(&self) -> Arc<Mutex<SampleRing>> {
        self.samples.clone()
    }

    /// Queue an audit event for the control plane.
    pub fn log_audit_event(&self, event: &str, body: Option<Value>) {
        let _ = self.outbox.send(Outbound::Audit {
            event: event.to_string(),
            body,
        });
    }
}
