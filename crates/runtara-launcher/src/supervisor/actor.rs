// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervisor actor.
//!
//! One task owns every piece of lifecycle state. Handles send [`Command`]s;
//! the child watchers, pollers and timers send [`Event`]s tagged with the
//! child generation they belong to. Messages are processed one at a time, so
//! exits, probe results and operator requests never race each other. Events
//! from an earlier generation are discarded.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::SupervisorConfig;
use super::boot_loop::{BootLoopDetector, BootLoopVerdict};
use super::child::{self, ChildProcess, LaunchSpec};
use super::health::{HealthPoller, HealthTracker};
use super::outbox::Outbound;
use super::sampler::ResourceSampler;
use super::state::{SupervisorState, TargetState};
use crate::control_plane::ControlPlane;
use crate::error::{Error, Result};
use crate::log_store::RingLog;
use crate::log_store::cursor::now_millis;
use crate::packages::PackageReconciler;
use crate::resources::{ResourceAlarm, ResourceAlert, ResourceKind, SampleRing};
use crate::settings::{LauncherSettings, ResourceLimits, RuntimeSettingsFile};

/// Snapshot of the supervisor published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorStatus {
    /// Lifecycle state.
    pub state: SupervisorState,
    /// Requested end state.
    pub target: TargetState,
    /// Epoch milliseconds of the most recent spawn.
    pub last_start_time: Option<u64>,
    /// Whether a runtime process is attached.
    pub child_attached: bool,
    /// Whether settings have been loaded.
    pub configured: bool,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::Stopped,
            target: TargetState::Running,
            last_start_time: None,
            child_attached: false,
            configured: false,
        }
    }
}

pub(crate) enum Message {
    Command(Command),
    Event(Event),
}

pub(crate) enum Command {
    LoadConfig {
        reply: oneshot::Sender<Result<()>>,
    },
    Start {
        target: Option<TargetState>,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) enum Event {
    Installing,
    Loaded {
        result: Result<LauncherSettings>,
    },
    Health {
        generation: u64,
        healthy: bool,
    },
    ResourceAlert {
        generation: u64,
        alert: ResourceAlert,
    },
    StopTimeout {
        generation: u64,
    },
    Exited {
        generation: u64,
        code: Option<i32>,
        signal: Option<i32>,
    },
}

pub(crate) struct Actor {
    config: SupervisorConfig,
    control_plane: Arc<dyn ControlPlane>,
    reconciler: PackageReconciler,
    http: reqwest::Client,
    log: Arc<Mutex<RingLog>>,
    samples: Arc<Mutex<SampleRing>>,
    tx: mpsc::UnboundedSender<Message>,
    outbox: mpsc::UnboundedSender<Outbound>,
    status: watch::Sender<SupervisorStatus>,
    // Outlive child generations so a restart does not re-arm them.
    alarms: Arc<Mutex<Vec<ResourceAlarm>>>,
    alarm_limits: Option<ResourceLimits>,

    state: SupervisorState,
    target: TargetState,
    last_reported: Option<SupervisorState>,
    settings: Option<LauncherSettings>,
    health_interval: Duration,
    auto_safe_mode: bool,
    generation: u64,
    child: Option<ChildProcess>,
    pollers: Vec<Arc<Notify>>,
    health: HealthTracker,
    boot_loop: BootLoopDetector,
    hang_restart: bool,
    pending_stops: Vec<oneshot::Sender<()>>,
    deferred_starts: Vec<(Option<TargetState>, oneshot::Sender<Result<()>>)>,
    load_queue: VecDeque<oneshot::Sender<Result<()>>>,
    load_previous: Option<SupervisorState>,
    last_start: Option<u64>,
}

impl Actor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SupervisorConfig,
        control_plane: Arc<dyn ControlPlane>,
        http: reqwest::Client,
        log: Arc<Mutex<RingLog>>,
        samples: Arc<Mutex<SampleRing>>,
        tx: mpsc::UnboundedSender<Message>,
        outbox: mpsc::UnboundedSender<Outbound>,
        status: watch::Sender<SupervisorStatus>,
    ) -> Self {
        let health = HealthTracker::new(config.starting_failure_threshold, config.running_failure_threshold);
        let boot_loop = BootLoopDetector::new(config.boot_loop.clone());
        let reconciler = PackageReconciler::new(config.package_manager.clone());
        let health_interval = config
            .health_interval
            .unwrap_or_else(|| crate::settings::resolve_health_interval(None));
        Self {
            config,
            control_plane,
            reconciler,
            http,
            log,
            samples,
            tx,
            outbox,
            status,
            alarms: Arc::new(Mutex::new(Vec::new())),
            alarm_limits: None,
            state: SupervisorState::Stopped,
            target: TargetState::Running,
            last_reported: None,
            settings: None,
            health_interval,
            auto_safe_mode: true,
            generation: 0,
            child: None,
            pollers: Vec::new(),
            health,
            boot_loop,
            hang_restart: false,
            pending_stops: Vec::new(),
            deferred_starts: Vec::new(),
            load_queue: VecDeque::new(),
            load_previous: None,
            last_start: None,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        self.system("Launcher started").await;
        info!(exec_path = %self.config.exec_path.display(), "Supervisor started");

        while let Some(message) = rx.recv().await {
            match message {
                Message::Command(Command::Shutdown { reply }) => {
                    if let Some(child) = &self.child {
                        child.signal(Signal::SIGKILL);
                    }
                    self.stop_pollers();
                    self.publish();
                    let _ = reply.send(());
                    break;
                }
                Message::Command(command) => self.handle_command(command).await,
                Message::Event(event) => self.handle_event(event).await,
            }
            self.publish();
        }

        info!("Supervisor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::LoadConfig { reply } => {
                self.load_queue.push_back(reply);
                if self.load_previous.is_none() {
                    self.begin_load().await;
                }
            }
            Command::Start { target, reply } => {
                if !self.pending_stops.is_empty() {
                    debug!("Start deferred until the pending stop completes");
                    self.deferred_starts.push((target, reply));
                    return;
                }
                let result = self.start(target).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Stop { reply } => self.stop(reply).await,
            Command::Shutdown { .. } => {}
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Installing => {
                if self.load_previous.is_some() && self.child.is_none() {
                    self.set_state(SupervisorState::Installing);
                }
            }
            Event::Loaded { result } => self.finish_load(result).await,
            Event::Health { generation, healthy } => self.on_health(generation, healthy).await,
            Event::ResourceAlert { generation, alert } => {
                if !self.is_current(generation) {
                    return;
                }
                let name = match alert.kind {
                    ResourceKind::Cpu => "CPU",
                    ResourceKind::Memory => "Memory",
                };
                self.system(format!(
                    "{} usage averaged {:.1} over the last {} samples, above {:.1} ({}% of the {:.1} limit)",
                    name,
                    alert.average,
                    alert.count,
                    alert.threshold,
                    (self.config.resource_ratio * 100.0).round(),
                    alert.limit
                ))
                .await;
                self.audit(alert.event(), Some(alert.body()));
            }
            Event::StopTimeout { generation } => {
                if let Some(child) = &self.child
                    && child.generation == generation
                    && child.terminating
                {
                    warn!(generation, "Runtime did not exit in time, killing it");
                    child.signal(Signal::SIGKILL);
                    self.system("Runtime did not stop in time, killed").await;
                }
            }
            Event::Exited {
                generation,
                code,
                signal,
            } => self.on_exit(generation, code, signal).await,
        }
    }

    // -- settings ----------------------------------------------------------

    async fn begin_load(&mut self) {
        self.load_previous = Some(self.state);
        if self.child.is_none() {
            self.set_state(SupervisorState::Loading);
        }
        self.system("Loading runtime settings").await;

        let control_plane = self.control_plane.clone();
        let reconciler = self.reconciler.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = load(control_plane.as_ref(), &reconciler, &tx).await;
            let _ = tx.send(Message::Event(Event::Loaded { result }));
        });
    }

    async fn finish_load(&mut self, result: Result<LauncherSettings>) {
        let previous = self.load_previous.take().unwrap_or(SupervisorState::Stopped);

        let reply_result = match result {
            Ok(settings) => {
                self.health_interval = self
                    .config
                    .health_interval
                    .unwrap_or_else(|| settings.health_interval());
                self.auto_safe_mode = !settings.disable_auto_safe_mode;
                self.target = settings.target_state();
                self.configure_alarms(&settings.resources).await;
                info!(
                    target_state = %self.target,
                    health_interval_ms = self.health_interval.as_millis() as u64,
                    auto_safe_mode = self.auto_safe_mode,
                    "Runtime settings loaded"
                );
                self.settings = Some(settings);
                self.system(format!("Target state is '{}'", self.target)).await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to load runtime settings");
                self.system(format!("Failed to load runtime settings: {}", e))
                    .await;
                Err(e)
            }
        };

        if self.child.is_none() {
            self.set_state(previous);
        }
        self.publish();
        if let Some(reply) = self.load_queue.pop_front() {
            let _ = reply.send(reply_result);
        }
        if !self.load_queue.is_empty() {
            self.begin_load().await;
        }
    }

    // -- start / stop -------------------------------------------------------

    async fn start(&mut self, target: Option<TargetState>) -> Result<()> {
        if self.child.is_some() || self.state.is_active() {
            debug!(state = %self.state, "Runtime already started");
            return Ok(());
        }
        if self.settings.is_none() {
            return Err(Error::NotConfigured);
        }
        if let Some(target) = target {
            self.target = target;
        }
        if self.target == TargetState::Stopped {
            debug!("Target state is stopped, not starting");
            return Ok(());
        }
        self.spawn_child().await;
        Ok(())
    }

    async fn spawn_child(&mut self) {
        let Some(settings) = self.settings.clone() else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        let spec = launch_spec(&self.config.exec_path, &settings, self.target);

        self.system(if self.target == TargetState::Safe {
            "Starting runtime in safe mode"
        } else {
            "Starting runtime"
        })
        .await;

        match child::spawn(&spec, generation, self.log.clone(), self.tx.clone()) {
            Ok(child) => {
                info!(pid = ?child.pid, generation, target_state = %self.target, "Runtime spawned");
                self.child = Some(child);
                let now = now_millis();
                self.last_start = Some(now);
                self.boot_loop.record_start(now);
                self.health.reset();
                self.set_state(SupervisorState::Starting);
                self.start_pollers(&settings, generation);
            }
            Err(e) => {
                error!(error = %e, "Failed to start runtime");
                self.system(format!("Failed to start runtime: {}", e)).await;
                self.set_state(SupervisorState::Crashed);
                self.audit("start-failed", Some(json!({ "error": e.to_string() })));
            }
        }
    }

    async fn stop(&mut self, reply: oneshot::Sender<()>) {
        self.target = TargetState::Stopped;
        self.hang_restart = false;

        let terminating = match &self.child {
            Some(child) => child.terminating,
            None => {
                self.stop_pollers();
                if self.state != SupervisorState::Stopped {
                    self.system("Runtime stopped").await;
                    self.set_state(SupervisorState::Stopped);
                }
                self.publish();
                let _ = reply.send(());
                return;
            }
        };

        self.pending_stops.push(reply);
        if !terminating {
            self.system("Stopping runtime").await;
            self.terminate();
        }
    }

    /// SIGTERM the child and arm the SIGKILL timer.
    fn terminate(&mut self) {
        self.stop_pollers();
        self.set_state(SupervisorState::Stopping);
        let Some(child) = self.child.as_mut() else {
            return;
        };
        child.terminating = true;
        child.signal(Signal::SIGTERM);

        let generation = child.generation;
        let timeout = self.config.stop_timeout;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Message::Event(Event::StopTimeout { generation }));
        });
    }

    // -- child events -------------------------------------------------------

    fn is_current(&self, generation: u64) -> bool {
        self.child
            .as_ref()
            .is_some_and(|child| child.generation == generation)
    }

    async fn on_health(&mut self, generation: u64, healthy: bool) {
        if !self.is_current(generation)
            || self.target == TargetState::Stopped
            || self.child.as_ref().is_some_and(|c| c.terminating)
        {
            debug!(generation, "Discarding stale health result");
            return;
        }

        if healthy {
            self.health.record_success();
            if self.state == SupervisorState::Starting {
                let state = self.target.healthy_state();
                self.system(format!("Runtime is {}", state)).await;
                self.set_state(state);
            }
            return;
        }

        if let Some(failures) = self.health.record_failure(self.state) {
            let e = Error::HealthCheckHang { failures };
            error!(error = %e, state = %self.state, "Restarting unresponsive runtime");
            self.system(format!("{}, restarting", e)).await;
            self.hang_restart = true;
            self.terminate();
        }
    }

    async fn on_exit(&mut self, generation: u64, code: Option<i32>, signal: Option<i32>) {
        if !self.is_current(generation) {
            debug!(generation, "Ignoring exit of a previous runtime");
            return;
        }
        let Some(child) = self.child.take() else {
            return;
        };
        self.stop_pollers();
        let code_text = code.map_or_else(|| "null".to_string(), |c| c.to_string());
        let signal_text = signal.map_or_else(|| "null".to_string(), |s| s.to_string());
        self.system(format!("Runtime exited rc={} signal={}", code_text, signal_text))
            .await;

        let stop_requested = !self.pending_stops.is_empty();
        if self.hang_restart && !stop_requested {
            self.hang_restart = false;
            info!(generation, "Restarting runtime after hang");
            self.spawn_child().await;
            return;
        }
        self.hang_restart = false;

        let clean = code == Some(0) && signal.is_none();
        if stop_requested || clean {
            self.set_state(SupervisorState::Stopped);
            self.audit("stopped", None);
            self.publish();
            for reply in self.pending_stops.drain(..) {
                let _ = reply.send(());
            }
            for (target, reply) in std::mem::take(&mut self.deferred_starts) {
                let result = self.start(target).await;
                self.publish();
                let _ = reply.send(result);
            }
            return;
        }

        let crash = Error::ChildCrash { code, signal };
        warn!(error = %crash, generation, "Runtime crashed");
        self.set_state(SupervisorState::Crashed);
        let lines = self.log.lock().await.last_lines(self.config.crash_log_lines);
        self.audit(
            "crashed",
            Some(json!({ "code": code, "signal": signal, "info": lines })),
        );

        if self.target == TargetState::Stopped {
            return;
        }

        let verdict = if self.auto_safe_mode {
            self.boot_loop.record_exit(child.started.elapsed(), self.target)
        } else {
            BootLoopVerdict::Restart
        };
        match verdict {
            BootLoopVerdict::Restart => self.spawn_child().await,
            BootLoopVerdict::EnterSafeMode => {
                self.system("Runtime restart loop detected, restarting in safe mode")
                    .await;
                self.target = TargetState::Safe;
                self.spawn_child().await;
            }
            BootLoopVerdict::Stop => {
                self.system("Runtime restart loop detected in safe mode, stopping")
                    .await;
                self.target = TargetState::Stopped;
                self.set_state(SupervisorState::Stopped);
            }
        }
    }

    // -- pollers ------------------------------------------------------------

    fn start_pollers(&mut self, settings: &LauncherSettings, generation: u64) {
        let health = HealthPoller::new(
            self.http.clone(),
            settings.port,
            self.health_interval,
            generation,
            self.tx.clone(),
        );
        self.pollers.push(health.shutdown_handle());
        tokio::spawn(health.run());

        let sampler = ResourceSampler::new(
            self.http.clone(),
            settings.port,
            self.config.sample_interval,
            generation,
            self.samples.clone(),
            self.alarms.clone(),
            self.tx.clone(),
        );
        self.pollers.push(sampler.shutdown_handle());
        tokio::spawn(sampler.run());
    }

    /// Rebuild the resource alarms when the configured limits change.
    async fn configure_alarms(&mut self, limits: &ResourceLimits) {
        if self.alarm_limits.as_ref() == Some(limits) {
            return;
        }
        let window = self.config.resource_window;
        let ratio = self.config.resource_ratio;
        let mut alarms = Vec::new();
        if let Some(cpu) = limits.cpu.filter(|c| *c > 0.0) {
            alarms.push(ResourceAlarm::with_window(ResourceKind::Cpu, cpu, window, ratio));
        }
        if let Some(memory) = limits.memory.filter(|m| *m > 0.0) {
            alarms.push(ResourceAlarm::with_window(ResourceKind::Memory, memory, window, ratio));
        }
        debug!(alarms = alarms.len(), "Resource alarms configured");
        *self.alarms.lock().await = alarms;
        self.alarm_limits = Some(limits.clone());
    }

    fn stop_pollers(&mut self) {
        for shutdown in self.pollers.drain(..) {
            shutdown.notify_one();
        }
    }

    // -- reporting ----------------------------------------------------------

    fn set_state(&mut self, state: SupervisorState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "State change");
        self.state = state;
        if state.is_definitive() && self.last_reported != Some(state) {
            self.last_reported = Some(state);
            let _ = self.outbox.send(Outbound::State(state));
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = SupervisorStatus {
            state: self.state,
            target: self.target,
            last_start_time: self.last_start,
            child_attached: self.child.is_some(),
            configured: self.settings.is_some(),
        };
        self.status.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn audit(&self, event: &str, body: Option<Value>) {
        let _ = self.outbox.send(Outbound::Audit {
            event: event.to_string(),
            body,
        });
    }

    async fn system(&self, msg: impl Into<String>) {
        self.log.lock().await.system(msg);
    }
}

async fn load(
    control_plane: &dyn ControlPlane,
    reconciler: &PackageReconciler,
    tx: &mpsc::UnboundedSender<Message>,
) -> Result<LauncherSettings> {
    let settings = control_plane.fetch_settings().await?;
    let _ = tx.send(Message::Event(Event::Installing));

    let user_path = settings.user_path();
    if let Some(packages) = &settings.packages {
        reconciler.reconcile(&user_path, packages).await?;
    }
    RuntimeSettingsFile::from_settings(&settings).write_to(&user_path)?;
    Ok(settings)
}

/// Compose the command line and environment of the runtime.
pub(crate) fn launch_spec(
    exec_path: &std::path::Path,
    settings: &LauncherSettings,
    target: TargetState,
) -> LaunchSpec {
    let user_path = settings.user_path();
    let mut env: HashMap<String, String> = HashMap::new();
    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_string(), path);
    }
    env.extend(settings.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    if let Some(heap_mb) = settings.heap_ceiling_mb() {
        let flag = format!("--max-old-space-size={}", heap_mb);
        let options = match env.get("NODE_OPTIONS") {
            Some(existing) if !existing.is_empty() => format!("{} {}", existing, flag),
            _ => flag,
        };
        env.insert("NODE_OPTIONS".to_string(), options);
    }
    if target == TargetState::Safe {
        env.insert("NODE_RED_ENABLE_SAFE_MODE".to_string(), "true".to_string());
    }

    LaunchSpec {
        program: PathBuf::from(exec_path),
        args: vec![
            "-u".to_string(),
            user_path.display().to_string(),
            "-p".to_string(),
            settings.port.to_string(),
        ],
        cwd: user_path,
        env,
    }
}
