// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health probing of the runtime's HTTP port.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace};

use super::actor::{Event, Message};
use super::state::SupervisorState;

/// Consecutive failures that count as a hang while starting.
pub const DEFAULT_STARTING_THRESHOLD: u32 = 10;

/// Consecutive failures that count as a hang once healthy.
pub const DEFAULT_RUNNING_THRESHOLD: u32 = 3;

const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Counts consecutive probe failures.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    failures: u32,
    starting_threshold: u32,
    running_threshold: u32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_STARTING_THRESHOLD, DEFAULT_RUNNING_THRESHOLD)
    }
}

impl HealthTracker {
    /// Tracker with explicit thresholds.
    pub fn new(starting_threshold: u32, running_threshold: u32) -> Self {
        Self {
            failures: 0,
            starting_threshold: starting_threshold.max(1),
            running_threshold: running_threshold.max(1),
        }
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a healthy probe.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Record a failed probe in `state`. Returns the failure count when it
    /// reaches the hang threshold; the counter then starts over.
    pub fn record_failure(&mut self, state: SupervisorState) -> Option<u32> {
        self.failures += 1;
        let threshold = match state {
            SupervisorState::Starting => self.starting_threshold,
            _ => self.running_threshold,
        };
        if self.failures >= threshold {
            let failures = self.failures;
            self.failures = 0;
            Some(failures)
        } else {
            None
        }
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Whether a probe status counts as healthy.
pub fn is_healthy_status(status: u16) -> bool {
    (200..500).contains(&status)
}

/// Probe `url` once.
pub async fn probe(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    match client.get(url).timeout(timeout).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            trace!(url = %url, status, "Health probe answered");
            is_healthy_status(status)
        }
        Err(e) => {
            debug!(url = %url, error = %e, "Health probe failed");
            false
        }
    }
}

/// Periodic health probe for one child generation.
pub(crate) struct HealthPoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    generation: u64,
    events: mpsc::UnboundedSender<Message>,
    shutdown: Arc<Notify>,
}

impl HealthPoller {
    pub(crate) fn new(
        client: reqwest::Client,
        port: u16,
        interval: Duration,
        generation: u64,
        events: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            client,
            url: format!("http://127.0.0.1:{}/", port),
            interval,
            generation,
            events,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub(crate) async fn run(self) {
        debug!(
            url = %self.url,
            interval_ms = self.interval.as_millis() as u64,
            generation = self.generation,
            "Health poller started"
        );
        let timeout = self.interval.clamp(MIN_PROBE_TIMEOUT, MAX_PROBE_TIMEOUT);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,

                _ = tokio::time::sleep(self.interval) => {
                    let healthy = tokio::select! {
                        biased;
                        _ = self.shutdown.notified() => break,
                        healthy = probe(&self.client, &self.url, timeout) => healthy,
                    };
                    let event = Event::Health { generation: self.generation, healthy };
                    if self.events.send(Message::Event(event)).is_err() {
                        break;
                    }
                }
            }
        }

        debug!(generation = self.generation, "Health poller stopped");
    }
}
