// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic resource sampling for one child generation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc};
use tracing::debug;

use super::actor::{Event, Message};
use crate::resources::{CpuTracker, ResourceAlarm, SampleRing, scrape};

pub(crate) struct ResourceSampler {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    generation: u64,
    samples: Arc<Mutex<SampleRing>>,
    alarms: Arc<Mutex<Vec<ResourceAlarm>>>,
    events: mpsc::UnboundedSender<Message>,
    shutdown: Arc<Notify>,
}

impl ResourceSampler {
    pub(crate) fn new(
        client: reqwest::Client,
        port: u16,
        interval: Duration,
        generation: u64,
        samples: Arc<Mutex<SampleRing>>,
        alarms: Arc<Mutex<Vec<ResourceAlarm>>>,
        events: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            client,
            url: format!("http://127.0.0.1:{}/ff/metrics", port),
            interval,
            generation,
            samples,
            alarms,
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
            "Resource sampler started"
        );
        let mut cpu = CpuTracker::new();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,

                _ = tokio::time::sleep(self.interval) => {
                    let sample = tokio::select! {
                        biased;
                        _ = self.shutdown.notified() => break,
                        sample = scrape(&self.client, &self.url, &mut cpu, self.interval) => sample,
                    };

                    let alerts: Vec<_> = {
                        let mut samples = self.samples.lock().await;
                        samples.add(sample);
                        let mut alarms = self.alarms.lock().await;
                        alarms
                            .iter_mut()
                            .filter_map(|alarm| alarm.check(&samples))
                            .collect()
                    };

                    for alert in alerts {
                        let event = Event::ResourceAlert { generation: self.generation, alert };
                        if self.events.send(Message::Event(event)).is_err() {
                            return;
                        }
                    }
                }
            }
        }

        debug!(generation = self.generation, "Resource sampler stopped");
    }
}
