// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource samples scraped from the runtime's metrics endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::log_store::cursor::now_millis;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One resource sample. Absent fields were not present in the scrape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch milliseconds of the scrape.
    pub ts: u64,
    /// CPU usage over the last interval, in percent of one core.
    #[serde(rename = "cpu", skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    /// Resident memory in MB.
    #[serde(rename = "ps", skip_serializing_if = "Option::is_none")]
    pub resident_memory_mb: Option<f64>,
    /// Heap used, in bytes.
    #[serde(rename = "hu", skip_serializing_if = "Option::is_none")]
    pub heap_used: Option<f64>,
    /// Heap total, in bytes.
    #[serde(rename = "hs", skip_serializing_if = "Option::is_none")]
    pub heap_total: Option<f64>,
    /// Mean event-loop lag, in seconds.
    #[serde(rename = "ela", skip_serializing_if = "Option::is_none")]
    pub event_loop_lag_mean: Option<f64>,
    /// p99 event-loop lag, in seconds.
    #[serde(rename = "el99", skip_serializing_if = "Option::is_none")]
    pub event_loop_lag_p99: Option<f64>,
    /// Scrape failure.
    #[serde(rename = "err", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Sample {
    /// A sample stamped with the current time and no metrics.
    pub fn empty() -> Self {
        Self {
            ts: now_millis(),
            ..Default::default()
        }
    }

    /// A sample recording a failed scrape.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty()
        }
    }
}

/// Turns cumulative CPU seconds into a percentage between scrapes.
#[derive(Debug, Default, Clone)]
pub struct CpuTracker {
    last_cpu_seconds: Option<f64>,
}

impl CpuTracker {
    /// Create a tracker with no previous reading.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cumulative reading; returns the usage since the previous one.
    pub fn observe(&mut self, cpu_seconds: f64, interval: Duration) -> Option<f64> {
        let previous = self.last_cpu_seconds.replace(cpu_seconds);
        let previous = previous?;
        let elapsed = interval.as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some(((cpu_seconds - previous) / elapsed * 100.0).max(0.0))
    }

    /// Forget the previous reading (new child process).
    pub fn reset(&mut self) {
        self.last_cpu_seconds = None;
    }
}

/// Build a sample from Prometheus text exposition format.
///
/// Heap-space series carry one value per heap space; those are summed.
pub fn parse_prometheus(text: &str, cpu: &mut CpuTracker, interval: Duration) -> Sample {
    let mut sample = Sample::empty();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, value)) = split_series(line) else {
            continue;
        };
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };

        match name {
            "process_resident_memory_bytes" => {
                sample.resident_memory_mb = Some(value / BYTES_PER_MB);
            }
            "process_cpu_seconds_total" => {
                sample.cpu_percent = cpu.observe(value, interval);
            }
            "nodejs_heap_space_size_used_bytes" => {
                sample.heap_used = Some(sample.heap_used.unwrap_or(0.0) + value);
            }
            "nodejs_heap_space_size_total_bytes" => {
                sample.heap_total = Some(sample.heap_total.unwrap_or(0.0) + value);
            }
            "nodejs_eventloop_lag_mean_seconds" => {
                sample.event_loop_lag_mean = Some(value);
            }
            "nodejs_eventloop_lag_p99_seconds" => {
                sample.event_loop_lag_p99 = Some(value);
            }
            _ => {}
        }
    }

    sample
}

/// Split `name{labels} value [timestamp]` into name and value.
fn split_series(line: &str) -> Option<(&str, &str)> {
    let (name, rest) = match line.find('{') {
        Some(open) => {
            let close = line[open..].find('}')? + open;
            (&line[..open], &line[close + 1..])
        }
        None => {
            let split = line.find(char::is_whitespace)?;
            (&line[..split], &line[split..])
        }
    };
    let value = rest.split_whitespace().next()?;
    Some((name.trim(), value))
}

/// Scrape `url` and build a sample. Failures yield a sample with `err` set.
pub async fn scrape(
    client: &reqwest::Client,
    url: &str,
    cpu: &mut CpuTracker,
    interval: Duration,
) -> Sample {
    let response = client
        .get(url)
        .header("pragma", "no-cache")
        .header("cache-control", "max-age=0, must-revalidate, no-cache")
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .and_then(|r| r.error_for_status());

    let body = match response {
        Ok(r) => r.text().await,
        Err(e) => Err(e),
    };

    match body {
        Ok(text) => parse_prometheus(&text, cpu, interval),
        Err(e) => {
            debug!(url = %url, error = %e, "Metrics scrape failed");
            Sample::failed(e.to_string())
        }
    }
}
