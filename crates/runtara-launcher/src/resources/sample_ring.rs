// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ring of recent resource samples with windowed averages.

use serde::Serialize;

use super::sample::Sample;
use crate::ring::RingBuffer;

/// Default number of samples kept.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Mean of the fields present across the last samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleAverage {
    /// Number of samples that contributed.
    pub count: usize,
    /// Mean CPU percent.
    #[serde(rename = "cpu", skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    /// Mean resident memory in MB.
    #[serde(rename = "ps", skip_serializing_if = "Option::is_none")]
    pub resident_memory_mb: Option<f64>,
    /// Mean heap used.
    #[serde(rename = "hu", skip_serializing_if = "Option::is_none")]
    pub heap_used: Option<f64>,
    /// Mean heap total.
    #[serde(rename = "hs", skip_serializing_if = "Option::is_none")]
    pub heap_total: Option<f64>,
    /// Mean event-loop lag.
    #[serde(rename = "ela", skip_serializing_if = "Option::is_none")]
    pub event_loop_lag_mean: Option<f64>,
    /// Mean p99 event-loop lag.
    #[serde(rename = "el99", skip_serializing_if = "Option::is_none")]
    pub event_loop_lag_p99: Option<f64>,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

/// Fixed-capacity ring of resource samples.
#[derive(Debug, Clone)]
pub struct SampleRing {
    ring: RingBuffer<Sample>,
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SampleRing {
    /// Create a ring holding `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
        }
    }

    /// Store a sample.
    pub fn add(&mut self, sample: Sample) {
        self.ring.push(sample);
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// All samples, oldest first.
    pub fn to_vec(&self) -> Vec<Sample> {
        self.ring.to_vec()
    }

    /// The most recent `n` samples, oldest first.
    pub fn last_x(&self, n: usize) -> Vec<Sample> {
        self.ring.last_n(n)
    }

    /// Average the most recent `n` samples field by field.
    pub fn avg_last_x(&self, n: usize) -> SampleAverage {
        let samples = self.last_x(n);
        let mut cpu = Mean::default();
        let mut ps = Mean::default();
        let mut hu = Mean::default();
        let mut hs = Mean::default();
        let mut ela = Mean::default();
        let mut el99 = Mean::default();
        for sample in &samples {
            cpu.push(sample.cpu_percent);
            ps.push(sample.resident_memory_mb);
            hu.push(sample.heap_used);
            hs.push(sample.heap_total);
            ela.push(sample.event_loop_lag_mean);
            el99.push(sample.event_loop_lag_p99);
        }
        SampleAverage {
            count: samples.len(),
            cpu_percent: cpu.get(),
            resident_memory_mb: ps.get(),
            heap_used: hu.get(),
            heap_total: hs.get(),
            event_loop_lag_mean: ela.get(),
            event_loop_lag_p99: el99.get(),
        }
    }
}
