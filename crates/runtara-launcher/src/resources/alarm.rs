// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rate-limited resource pressure alarms.
//!
//! An alarm fires once when the rolling average crosses the threshold, stays
//! quiet while the average remains over it, and re-arms only after the
//! average has stayed under the threshold for a full window of samples.

use serde::Serialize;
use serde_json::json;

use super::sample_ring::SampleRing;

/// Default number of samples averaged.
pub const DEFAULT_WINDOW: usize = 30;

/// Default fraction of the limit that counts as pressure.
pub const DEFAULT_RATIO: f64 = 0.75;

/// Resource watched by an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// CPU percent.
    Cpu,
    /// Resident memory in MB.
    Memory,
}

impl ResourceKind {
    /// Audit event name.
    pub fn event(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "resource.cpu",
            ResourceKind::Memory => "resource.memory",
        }
    }
}

/// Raised when an alarm fires.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAlert {
    /// Resource under pressure.
    pub kind: ResourceKind,
    /// Rolling average that crossed the threshold.
    pub average: f64,
    /// Configured limit.
    pub limit: f64,
    /// Threshold derived from the limit.
    pub threshold: f64,
    /// Samples in the window.
    pub count: usize,
}

impl ResourceAlert {
    /// Audit event name.
    pub fn event(&self) -> &'static str {
        self.kind.event()
    }

    /// Audit event body.
    pub fn body(&self) -> serde_json::Value {
        json!({
            "resource": self.kind,
            "average": self.average,
            "limit": self.limit,
            "threshold": self.threshold,
            "count": self.count,
        })
    }
}

/// Threshold alarm over a rolling window of samples.
#[derive(Debug, Clone)]
pub struct ResourceAlarm {
    kind: ResourceKind,
    limit: f64,
    ratio: f64,
    window: usize,
    armed: bool,
    under_count: usize,
}

impl ResourceAlarm {
    /// Alarm with the default window and ratio.
    pub fn new(kind: ResourceKind, limit: f64) -> Self {
        Self::with_window(kind, limit, DEFAULT_WINDOW, DEFAULT_RATIO)
    }

    /// Alarm with explicit window length and ratio.
    pub fn with_window(kind: ResourceKind, limit: f64, window: usize, ratio: f64) -> Self {
        Self {
            kind,
            limit,
            ratio,
            window: window.max(1),
            armed: true,
            under_count: 0,
        }
    }

    /// Value above which the average counts as pressure.
    pub fn threshold(&self) -> f64 {
        self.limit * self.ratio
    }

    /// Whether the next crossing would fire.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Evaluate the latest window; returns an alert when the alarm fires.
    pub fn check(&mut self, samples: &SampleRing) -> Option<ResourceAlert> {
        if samples.len() < self.window {
            return None;
        }
        let avg = samples.avg_last_x(self.window);
        let average = match self.kind {
            ResourceKind::Cpu => avg.cpu_percent,
            ResourceKind::Memory => avg.resident_memory_mb,
        }?;
        let over = average > self.threshold();

        if self.armed {
            if over {
                self.armed = false;
                self.under_count = 0;
                return Some(ResourceAlert {
                    kind: self.kind,
                    average,
                    limit: self.limit,
                    threshold: self.threshold(),
                    count: avg.count,
                });
            }
        } else if over {
            self.under_count = 0;
        } else {
            self.under_count += 1;
            if self.under_count >= self.window {
                self.armed = true;
                self.under_count = 0;
            }
        }
        None
    }
}
