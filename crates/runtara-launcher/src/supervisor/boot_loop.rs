// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Boot-loop detection.
//!
//! A runtime that keeps crashing soon after every start, or at a suspiciously
//! regular cadence, is considered to be in a boot loop. Detection looks at the
//! run durations of the most recent unexpected exits: once the history is
//! full, a loop is declared when the mean absolute deviation of the durations
//! is small or their mean is below the minimum viable runtime.

use std::collections::VecDeque;
use std::time::Duration;

use super::state::TargetState;

/// Boot-loop detection thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct BootLoopConfig {
    /// Number of run durations considered.
    pub history: usize,
    /// Mean run duration below which the runtime counts as looping.
    pub min_runtime: Duration,
    /// Mean absolute deviation below which exits count as a steady cadence.
    pub max_deviation: Duration,
}

impl Default for BootLoopConfig {
    fn default() -> Self {
        Self {
            history: 5,
            min_runtime: Duration::from_secs(30),
            max_deviation: Duration::from_secs(2),
        }
    }
}

/// What to do after an unexpected exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootLoopVerdict {
    /// No loop; start the runtime again.
    Restart,
    /// Loop detected in normal mode; restart in safe mode.
    EnterSafeMode,
    /// Loop detected in safe mode; stay down.
    Stop,
}

/// Bounded history of spawn times and run durations.
#[derive(Debug, Clone, Default)]
pub struct RestartHistory {
    start_times: VecDeque<u64>,
    run_durations: VecDeque<Duration>,
}

impl RestartHistory {
    /// Spawn times in epoch milliseconds, oldest first.
    pub fn start_times(&self) -> impl Iterator<Item = u64> + '_ {
        self.start_times.iter().copied()
    }

    /// Run durations of unexpected exits, oldest first.
    pub fn run_durations(&self) -> impl Iterator<Item = Duration> + '_ {
        self.run_durations.iter().copied()
    }

    fn clear(&mut self) {
        self.start_times.clear();
        self.run_durations.clear();
    }
}

fn push_capped<T>(list: &mut VecDeque<T>, value: T, cap: usize) {
    list.push_back(value);
    while list.len() > cap {
        list.pop_front();
    }
}

/// Classifies unexpected exits.
#[derive(Debug, Clone, Default)]
pub struct BootLoopDetector {
    config: BootLoopConfig,
    history: RestartHistory,
}

impl BootLoopDetector {
    /// Detector with the given thresholds.
    pub fn new(config: BootLoopConfig) -> Self {
        Self {
            config,
            history: RestartHistory::default(),
        }
    }

    /// Thresholds in use.
    pub fn config(&self) -> &BootLoopConfig {
        &self.config
    }

    /// Recorded history.
    pub fn history(&self) -> &RestartHistory {
        &self.history
    }

    /// Record a spawn at `millis`.
    pub fn record_start(&mut self, millis: u64) {
        push_capped(&mut self.history.start_times, millis, self.config.history.max(1));
    }

    /// Most recent spawn time.
    pub fn last_start(&self) -> Option<u64> {
        self.history.start_times.back().copied()
    }

    /// Record an unexpected exit after `run_duration` and decide what follows.
    pub fn record_exit(&mut self, run_duration: Duration, target: TargetState) -> BootLoopVerdict {
        let cap = self.config.history.max(1);
        push_capped(&mut self.history.run_durations, run_duration, cap);
        if self.history.run_durations.len() < cap {
            return BootLoopVerdict::Restart;
        }

        let millis: Vec<f64> = self
            .history
            .run_durations
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        let mean = millis.iter().sum::<f64>() / millis.len() as f64;
        let deviation = millis.iter().map(|d| (d - mean).abs()).sum::<f64>() / millis.len() as f64;

        let steady = deviation < self.config.max_deviation.as_secs_f64() * 1000.0;
        let short = mean < self.config.min_runtime.as_secs_f64() * 1000.0;
        if !steady && !short {
            return BootLoopVerdict::Restart;
        }

        self.history.clear();
        if target == TargetState::Safe {
            BootLoopVerdict::Stop
        } else {
            BootLoopVerdict::EnterSafeMode
        }
    }

    /// Forget everything recorded so far.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}
