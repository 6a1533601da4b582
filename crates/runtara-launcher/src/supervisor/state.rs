// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervisor lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervised runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    /// No process; nothing pending.
    Stopped,
    /// Fetching settings from the control plane.
    Loading,
    /// Reconciling packages and writing the runtime settings file.
    Installing,
    /// Process spawned, waiting for the first healthy probe.
    Starting,
    /// Process healthy in normal mode.
    Running,
    /// Process healthy in safe mode.
    Safe,
    /// Process exited unexpectedly.
    Crashed,
    /// Stop requested, waiting for the process to exit.
    Stopping,
}

impl SupervisorState {
    /// Whether this state is stable enough to report upstream.
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            SupervisorState::Stopped
                | SupervisorState::Running
                | SupervisorState::Safe
                | SupervisorState::Crashed
        )
    }

    /// Whether a process is up or coming up.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SupervisorState::Starting | SupervisorState::Running | SupervisorState::Safe
        )
    }

    /// String form used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Loading => "loading",
            SupervisorState::Installing => "installing",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Safe => "safe",
            SupervisorState::Crashed => "crashed",
            SupervisorState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// End state requested by the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    /// Keep the runtime up in normal mode.
    #[default]
    Running,
    /// Keep the runtime up in safe mode.
    Safe,
    /// Keep the runtime down.
    Stopped,
}

impl TargetState {
    /// State the supervisor settles in once the process is healthy.
    pub fn healthy_state(&self) -> SupervisorState {
        match self {
            TargetState::Safe => SupervisorState::Safe,
            _ => SupervisorState::Running,
        }
    }

    /// String form used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::Running => "running",
            TargetState::Safe => "safe",
            TargetState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitive_states() {
        let definitive: Vec<_> = [
            SupervisorState::Stopped,
            SupervisorState::Loading,
            SupervisorState::Installing,
            SupervisorState::Starting,
            SupervisorState::Running,
            SupervisorState::Safe,
            SupervisorState::Crashed,
            SupervisorState::Stopping,
        ]
        .into_iter()
        .filter(SupervisorState::is_definitive)
        .map(|s| s.to_string())
        .collect();
        assert_eq!(definitive, vec!["stopped", "running", "safe", "crashed"]);
    }

    #[test]
    fn test_target_state_serde() {
        let target: TargetState = serde_json::from_str("\"safe\"").unwrap();
        assert_eq!(target, TargetState::Safe);
        assert_eq!(target.healthy_state(), SupervisorState::Safe);
        assert_eq!(TargetState::default().healthy_state(), SupervisorState::Running);
    }
}
