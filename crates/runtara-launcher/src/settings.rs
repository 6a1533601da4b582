// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime settings served by the control plane.
//!
//! [`LauncherSettings`] is the document returned by the settings endpoint.
//! The opaque `settings` object inside it is handed to the runtime as a typed
//! [`RuntimeSettingsFile`] serialized next to the runtime's user directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::supervisor::state::TargetState;

/// Health probe interval used when none (or a too small one) is configured.
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 7499;

/// Smallest health probe interval honoured.
pub const MIN_HEALTH_INTERVAL_MS: u64 = 1000;

/// Name of the runtime settings file inside the user directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Share of the memory limit handed to the runtime as its heap ceiling.
const HEAP_SHARE: f64 = 0.75;

/// Resource ceilings for the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU ceiling in percent of one core.
    #[serde(default)]
    pub cpu: Option<f64>,
    /// Memory ceiling in MB.
    #[serde(default)]
    pub memory: Option<f64>,
}

/// Settings document for one runtime instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherSettings {
    /// Root directory of the instance.
    pub root_dir: PathBuf,
    /// User directory, relative to `root_dir`.
    pub user_dir: String,
    /// Port the runtime listens on.
    pub port: u16,
    /// Extra environment for the runtime process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Desired end state; `running` when absent.
    #[serde(default)]
    pub state: Option<TargetState>,
    /// Health probe interval in milliseconds.
    #[serde(default)]
    pub health_check_interval: Option<u64>,
    /// Restart unconditionally instead of escalating boot loops to safe mode.
    #[serde(default)]
    pub disable_auto_safe_mode: bool,
    /// Resource ceilings.
    #[serde(default)]
    pub resources: ResourceLimits,
    /// Packages the runtime needs (name to version). Absent means leave the
    /// manifest alone.
    #[serde(default)]
    pub packages: Option<BTreeMap<String, String>>,
    /// Opaque settings for the runtime itself.
    #[serde(default)]
    pub settings: Value,
}

impl LauncherSettings {
    /// Absolute path of the runtime's user directory.
    pub fn user_path(&self) -> PathBuf {
        self.root_dir.join(&self.user_dir)
    }

    /// Effective health probe interval.
    pub fn health_interval(&self) -> Duration {
        resolve_health_interval(self.health_check_interval)
    }

    /// Target state requested by the document.
    pub fn target_state(&self) -> TargetState {
        self.state.unwrap_or_default()
    }

    /// Heap ceiling for the runtime in MB, derived from the memory limit.
    pub fn heap_ceiling_mb(&self) -> Option<u64> {
        self.resources
            .memory
            .filter(|m| *m > 0.0)
            .map(|m| (m * HEAP_SHARE).floor() as u64)
    }
}

/// Apply the floor rule to a configured health interval.
///
/// Values below one second are ignored in favour of the default.
pub fn resolve_health_interval(configured_ms: Option<u64>) -> Duration {
    match configured_ms {
        Some(ms) if ms >= MIN_HEALTH_INTERVAL_MS => Duration::from_millis(ms),
        _ => Duration::from_millis(DEFAULT_HEALTH_INTERVAL_MS),
    }
}

/// Settings file read by the runtime at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettingsFile {
    /// Listen port.
    pub port: u16,
    /// Absolute user directory.
    pub user_dir: PathBuf,
    /// Whether the launcher intends to start in safe mode.
    pub safe_mode: bool,
    /// Settings supplied by the control plane.
    pub settings: Value,
}

impl RuntimeSettingsFile {
    /// Build the file contents from a settings document.
    pub fn from_settings(settings: &LauncherSettings) -> Self {
        Self {
            port: settings.port,
            user_dir: settings.user_path(),
            safe_mode: settings.target_state() == TargetState::Safe,
            settings: settings.settings.clone(),
        }
    }

    /// Write the file into `dir`, returning its path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(SETTINGS_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        debug!(path = %path.display(), "Wrote runtime settings file");
        Ok(path)
    }
}
