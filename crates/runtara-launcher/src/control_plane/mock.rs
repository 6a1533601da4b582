// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock control plane for testing.
//!
//! Serves a fixed settings document and records every audit event and state
//! report it receives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::ControlPlane;
use crate::error::{Error, Result};
use crate::settings::LauncherSettings;
use crate::supervisor::state::SupervisorState;

/// An audit event received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    /// Event name.
    pub event: String,
    /// Event body.
    pub body: Option<Value>,
}

/// Recording control plane.
#[derive(Clone, Default)]
pub struct MockControlPlane {
    settings: Arc<Mutex<Option<LauncherSettings>>>,
    unauthorized: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
    audits: Arc<Mutex<Vec<AuditRecord>>>,
    states: Arc<Mutex<Vec<SupervisorState>>>,
}

impl MockControlPlane {
    /// Mock serving `settings`.
    pub fn new(settings: LauncherSettings) -> Self {
        Self {
            settings: Arc::new(Mutex::new(Some(settings))),
            ..Default::default()
        }
    }

    /// Mock with no settings; every fetch fails with `ConfigUnavailable`.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Mock rejecting every fetch with `Unauthorized`.
    pub fn unauthorized() -> Self {
        let mock = Self::default();
        mock.unauthorized.store(true, Ordering::SeqCst);
        mock
    }

    /// Replace the served settings.
    pub async fn set_settings(&self, settings: LauncherSettings) {
        *self.settings.lock().await = Some(settings);
    }

    /// Number of settings fetches so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Audit events received so far.
    pub async fn audits(&self) -> Vec<AuditRecord> {
        self.audits.lock().await.clone()
    }

    /// Audit events named `event` received so far.
    pub async fn audits_named(&self, event: &str) -> Vec<AuditRecord> {
        self.audits
            .lock()
            .await
            .iter()
            .filter(|a| a.event == event)
            .cloned()
            .collect()
    }

    /// State reports received so far.
    pub async fn reported_states(&self) -> Vec<SupervisorState> {
        self.states.lock().await.clone()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn fetch_settings(&self) -> Result<LauncherSettings> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(Error::Unauthorized);
        }
        self.settings
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::ConfigUnavailable("no settings configured".to_string()))
    }

    async fn post_audit_event(&self, event: &str, body: Option<Value>) -> Result<()> {
        self.audits.lock().await.push(AuditRecord {
            event: event.to_string(),
            body,
        });
        Ok(())
    }

    async fn report_state(&self, state: SupervisorState) -> Result<()> {
        self.states.lock().await.push(state);
        Ok(())
    }
}
