// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control plane client.
//!
//! The control plane serves the runtime settings, receives audit events and
//! tracks the reported lifecycle state of each instance.

mod http;
mod mock;

pub use http::HttpControlPlane;
pub use mock::{AuditRecord, MockControlPlane};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::settings::LauncherSettings;
use crate::supervisor::state::SupervisorState;

/// Interface to the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the settings document for this instance.
    ///
    /// Fails with `Unauthorized` on a rejected token and `ConfigUnavailable`
    /// for any other failure.
    async fn fetch_settings(&self) -> Result<LauncherSettings>;

    /// Record an audit event. `body` fields are merged into the event.
    async fn post_audit_event(&self, event: &str, body: Option<Value>) -> Result<()>;

    /// Report a definitive lifecycle state.
    async fn report_state(&self, state: SupervisorState) -> Result<()>;
}
