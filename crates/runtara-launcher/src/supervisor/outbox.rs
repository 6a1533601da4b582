// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ordered delivery of audit events and state reports.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::state::SupervisorState;
use crate::control_plane::ControlPlane;

/// Message for the control plane.
#[derive(Debug, Clone)]
pub(crate) enum Outbound {
    Audit { event: String, body: Option<Value> },
    State(SupervisorState),
}

/// Deliver outbound messages one at a time, in submission order.
///
/// The task ends once every sender is dropped and the queue is empty.
pub(crate) fn spawn(
    control_plane: Arc<dyn ControlPlane>,
) -> (mpsc::UnboundedSender<Outbound>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                Outbound::Audit { event, body } => {
                    match control_plane.post_audit_event(&event, body).await {
                        Ok(()) => debug!(event = %event, "Audit event delivered"),
                        Err(e) => warn!(event = %event, error = %e, "Failed to deliver audit event"),
                    }
                }
                Outbound::State(state) => match control_plane.report_state(state).await {
                    Ok(()) => debug!(state = %state, "State reported"),
                    Err(e) => warn!(state = %state, error = %e, "Failed to report state"),
                },
            }
        }
    });
    (tx, handle)
}
