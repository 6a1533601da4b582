// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP control plane client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use super::ControlPlane;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::log_store::cursor::now_millis;
use crate::settings::LauncherSettings;
use crate::supervisor::state::SupervisorState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Control plane reached over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    token: String,
}

impl HttpControlPlane {
    /// Create a client for `project_id` at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("runtara-launcher/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            token: token.into(),
        })
    }

    /// Create a client from launcher configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.control_plane_url.clone(),
            config.project_id.clone(),
            config.token.clone(),
        )
    }

    fn settings_url(&self) -> String {
        format!("{}/api/v1/projects/{}/settings", self.base_url, self.project_id)
    }

    fn audit_url(&self) -> String {
        format!("{}/logging/{}/audit", self.base_url, self.project_id)
    }

    fn state_url(&self) -> String {
        format!(
            "{}/api/v1/projects/{}/update-state",
            self.base_url, self.project_id
        )
    }
}

/// Merge `body` fields into the `{timestamp, event}` envelope.
fn audit_payload(event: &str, body: Option<Value>, timestamp: u64) -> Value {
    let mut payload = Map::new();
    payload.insert("timestamp".to_string(), json!(timestamp));
    payload.insert("event".to_string(), json!(event));
    match body {
        Some(Value::Object(fields)) => {
            for (key, value) in fields {
                if key != "timestamp" && key != "event" {
                    payload.insert(key, value);
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            payload.insert("body".to_string(), other);
        }
    }
    Value::Object(payload)
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    #[instrument(skip(self), fields(project_id = %self.project_id))]
    async fn fetch_settings(&self) -> Result<LauncherSettings> {
        let response = self
            .client
            .get(self.settings_url())
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::ConfigUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(Error::Unauthorized),
            status if !status.is_success() => {
                return Err(Error::ConfigUnavailable(format!(
                    "settings request returned {}",
                    status
                )));
            }
            _ => {}
        }

        let settings = response
            .json::<LauncherSettings>()
            .await
            .map_err(|e| Error::ConfigUnavailable(format!("invalid settings document: {}", e)))?;
        debug!(port = settings.port, "Fetched runtime settings");
        Ok(settings)
    }

    async fn post_audit_event(&self, event: &str, body: Option<Value>) -> Result<()> {
        let payload = audit_payload(event, body, now_millis());
        self.client
            .post(self.audit_url())
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn report_state(&self, state: SupervisorState) -> Result<()> {
        let response = self
            .client
            .post(self.state_url())
            .bearer_auth(&self.token)
            .json(&json!({ "state": state }))
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }
        response.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let cp = HttpControlPlane::new("https://cp.example.com/", "p1", "t").unwrap();
        assert_eq!(
            cp.settings_url(),
            "https://cp.example.com/api/v1/projects/p1/settings"
        );
        assert_eq!(cp.audit_url(), "https://cp.example.com/logging/p1/audit");
        assert_eq!(
            cp.state_url(),
            "https://cp.example.com/api/v1/projects/p1/update-state"
        );
    }

    #[test]
    fn test_audit_payload_merges_body() {
        let payload = audit_payload("crashed", Some(json!({"code": 1, "event": "x"})), 42);
        assert_eq!(payload, json!({"timestamp": 42, "event": "crashed", "code": 1}));

        let bare = audit_payload("stopped", None, 7);
        assert_eq!(bare, json!({"timestamp": 7, "event": "stopped"}));

        let scalar = audit_payload("start-failed", Some(json!("boom")), 7);
        assert_eq!(scalar["body"], "boom");
    }
}
