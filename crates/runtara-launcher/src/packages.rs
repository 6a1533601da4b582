// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Package reconciliation for the runtime's user directory.
//!
//! The declared packages are compared to the `dependencies` of the user
//! directory's `package.json`. On a mismatch the manifest is rewritten and the
//! package manager is run; if installation fails the previous manifest is put
//! back so the next attempt starts from the same point.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value, json};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Manifest file name.
pub const MANIFEST_FILE: &str = "package.json";

const BACKUP_FILE: &str = "package.json.bak";

/// Installs declared packages with an external package manager.
#[derive(Debug, Clone)]
pub struct PackageReconciler {
    package_manager: String,
}

impl Default for PackageReconciler {
    fn default() -> Self {
        Self::new("npm")
    }
}

impl PackageReconciler {
    /// Reconciler invoking `package_manager`.
    pub fn new(package_manager: impl Into<String>) -> Self {
        Self {
            package_manager: package_manager.into(),
        }
    }

    /// Bring the manifest in `user_dir` in line with `packages`.
    ///
    /// Returns whether an install was performed.
    pub async fn reconcile(
        &self,
        user_dir: &Path,
        packages: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let manifest_path = user_dir.join(MANIFEST_FILE);
        let manifest = read_manifest(&manifest_path)?;

        if current_dependencies(manifest.as_ref()) == *packages {
            debug!(path = %manifest_path.display(), "Packages already up to date");
            return Ok(false);
        }

        info!(
            packages = packages.len(),
            package_manager = %self.package_manager,
            "Installing runtime packages"
        );

        tokio::fs::create_dir_all(user_dir).await?;
        let backup_path = user_dir.join(BACKUP_FILE);
        if manifest.is_some() {
            tokio::fs::copy(&manifest_path, &backup_path).await?;
        }

        let updated = with_dependencies(manifest, packages);
        tokio::fs::write(&manifest_path, serde_json::to_string_pretty(&updated)?).await?;

        match self.install(user_dir).await {
            Ok(()) => {
                if let Err(e) = remove_if_exists(&backup_path).await {
                    warn!(path = %backup_path.display(), error = %e, "Failed to remove manifest backup");
                }
                Ok(true)
            }
            Err(reason) => {
                self.restore(&manifest_path, &backup_path).await;
                Err(Error::PackageInstall(reason))
            }
        }
    }

    async fn install(&self, user_dir: &Path) -> std::result::Result<(), String> {
        let output = Command::new(&self.package_manager)
            .args(["install", "--omit=dev", "--no-audit", "--no-fund"])
            .current_dir(user_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", self.package_manager, e))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        Err(format!(
            "{} install exited with {}: {}",
            self.package_manager,
            output.status,
            tail.into_iter().rev().collect::<Vec<_>>().join("\n")
        ))
    }

    async fn restore(&self, manifest_path: &Path, backup_path: &Path) {
        let result = if tokio::fs::try_exists(backup_path).await.unwrap_or(false) {
            tokio::fs::rename(backup_path, manifest_path).await
        } else {
            remove_if_exists(manifest_path).await
        };
        match result {
            Ok(()) => info!(path = %manifest_path.display(), "Restored previous package manifest"),
            Err(e) => warn!(path = %manifest_path.display(), error = %e, "Failed to restore package manifest"),
        }
    }
}

fn read_manifest(path: &Path) -> Result<Option<Value>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn current_dependencies(manifest: Option<&Value>) -> BTreeMap<String, String> {
    manifest
        .and_then(|m| m.get("dependencies"))
        .and_then(Value::as_object)
        .map(|deps| {
            deps.iter()
                .filter_map(|(name, version)| Some((name.clone(), version.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn with_dependencies(manifest: Option<Value>, packages: &BTreeMap<String, String>) -> Value {
    let mut manifest = match manifest {
        Some(Value::Object(fields)) => fields,
        _ => {
            let mut fields = Map::new();
            fields.insert("name".to_string(), json!("runtime-user"));
            fields.insert("version".to_string(), json!("0.0.1"));
            fields.insert("private".to_string(), json!(true));
            fields
        }
    };
    manifest.insert("dependencies".to_string(), json!(packages));
    Value::Object(manifest)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
