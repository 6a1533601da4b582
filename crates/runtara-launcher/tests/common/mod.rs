// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for runtara-launcher tests.
//!
//! Provides stand-in runtimes (small shell scripts), a fake runtime HTTP
//! endpoint and helpers to build a supervisor against the mock control plane.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use runtara_launcher::control_plane::{AuditRecord, MockControlPlane};
use runtara_launcher::settings::LauncherSettings;
use runtara_launcher::supervisor::{
    Supervisor, SupervisorBuilder, SupervisorState, SupervisorStatus,
};

/// Prometheus text served by [`RuntimeEndpoint`] at `/ff/metrics`.
pub const METRICS: &str = "process_cpu_seconds_total 1.5\n\
process_resident_memory_bytes 134217728\n\
nodejs_eventloop_lag_mean_seconds 0.01\n\
nodejs_eventloop_lag_p99_seconds 0.02\n\
nodejs_heap_space_size_used_bytes{space=\"new\"} 1000\n\
nodejs_heap_space_size_total_bytes{space=\"new\"} 2000\n";

/// Scratch instance directory with a stand-in runtime.
pub struct TestInstance {
    pub root: PathBuf,
    pub port: u16,
    pub exec_path: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TestInstance {
    /// Create an instance whose runtime is a shell script with `body`.
    pub fn new(body: &str) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let exec_path = write_script(&root, "runtime.sh", body);
        Self {
            root,
            port: free_port(),
            exec_path,
            _temp_dir: temp_dir,
        }
    }

    /// Settings document for this instance.
    pub fn settings(&self) -> LauncherSettings {
        self.settings_with(json!({}))
    }

    /// Settings document with extra top-level fields.
    pub fn settings_with(&self, extra: serde_json::Value) -> LauncherSettings {
        let mut doc = json!({
            "rootDir": self.root,
            "userDir": "userdata",
            "port": self.port,
            "env": {"COUNT_FILE": self.root.join("count").display().to_string()},
        });
        if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                doc.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(doc).expect("valid settings document")
    }

    /// Path of the file scripts append to through `$COUNT_FILE`.
    pub fn count_file(&self) -> PathBuf {
        self.root.join("count")
    }

    /// Lines written to the count file.
    pub fn count_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.count_file())
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Supervisor builder for this instance with fast test timings.
    pub fn builder(&self, control_plane: Arc<MockControlPlane>) -> SupervisorBuilder {
        Supervisor::builder(self.exec_path.clone(), control_plane)
            .health_interval(Duration::from_millis(50))
            .sample_interval(Duration::from_millis(50))
            .stop_timeout(Duration::from_secs(2))
    }
}

/// Write an executable `/bin/sh` script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// A port nothing is listening on.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    listener.local_addr().unwrap().port()
}

/// Fake runtime HTTP endpoint answering health probes and metrics scrapes.
pub struct RuntimeEndpoint {
    task: JoinHandle<()>,
}

impl RuntimeEndpoint {
    /// Serve `200 OK` on `port`.
    pub async fn start(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("Failed to bind runtime endpoint");
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let body = if request.starts_with("GET /ff/metrics") {
                        METRICS
                    } else {
                        "ok"
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Self { task }
    }
}

impl Drop for RuntimeEndpoint {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until the supervisor status satisfies `predicate`.
pub async fn wait_for_status<F>(supervisor: &Supervisor, timeout: Duration, predicate: F) -> bool
where
    F: FnMut(&SupervisorStatus) -> bool,
{
    let mut status = supervisor.subscribe();
    tokio::time::timeout(timeout, status.wait_for(predicate))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

/// Wait until the supervisor reaches `state`.
pub async fn wait_for_state(
    supervisor: &Supervisor,
    state: SupervisorState,
    timeout: Duration,
) -> bool {
    wait_for_status(supervisor, timeout, |s| s.state == state).await
}

/// Wait until the mock has received at least `count` audit events named `event`.
pub async fn wait_for_audits(
    control_plane: &MockControlPlane,
    event: &str,
    count: usize,
    timeout: Duration,
) -> Vec<AuditRecord> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let audits = control_plane.audits_named(event).await;
        if audits.len() >= count || tokio::time::Instant::now() >= deadline {
            return audits;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
