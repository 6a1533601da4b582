// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervisor lifecycle tests.
//!
//! Each test runs a small shell script as the runtime. Scripts append a line
//! to `$COUNT_FILE` on every launch so tests can count spawns and see whether
//! the runtime ran in safe mode.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;

use runtara_launcher::control_plane::MockControlPlane;
use runtara_launcher::error::Error;
use runtara_launcher::supervisor::{BootLoopConfig, Supervisor, SupervisorState, TargetState};

const WAIT: Duration = Duration::from_secs(10);

/// Records a launch, then exits cleanly.
const EXIT_CLEAN: &str = r#"echo "run ${NODE_RED_ENABLE_SAFE_MODE:-false}" >> "$COUNT_FILE"
exit 0"#;

/// Records a launch, then crashes.
const EXIT_CRASH: &str = r#"echo "run ${NODE_RED_ENABLE_SAFE_MODE:-false}" >> "$COUNT_FILE"
echo "boom" >&2
exit 1"#;

/// Records a launch, then runs until killed.
const RUN_FOREVER: &str = r#"echo "run ${NODE_RED_ENABLE_SAFE_MODE:-false}" >> "$COUNT_FILE"
while true; do sleep 0.1; done"#;

/// Records a launch and every SIGTERM it receives.
const RUN_UNTIL_TERM: &str = r#"trap 'echo term >> "$COUNT_FILE"; exit 0' TERM
echo "run ${NODE_RED_ENABLE_SAFE_MODE:-false}" >> "$COUNT_FILE"
while true; do sleep 0.1; done"#;

fn supervisor(instance: &TestInstance, control_plane: &Arc<MockControlPlane>) -> Supervisor {
    instance
        .builder(control_plane.clone())
        .build()
        .expect("Failed to build supervisor")
}

#[tokio::test]
async fn test_load_config_unauthorized_keeps_stopped() {
    let instance = TestInstance::new(EXIT_CLEAN);
    let control_plane = Arc::new(MockControlPlane::unauthorized());
    let supervisor = supervisor(&instance, &control_plane);

    let err = supervisor.load_config().await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(!supervisor.status().configured);
    assert_eq!(control_plane.fetch_count(), 1);
}

#[tokio::test]
async fn test_load_config_unavailable_keeps_stopped() {
    let instance = TestInstance::new(EXIT_CLEAN);
    let control_plane = Arc::new(MockControlPlane::unavailable());
    let supervisor = supervisor(&instance, &control_plane);

    let err = supervisor.load_config().await.unwrap_err();
    assert!(matches!(err, Error::ConfigUnavailable(_)));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_start_before_load_is_not_configured() {
    let instance = TestInstance::new(EXIT_CLEAN);
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = supervisor(&instance, &control_plane);

    let err = supervisor.start(None).await.unwrap_err();
    assert!(matches!(err, Error::NotConfigured));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(supervisor.last_start_time(), -1);
    assert!(instance.count_lines().is_empty());
}

#[tokio::test]
async fn test_load_config_writes_runtime_settings_file() {
    let instance = TestInstance::new(EXIT_CLEAN);
    let settings = instance.settings_with(json!({
        "state": "safe",
        "settings": {"theme": "dark"}
    }));
    let control_plane = Arc::new(MockControlPlane::new(settings));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(supervisor.target_state(), TargetState::Safe);
    assert!(supervisor.status().configured);

    let path = instance.root.join("userdata").join("settings.json");
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["port"], instance.port);
    assert_eq!(written["safeMode"], true);
    assert_eq!(written["settings"]["theme"], "dark");
}

#[tokio::test]
async fn test_target_stopped_does_not_spawn() {
    let instance = TestInstance::new(EXIT_CLEAN);
    let settings = instance.settings_with(json!({"state": "stopped"}));
    let control_plane = Arc::new(MockControlPlane::new(settings));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();

    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(!supervisor.is_healthy());
    assert!(instance.count_lines().is_empty());
}

#[tokio::test]
async fn test_clean_exit_stays_stopped() {
    let instance = TestInstance::new(EXIT_CLEAN);
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();
    assert!(supervisor.last_start_time() > 0);

    assert!(
        wait_for_status(&supervisor, WAIT, |s| {
            s.state == SupervisorState::Stopped && !s.child_attached
        })
        .await
    );
    let stopped = wait_for_audits(&control_plane, "stopped", 1, WAIT).await;
    assert_eq!(stopped.len(), 1);

    // No restart after a clean exit.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(instance.count_lines(), vec!["run false"]);
    assert!(control_plane.audits_named("crashed").await.is_empty());
    assert_eq!(supervisor.target_state(), TargetState::Running);
}

#[tokio::test]
async fn test_concurrent_stops_share_one_sigterm() {
    let instance = TestInstance::new(RUN_UNTIL_TERM);
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();
    assert!(wait_for(WAIT, || !instance.count_lines().is_empty()).await);

    let (a, b, c) = tokio::join!(supervisor.stop(), supervisor.stop(), supervisor.stop());
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(supervisor.target_state(), TargetState::Stopped);
    assert!(!supervisor.is_healthy());
    assert_eq!(instance.count_lines(), vec!["run false", "term"]);

    let stopped = wait_for_audits(&control_plane, "stopped", 1, WAIT).await;
    assert_eq!(stopped.len(), 1);
}

#[tokio::test]
async fn test_stop_without_child_is_immediate() {
    let instance = TestInstance::new(EXIT_CLEAN);
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(supervisor.target_state(), TargetState::Stopped);
}

#[tokio::test]
async fn test_boot_loop_enters_safe_mode_then_stops() {
    let instance = TestInstance::new(EXIT_CRASH);
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();

    assert!(
        wait_for_status(&supervisor, WAIT, |s| {
            s.target == TargetState::Stopped && s.state == SupervisorState::Stopped
        })
        .await
    );

    let runs = instance.count_lines();
    assert_eq!(runs.len(), 10);
    assert!(runs[..5].iter().all(|l| l == "run false"));
    assert!(runs[5..].iter().all(|l| l == "run true"));

    let crashed = wait_for_audits(&control_plane, "crashed", 10, WAIT).await;
    assert_eq!(crashed.len(), 10);
    let body = crashed[0].body.as_ref().unwrap();
    assert_eq!(body["code"], 1);
    assert!(body["signal"].is_null());
    let info = body["info"].as_array().unwrap();
    assert!(info.iter().any(|line| line["msg"] == "boom"));
}

#[tokio::test]
async fn test_custom_boot_loop_history() {
    let instance = TestInstance::new(EXIT_CRASH);
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = instance
        .builder(control_plane.clone())
        .boot_loop(BootLoopConfig {
            history: 2,
            ..Default::default()
        })
        .build()
        .unwrap();

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();

    assert!(
        wait_for_status(&supervisor, WAIT, |s| s.target == TargetState::Stopped).await
    );
    assert!(wait_for_state(&supervisor, SupervisorState::Stopped, WAIT).await);
    assert_eq!(
        instance.count_lines(),
        vec!["run false", "run false", "run true", "run true"]
    );
}

#[tokio::test]
async fn test_disabled_auto_safe_mode_keeps_restarting() {
    let instance = TestInstance::new(EXIT_CRASH);
    let settings = instance.settings_with(json!({"disableAutoSafeMode": true}));
    let control_plane = Arc::new(MockControlPlane::new(settings));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();

    assert!(wait_for(WAIT, || instance.count_lines().len() >= 12).await);
    supervisor.stop().await.unwrap();

    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(instance.count_lines().iter().all(|l| l == "run false"));
}

#[tokio::test]
async fn test_unresponsive_runtime_is_restarted() {
    // Nothing listens on the runtime port, so every probe fails.
    let instance = TestInstance::new(RUN_FOREVER);
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = instance
        .builder(control_plane.clone())
        .failure_thresholds(3, 2)
        .build()
        .unwrap();

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();

    assert!(wait_for(WAIT, || instance.count_lines().len() >= 2).await);
    supervisor.stop().await.unwrap();

    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    // A hang restart is not a crash and does not count towards a boot loop.
    assert!(control_plane.audits_named("crashed").await.is_empty());
    assert!(instance.count_lines().iter().all(|l| l == "run false"));
}

#[tokio::test]
async fn test_hang_restart_sends_one_sigterm() {
    // Nothing listens on the runtime port, so every probe fails. With three
    // probes 100ms apart the next hang cannot be declared for ~300ms after a
    // respawn, well after the replacement has recorded its launch.
    let instance = TestInstance::new(RUN_UNTIL_TERM);
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = instance
        .builder(control_plane.clone())
        .health_interval(Duration::from_millis(100))
        .failure_thresholds(3, 3)
        .build()
        .unwrap();

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();

    assert!(wait_for(WAIT, || instance.count_lines().len() >= 3).await);
    let lines = instance.count_lines();
    assert_eq!(lines[..3], ["run false", "term", "run false"]);
    supervisor.stop().await.unwrap();

    assert!(control_plane.audits_named("crashed").await.is_empty());
}

#[tokio::test]
async fn test_healthy_runtime_reaches_running() {
    let instance = TestInstance::new(RUN_FOREVER);
    let _endpoint = RuntimeEndpoint::start(instance.port).await;
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();
    assert!(wait_for_state(&supervisor, SupervisorState::Running, WAIT).await);
    assert!(supervisor.is_healthy());

    // A second start while running is a no-op.
    supervisor.start(Some(TargetState::Safe)).await.unwrap();
    assert_eq!(supervisor.target_state(), TargetState::Running);

    // Resource samples flow in while the runtime runs.
    let resources = supervisor.resources();
    let mut sampled = false;
    for _ in 0..250 {
        if !resources.lock().await.is_empty() {
            sampled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(sampled);
    let latest = resources.lock().await.last_x(1);
    assert_eq!(latest[0].resident_memory_mb, Some(128.0));

    supervisor.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let states = control_plane.reported_states().await;
    assert!(states.contains(&SupervisorState::Running));
    assert_eq!(states.last(), Some(&SupervisorState::Stopped));
}

#[tokio::test]
async fn test_restart_in_safe_mode() {
    let instance = TestInstance::new(RUN_FOREVER);
    let _endpoint = RuntimeEndpoint::start(instance.port).await;
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();
    assert!(wait_for_state(&supervisor, SupervisorState::Running, WAIT).await);

    supervisor.restart(true).await.unwrap();
    assert!(wait_for_state(&supervisor, SupervisorState::Safe, WAIT).await);
    assert_eq!(supervisor.target_state(), TargetState::Safe);
    assert_eq!(control_plane.fetch_count(), 2);
    assert_eq!(instance.count_lines(), vec!["run false", "run true"]);

    supervisor.shutdown().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_memory_pressure_raises_alert() {
    let instance = TestInstance::new(RUN_FOREVER);
    let _endpoint = RuntimeEndpoint::start(instance.port).await;
    // The endpoint reports 128 MB resident, above 75% of 150 MB.
    let settings = instance.settings_with(json!({"resources": {"memory": 150}}));
    let control_plane = Arc::new(MockControlPlane::new(settings));
    let supervisor = instance
        .builder(control_plane.clone())
        .resource_alarm(3, 0.75)
        .build()
        .unwrap();

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();

    let alerts = wait_for_audits(&control_plane, "resource.memory", 1, WAIT).await;
    assert_eq!(alerts.len(), 1);
    let body = alerts[0].body.as_ref().unwrap();
    assert_eq!(body["count"], 3);

    // Fires once while the pressure lasts.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(control_plane.audits_named("resource.memory").await.len(), 1);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_memory_alert_survives_restarts() {
    // Crashes after ~0.6s and gets restarted while memory stays high.
    let instance = TestInstance::new(
        r#"echo "run ${NODE_RED_ENABLE_SAFE_MODE:-false}" >> "$COUNT_FILE"
sleep 0.6
exit 1"#,
    );
    let _endpoint = RuntimeEndpoint::start(instance.port).await;
    let settings = instance.settings_with(json!({
        "disableAutoSafeMode": true,
        "resources": {"memory": 150}
    }));
    let control_plane = Arc::new(MockControlPlane::new(settings));
    let supervisor = instance
        .builder(control_plane.clone())
        .resource_alarm(3, 0.75)
        .build()
        .unwrap();

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();

    assert!(wait_for(WAIT, || instance.count_lines().len() >= 4).await);
    supervisor.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(control_plane.audits_named("crashed").await.len() >= 3);
    assert_eq!(control_plane.audits_named("resource.memory").await.len(), 1);
}

#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let instance = TestInstance::new(EXIT_CLEAN);
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = Supervisor::builder(instance.root.join("missing"), control_plane.clone())
        .build()
        .unwrap();

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();

    assert_eq!(supervisor.state(), SupervisorState::Crashed);
    assert!(!supervisor.is_healthy());
    let failed = wait_for_audits(&control_plane, "start-failed", 1, WAIT).await;
    assert_eq!(failed.len(), 1);
}

#[tokio::test]
async fn test_runtime_output_is_logged() {
    let instance = TestInstance::new(
        r#"echo '{"level":"warn","msg":"structured","flow":"f1"}'
echo plain
echo oops >&2
exit 0"#,
    );
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();
    let stopped = wait_for_audits(&control_plane, "stopped", 1, WAIT).await;
    assert_eq!(stopped.len(), 1);

    let records = supervisor.log().lock().await.to_vec();
    let find = |msg: &str| records.iter().find(|r| r.msg == msg).cloned();

    let structured = find("structured").unwrap();
    assert_eq!(structured.level, "warn");
    assert_eq!(structured.payload.unwrap()["flow"], "f1");
    assert_eq!(find("plain").unwrap().level, "info");
    assert_eq!(find("oops").unwrap().level, "error");
    assert!(records.iter().any(|r| r.level == "system"));
}

#[tokio::test]
async fn test_load_while_running_keeps_state() {
    let instance = TestInstance::new(RUN_FOREVER);
    let _endpoint = RuntimeEndpoint::start(instance.port).await;
    let control_plane = Arc::new(MockControlPlane::new(instance.settings()));
    let supervisor = supervisor(&instance, &control_plane);

    supervisor.load_config().await.unwrap();
    supervisor.start(None).await.unwrap();
    assert!(wait_for_state(&supervisor, SupervisorState::Running, WAIT).await);

    supervisor.load_config().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert_eq!(instance.count_lines().len(), 1);

    supervisor.stop().await.unwrap();
}
