//! Gate behaviour driven by a TOML config file on disk.

use crate::helpers::{spawn_gate, wait_status};
use sensor_gate::config::{GateConfig, RecheckMode};
use sensor_gate::sim::SimulatedPlatform;
use sensor_gate::{GateStatus, PreconditionKind};
use std::time::Duration;

#[tokio::test]
async fn radio_prompt_budget_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[remediation]\nmax_radio_prompts = 1\nrecheck = \"resume_at_service\"\n",
    )
    .unwrap();

    let config = GateConfig::from_file(&path).unwrap();
    assert_eq!(config.remediation.recheck, RecheckMode::ResumeAtService);
    assert_eq!(config.stream.delivery_queue_capacity, 256);

    let sim = SimulatedPlatform::builder().radio_enabled(false).build();
    sim.script_radio_answers([false]);
    let (gate, _events) = spawn_gate(&sim, &config);

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Blocked(PreconditionKind::RadioPower)).await;
    assert_eq!(sim.radio_requests(), 1);
}

#[tokio::test]
async fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = GateConfig::default();
    config.remediation.prompt_timeout_secs = 45;
    config.stream.delivery_queue_capacity = 32;
    config.save_to_file(&path).unwrap();

    let loaded = GateConfig::from_file(&path).unwrap();
    assert_eq!(loaded.remediation.prompt_timeout(), Some(Duration::from_secs(45)));
    assert_eq!(loaded.stream.delivery_queue_capacity, 32);
}

#[test]
fn invalid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[stream]\ndelivery_queue_capacity = 0\n").unwrap();
    assert!(GateConfig::from_file(&path).is_err());
}

#[tokio::test(start_paused = true)]
async fn unanswered_prompt_times_out_and_blocks() {
    let mut config = GateConfig::default();
    config.remediation.prompt_timeout_secs = 5;
    let sim = SimulatedPlatform::builder().service_enabled(false).build();
    sim.hold_dialogs(true);
    let (gate, _events) = spawn_gate(&sim, &config);

    gate.on_became_active().unwrap();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(60),
        gate.wait_for(|s| s.status == GateStatus::Blocked(PreconditionKind::AuxiliaryService)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(snapshot.pending, None);
    assert_eq!(sim.settings_opened(), 0);
}
