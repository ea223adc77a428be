//! Missing radio hardware is terminal: the gate never prompts.

use crate::helpers::{settle, spawn_gate, wait_status};
use sensor_gate::GateStatus;
use sensor_gate::config::GateConfig;
use sensor_gate::platform::LOCATION_MODE_CHANGED;
use sensor_gate::sim::SimulatedPlatform;

#[tokio::test]
async fn no_hardware_never_prompts() {
    let sim = SimulatedPlatform::builder()
        .hardware_present(false)
        .radio_enabled(false)
        .permissions_granted(false)
        .service_enabled(false)
        .build();
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::NoHardware).await;

    gate.evaluate().unwrap();
    gate.retry().unwrap();
    sim.broadcast(LOCATION_MODE_CHANGED);
    sim.set_service_enabled(true);
    settle().await;

    assert_eq!(sim.prompt_count(), 0);
    assert_eq!(sim.subscribe_calls(), 0);
    assert_eq!(gate.snapshot().status, GateStatus::NoHardware);
}

#[tokio::test]
async fn no_hardware_survives_lifecycle_reentry() {
    let sim = SimulatedPlatform::builder().hardware_present(false).build();
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::NoHardware).await;
    gate.on_became_inactive().await.unwrap();
    gate.on_became_active().unwrap();
    settle().await;

    let snapshot = gate.snapshot();
    assert_eq!(snapshot.status, GateStatus::NoHardware);
    assert!(!snapshot.stream_active);
    assert_eq!(sim.prompt_count(), 0);
    assert_eq!(sim.subscribe_calls(), 0);
}
