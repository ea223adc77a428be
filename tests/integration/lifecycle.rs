//! Lifecycle re-entry, teardown, and stale prompt handling.

use crate::helpers::{settle, spawn_gate, wait_status};
use sensor_gate::config::GateConfig;
use sensor_gate::platform::LOCATION_MODE_CHANGED;
use sensor_gate::sim::SimulatedPlatform;
use sensor_gate::{GateStatus, PreconditionKind, PreconditionState};

#[tokio::test]
async fn repeated_active_signals_keep_one_subscription() {
    let sim = SimulatedPlatform::builder().build();
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());

    for _ in 0..3 {
        gate.on_became_active().unwrap();
    }
    wait_status(&gate, GateStatus::Open).await;
    settle().await;

    assert_eq!(sim.subscribe_calls(), 1);
    assert_eq!(sim.unsubscribe_calls(), 0);
}

#[tokio::test]
async fn inactive_then_active_reopens_fresh_subscription() {
    let sim = SimulatedPlatform::builder().build();
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;

    gate.on_became_inactive().await.unwrap();
    assert!(!sim.has_live_subscription());
    assert_eq!(gate.snapshot().radio, PreconditionState::Unknown);

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;
    assert_eq!(sim.subscribe_calls(), 2);
    assert_eq!(sim.unsubscribe_calls(), 1);
}

#[tokio::test]
async fn inactive_without_active_is_noop() {
    let sim = SimulatedPlatform::builder().build();
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_inactive().await.unwrap();
    gate.on_became_inactive().await.unwrap();

    assert_eq!(sim.unsubscribe_calls(), 0);
    assert_eq!(gate.snapshot().status, GateStatus::Idle);
    assert!(!gate.snapshot().lifecycle_active);
}

#[tokio::test]
async fn notifications_while_inactive_are_ignored() {
    let sim = SimulatedPlatform::builder().service_enabled(false).build();
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());

    sim.broadcast(LOCATION_MODE_CHANGED);
    sim.set_service_enabled(false);
    settle().await;

    assert_eq!(sim.prompt_count(), 0);
    assert_eq!(gate.snapshot().status, GateStatus::Idle);
}

#[tokio::test]
async fn prompt_abandoned_by_inactive_is_not_applied() {
    let sim = SimulatedPlatform::builder().service_enabled(false).build();
    sim.hold_dialogs(true);
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(
        &gate,
        GateStatus::AwaitingUser(PreconditionKind::AuxiliaryService),
    )
    .await;
    gate.on_became_inactive().await.unwrap();
    sim.release_dialogs();
    settle().await;

    assert_eq!(sim.settings_opened(), 0);
    assert_eq!(gate.snapshot().pending, None);

    sim.set_service_enabled(true);
    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;
    assert_eq!(sim.subscribe_calls(), 1);
}

#[tokio::test]
async fn shutdown_deregisters_monitor_exactly_once() {
    let sim = SimulatedPlatform::builder().build();
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());
    assert_eq!(sim.registered_callbacks(), 1);

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;
    gate.shutdown().await.unwrap();
    drop(gate);
    settle().await;

    assert_eq!(sim.unregister_calls(), 1);
    assert_eq!(sim.registered_callbacks(), 0);
    assert_eq!(sim.unsubscribe_calls(), 1);
}

#[tokio::test]
async fn dropping_last_handle_shuts_gate_down() {
    let sim = SimulatedPlatform::builder().build();
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());
    let observer = gate.watch();

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;
    drop(gate);

    crate::helpers::eventually(|| observer.borrow().status == GateStatus::ShutDown).await;
    assert_eq!(sim.registered_callbacks(), 0);
    assert!(!sim.has_live_subscription());
}

#[tokio::test]
async fn inactive_during_dialog_releases_the_prompt() {
    let sim = SimulatedPlatform::builder().service_enabled(false).build();
    sim.hold_dialogs(true);
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(
        &gate,
        GateStatus::AwaitingUser(PreconditionKind::AuxiliaryService),
    )
    .await;
    assert_eq!(sim.prompts_in_flight(), 1);

    gate.on_became_inactive().await.unwrap();
    crate::helpers::eventually(|| sim.prompts_in_flight() == 0).await;

    gate.on_became_active().unwrap();
    crate::helpers::eventually(|| sim.dialogs_shown().len() == 2).await;
    assert_eq!(sim.max_concurrent_prompts(), 1);
}

#[tokio::test]
async fn lost_subscription_recovers_on_next_notification() {
    let sim = SimulatedPlatform::builder().build();
    let (gate, mut events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;

    sim.end_subscription();
    wait_status(&gate, GateStatus::StreamFailed).await;
    assert!(!gate.snapshot().stream_active);

    sim.broadcast(LOCATION_MODE_CHANGED);
    wait_status(&gate, GateStatus::Open).await;
    assert_eq!(sim.subscribe_calls(), 2);

    assert!(sim.push_event(crate::helpers::reading(7)));
    let event = tokio::time::timeout(crate::helpers::WAIT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(crate::helpers::sequence_of(&event), Some(7));
}
