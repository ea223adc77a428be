//! Shared helpers for integration tests.

use sensor_gate::events::{DomainEvent, Measurement, MeasurementUnit};
use sensor_gate::sim::SimulatedPlatform;
use sensor_gate::{CapabilityGate, GateConfig, GateHandle, GateSnapshot, GateStatus};
use std::time::Duration;
use tokio::sync::mpsc;

/// Upper bound for any single wait in these tests.
pub(crate) const WAIT: Duration = Duration::from_secs(2);

/// Spawn a gate over `sim` whose consumer forwards every event to the returned receiver.
pub(crate) fn spawn_gate(
    sim: &SimulatedPlatform,
    config: &GateConfig,
) -> (GateHandle, mpsc::UnboundedReceiver<DomainEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let gate = CapabilityGate::spawn(
        sim.collaborators(),
        move |event: DomainEvent| {
            let _ = tx.send(event);
        },
        config,
    )
    .expect("spawn gate");
    (gate, rx)
}

/// Wait until the gate publishes `status`.
pub(crate) async fn wait_status(gate: &GateHandle, status: GateStatus) -> GateSnapshot {
    tokio::time::timeout(WAIT, gate.wait_for(|s| s.status == status))
        .await
        .unwrap_or_else(|_| panic!("gate did not reach {status:?}; last: {:?}", gate.snapshot()))
        .expect("gate still running")
}

/// Let queued commands and spawned prompts run to quiescence.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub(crate) fn reading(sequence: u32) -> DomainEvent {
    DomainEvent::Measurement(Measurement {
        peripheral: "C4:7C:8D:00:11:22".to_owned(),
        value: 90.0 + f64::from(sequence % 40),
        unit: MeasurementUnit::MgPerDl,
        sequence: Some(sequence),
        timestamp: chrono::Utc::now(),
    })
}

pub(crate) fn sequence_of(event: &DomainEvent) -> Option<u32> {
    match event {
        DomainEvent::Measurement(m) => m.sequence,
        DomainEvent::Disconnected { .. } => None,
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition met within timeout");
}
