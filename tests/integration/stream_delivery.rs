//! Events flow to the consumer in order while open and never after close.

use crate::helpers::{WAIT, reading, sequence_of, settle, spawn_gate, wait_status};
use sensor_gate::GateStatus;
use sensor_gate::config::GateConfig;
use sensor_gate::events::DomainEvent;
use sensor_gate::sim::SimulatedPlatform;

#[tokio::test]
async fn events_reach_consumer_in_order() {
    let sim = SimulatedPlatform::builder().build();
    let (gate, mut events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;

    for seq in 0..500 {
        assert!(sim.push_event(reading(seq)));
    }
    for seq in 0..500 {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("event within timeout")
            .expect("consumer channel open");
        assert_eq!(sequence_of(&event), Some(seq));
    }
}

#[tokio::test]
async fn disconnects_are_forwarded_like_any_event() {
    let sim = SimulatedPlatform::builder().build();
    let (gate, mut events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;

    let disconnect = DomainEvent::Disconnected {
        peripheral: "C4:7C:8D:00:11:22".to_owned(),
        reason: "link lost".to_owned(),
    };
    assert!(sim.push_event(disconnect.clone()));
    let received = tokio::time::timeout(WAIT, events.recv()).await.unwrap();
    assert_eq!(received, Some(disconnect));
    assert_eq!(gate.snapshot().status, GateStatus::Open);
}

#[tokio::test]
async fn nothing_is_delivered_after_inactive_returns() {
    let sim = SimulatedPlatform::builder().build();
    let (gate, mut events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;

    for seq in 0..200 {
        sim.push_event(reading(seq));
    }
    gate.on_became_inactive().await.unwrap();

    let mut delivered = Vec::new();
    while let Ok(event) = events.try_recv() {
        delivered.push(sequence_of(&event).unwrap());
    }
    let expected: Vec<u32> = (0..delivered.len() as u32).collect();
    assert_eq!(delivered, expected, "delivered prefix stays ordered");

    assert!(!sim.push_event(reading(999)));
    settle().await;
    assert!(events.try_recv().is_err());
}
