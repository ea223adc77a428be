//! Required permission depends on platform and target API levels.

use crate::helpers::{spawn_gate, wait_status};
use sensor_gate::GateStatus;
use sensor_gate::config::GateConfig;
use sensor_gate::permissions::{ApiLevel, Permission};
use sensor_gate::sim::SimulatedPlatform;

async fn requested_for(platform: u32, target: u32, config: &GateConfig) -> Vec<Permission> {
    let sim = SimulatedPlatform::builder()
        .permissions_granted(false)
        .api_levels(ApiLevel(platform), ApiLevel(target))
        .build();
    let (gate, _events) = spawn_gate(&sim, config);

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;

    let requests = sim.permission_requests();
    assert_eq!(requests.len(), 1, "one round-trip for the whole set");
    requests.into_iter().next().unwrap()
}

#[tokio::test]
async fn modern_platform_and_target_request_fine_location() {
    let requested = requested_for(33, 33, &GateConfig::default()).await;
    assert_eq!(requested, vec![Permission::FineLocation]);
}

#[tokio::test]
async fn older_platform_or_target_request_coarse_location() {
    for (platform, target) in [(28, 33), (33, 28), (23, 23)] {
        let requested = requested_for(platform, target, &GateConfig::default()).await;
        assert_eq!(
            requested,
            vec![Permission::CoarseLocation],
            "platform {platform} target {target}"
        );
    }
}

#[tokio::test]
async fn threshold_comes_from_config() {
    let mut config = GateConfig::default();
    config.permissions.modern_api_level = 34;
    let requested = requested_for(33, 33, &config).await;
    assert_eq!(requested, vec![Permission::CoarseLocation]);
}

#[tokio::test]
async fn granted_coarse_is_not_enough_on_modern_platforms() {
    let sim = SimulatedPlatform::builder()
        .permissions_granted(false)
        .build();
    sim.set_permission_granted(Permission::CoarseLocation, true);
    let (gate, _events) = spawn_gate(&sim, &GateConfig::default());

    gate.on_became_active().unwrap();
    wait_status(&gate, GateStatus::Open).await;
    assert_eq!(sim.permission_requests(), vec![vec![Permission::FineLocation]]);
}
