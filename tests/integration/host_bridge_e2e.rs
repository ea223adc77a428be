//! End-to-end host bridge over an in-memory duplex pipe.

use crate::helpers::WAIT;
use sensor_gate::config::GateConfig;
use sensor_gate::host::stdio::run_bridge;
use sensor_gate::platform::PeripheralInfo;
use sensor_gate::sim::SimulatedPlatform;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

struct HostSession {
    writer: WriteHalf<DuplexStream>,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    bridge: JoinHandle<sensor_gate::Result<()>>,
}

impl HostSession {
    fn start(platform: SimulatedPlatform) -> Self {
        let (host_io, bridge_io) = tokio::io::duplex(64 * 1024);
        let (bridge_r, bridge_w) = tokio::io::split(bridge_io);
        let bridge = tokio::spawn(async move {
            run_bridge(
                BufReader::new(bridge_r),
                bridge_w,
                platform,
                &GateConfig::default(),
            )
            .await
        });
        let (host_r, writer) = tokio::io::split(host_io);
        Self {
            writer,
            lines: BufReader::new(host_r).lines(),
            bridge,
        }
    }

    async fn send(&mut self, request_id: &str, command: &str, payload: Value) {
        let line = json!({
            "v": 1,
            "request_id": request_id,
            "command": command,
            "payload": payload,
        })
        .to_string();
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Read lines until one satisfies `predicate`.
    async fn next_matching(&mut self, mut predicate: impl FnMut(&Value) -> bool) -> Value {
        tokio::time::timeout(WAIT, async {
            loop {
                let line = self
                    .lines
                    .next_line()
                    .await
                    .unwrap()
                    .expect("bridge output open");
                let value: Value = serde_json::from_str(&line).unwrap();
                if predicate(&value) {
                    return value;
                }
            }
        })
        .await
        .expect("matching line within timeout")
    }

    async fn response(&mut self, request_id: &str) -> Value {
        self.next_matching(|v| v["request_id"] == request_id).await
    }

    async fn event(&mut self, name: &str, mut predicate: impl FnMut(&Value) -> bool) -> Value {
        self.next_matching(|v| v["event"] == name && predicate(&v["payload"]))
            .await
    }
}

#[tokio::test]
async fn host_drives_gate_open_and_receives_stream_events() {
    let platform = SimulatedPlatform::builder()
        .peripheral(PeripheralInfo {
            address: "C4:7C:8D:00:11:22".to_owned(),
            name: Some("Sensor".to_owned()),
            rssi: Some(-58),
        })
        .build();
    let mut host = HostSession::start(platform);

    host.send("r1", "host.ping", json!({})).await;
    assert_eq!(host.response("r1").await["payload"]["pong"], true);

    host.send("r2", "lifecycle.active", json!({})).await;
    let event = host
        .event("gate.status_changed", |p| p["status"]["state"] == "open")
        .await;
    assert_eq!(event["payload"]["stream_active"], true);
    assert_eq!(event["v"], 1);

    host.send(
        "r3",
        "stream.push",
        json!({"peripheral": "C4:7C:8D:00:11:22", "value": 6.1, "unit": "mmol_per_l", "sequence": 12}),
    )
    .await;
    let event = host.event("stream.event", |_| true).await;
    assert_eq!(event["payload"]["type"], "measurement");
    assert_eq!(event["payload"]["sequence"], 12);
    assert_eq!(event["payload"]["unit"], "mmol_per_l");

    host.send("r4", "peripheral.get", json!({"address": "C4:7C:8D:00:11:22"}))
        .await;
    let resp = host.response("r4").await;
    assert_eq!(resp["payload"]["peripheral"]["rssi"], -58);

    host.send("r5", "gate.status", json!({})).await;
    let resp = host.response("r5").await;
    assert_eq!(resp["payload"]["radio"], "satisfied");

    host.send("r6", "runtime.stop", json!({})).await;
    let resp = host.response("r6").await;
    assert_eq!(resp["ok"], true);

    let result = tokio::time::timeout(WAIT, host.bridge).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn service_toggle_from_host_reaches_gate() {
    let platform = SimulatedPlatform::builder().build();
    let mut host = HostSession::start(platform.clone());

    host.send("r1", "lifecycle.active", json!({})).await;
    host.event("gate.status_changed", |p| p["status"]["state"] == "open")
        .await;

    host.send("r2", "platform.set", json!({"service_enabled": false}))
        .await;
    let requested = host
        .event("remediation.requested", |p| p["kind"] == "dialog")
        .await;
    assert_eq!(
        requested["payload"]["detail"]["title"],
        "Location services are not enabled"
    );
    let remediation_id = requested["payload"]["request_id"].clone();

    host.send(
        "r3",
        "remediation.respond",
        json!({"request_id": remediation_id, "choice": "confirm"}),
    )
    .await;
    host.event("settings.open_requested", |_| true).await;
    let event = host
        .event("gate.status_changed", |p| {
            p["status"]["state"] == "awaiting_service_change"
        })
        .await;
    assert_eq!(event["payload"]["stream_active"], false);

    host.send("r4", "platform.set", json!({"service_enabled": true}))
        .await;
    host.event("gate.status_changed", |p| p["status"]["state"] == "open")
        .await;
    assert_eq!(platform.subscribe_calls(), 2);
    assert_eq!(platform.prompt_count(), 0, "simulated prompts never run");
}

#[tokio::test]
async fn host_declines_remediation_and_gate_blocks() {
    let platform = SimulatedPlatform::builder().permissions_granted(false).build();
    let mut host = HostSession::start(platform);

    host.send("r1", "lifecycle.active", json!({})).await;
    let requested = host
        .event("remediation.requested", |p| p["kind"] == "grant_permissions")
        .await;
    assert_eq!(requested["payload"]["detail"]["permissions"][0], "fine_location");
    host.send(
        "r2",
        "remediation.respond",
        json!({"request_id": requested["payload"]["request_id"], "granted": false}),
    )
    .await;

    let retry = host
        .event("remediation.requested", |p| p["kind"] == "dialog")
        .await;
    host.send(
        "r3",
        "remediation.respond",
        json!({"request_id": retry["payload"]["request_id"], "choice": "dismissed"}),
    )
    .await;
    host.event("gate.status_changed", |p| {
        p["status"]["state"] == "blocked" && p["status"]["precondition"] == "permissions"
    })
    .await;

    host.send(
        "r4",
        "remediation.respond",
        json!({"request_id": retry["payload"]["request_id"], "choice": "confirm"}),
    )
    .await;
    let resp = host.response("r4").await;
    assert_eq!(resp["ok"], false);
    assert!(resp["error"].as_str().unwrap().contains("no pending request"));
}

#[tokio::test]
async fn going_inactive_cancels_outstanding_remediation() {
    let platform = SimulatedPlatform::builder().radio_enabled(false).build();
    let mut host = HostSession::start(platform);

    host.send("r1", "lifecycle.active", json!({})).await;
    let requested = host
        .event("remediation.requested", |p| p["kind"] == "enable_radio")
        .await;

    host.send("r2", "lifecycle.inactive", json!({})).await;
    let cancelled = host.event("remediation.cancelled", |_| true).await;
    assert_eq!(
        cancelled["payload"]["request_id"],
        requested["payload"]["request_id"]
    );
}

#[tokio::test]
async fn malformed_and_invalid_commands_get_error_responses() {
    let mut host = HostSession::start(SimulatedPlatform::builder().build());

    host.writer.write_all(b"{not json}\n").await.unwrap();
    host.writer.flush().await.unwrap();
    let resp = host.response("parse-error").await;
    assert_eq!(resp["ok"], false);

    host.send("r1", "platform.set", json!({})).await;
    let resp = host.response("r1").await;
    assert_eq!(resp["ok"], false);
    assert!(resp["error"].as_str().unwrap().contains("platform.set"));

    host.send("r2", "host.ping", json!({})).await;
    assert_eq!(host.response("r2").await["ok"], true);
}

#[tokio::test]
async fn input_eof_shuts_bridge_down() {
    let platform = SimulatedPlatform::builder().build();
    let mut host = HostSession::start(platform.clone());

    host.writer.shutdown().await.unwrap();
    let result = tokio::time::timeout(WAIT, host.bridge).await.unwrap().unwrap();
    assert!(result.is_ok());
    crate::helpers::eventually(|| platform.registered_callbacks() == 0).await;
}
