//! Host command channel and router.
//!
//! [`command_channel`] builds a capability gate whose capability queries,
//! notifications, and stream come from a [`SimulatedPlatform`] mirroring the
//! host-reported state, and whose remediation prompts are answered by the
//! host through [`HostRemediation`]. It wires the consumer and published
//! snapshot into the event broadcast and returns a client/server pair.

use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::events::{DomainEvent, Measurement, MeasurementUnit};
use crate::gate::{CapabilityGate, GateCollaborators, GateHandle};
use crate::host::contract::{
    CommandEnvelope, CommandName, EVENT_GATE_STATUS_CHANGED, EVENT_STREAM, EVENT_VERSION,
    EventEnvelope, ResponseEnvelope,
};
use crate::host::remediation::{HostRemediation, RemediationAnswer};
use crate::permissions::Permission;
use crate::platform::{DialogChoice, StreamHandler};
use crate::sim::SimulatedPlatform;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            GateError::Host(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| GateError::Channel(format!("failed to send host command request: {e}")))?;

        response_rx
            .await
            .map_err(|e| GateError::Channel(format!("host command response dropped: {e}")))
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    gate: GateHandle,
    platform: SimulatedPlatform,
    remediation: HostRemediation,
}

/// Spawn a gate over `platform` and return the command channel driving it.
///
/// Consumer deliveries are emitted as `stream.event`, every snapshot change
/// as `gate.status_changed`, and each prompt as `remediation.requested`.
///
/// # Errors
///
/// Returns an error if the gate cannot be constructed from `config`.
pub fn command_channel(
    platform: SimulatedPlatform,
    config: &GateConfig,
    request_capacity: usize,
    event_capacity: usize,
) -> Result<(HostCommandClient, HostCommandServer)> {
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));

    let stream_tx = event_tx.clone();
    let consumer = move |event: DomainEvent| match serde_json::to_value(&event) {
        Ok(payload) => {
            let _ = stream_tx.send(EventEnvelope::new(
                uuid::Uuid::new_v4().to_string(),
                EVENT_STREAM,
                payload,
            ));
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize stream event; skipping"),
    };
    let remediation = HostRemediation::new(platform.clone(), event_tx.clone());
    let collaborators = GateCollaborators {
        launcher: Arc::new(remediation.clone()),
        dialog: Arc::new(remediation.clone()),
        ..platform.collaborators()
    };
    let gate = CapabilityGate::spawn(collaborators, consumer, config)?;

    let mut snapshots = gate.watch();
    let status_tx = event_tx.clone();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            match serde_json::to_value(&snapshot) {
                Ok(payload) => {
                    let _ = status_tx.send(EventEnvelope::new(
                        uuid::Uuid::new_v4().to_string(),
                        EVENT_GATE_STATUS_CHANGED,
                        payload,
                    ));
                }
                Err(e) => tracing::error!(error = %e, "failed to serialize gate snapshot"),
            }
        }
        tracing::debug!("gate snapshot channel closed; status forwarder stopped");
    });

    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
    Ok((
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            event_tx,
            gate,
            platform,
            remediation,
        },
    ))
}

impl HostCommandServer {
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let envelope = &request.envelope;
            let response = match self.route(envelope).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        command = envelope.command.as_str(),
                        request_id = %envelope.request_id,
                        error = %e,
                        "host command failed"
                    );
                    ResponseEnvelope::error(envelope.request_id.clone(), e.to_string())
                }
            };
            let _ = request.response_tx.send(response);
        }
    }

    /// Route a command envelope to the gate, the remediation broker, or the platform mirror.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({"pong": true}),
            )),
            CommandName::HostVersion => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({
                    "contract_version": EVENT_VERSION,
                    "channel": "sensor_gate_v1",
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )),
            CommandName::LifecycleActive => {
                self.gate.on_became_active()?;
                Ok(accepted(envelope))
            }
            CommandName::LifecycleInactive => {
                self.gate.on_became_inactive().await?;
                Ok(accepted(envelope))
            }
            CommandName::GateStatus => {
                let snapshot = serde_json::to_value(self.gate.snapshot())
                    .map_err(|e| GateError::Host(format!("failed to serialize snapshot: {e}")))?;
                Ok(ResponseEnvelope::ok(envelope.request_id.clone(), snapshot))
            }
            CommandName::GateRetry => {
                self.gate.retry()?;
                Ok(accepted(envelope))
            }
            CommandName::RemediationRespond => self.handle_remediation_respond(envelope),
            CommandName::PlatformSet => self.handle_platform_set(envelope),
            CommandName::StreamPush => self.handle_stream_push(envelope),
            CommandName::PeripheralGet => self.handle_peripheral_get(envelope),
            CommandName::RuntimeStop => {
                self.gate.shutdown().await?;
                self.emit_event(
                    "runtime.stopped",
                    serde_json::json!({"request_id": envelope.request_id}),
                );
                Ok(accepted(envelope))
            }
        }
    }

    fn handle_remediation_respond(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let (remediation_id, answer) = parse_remediation_answer(&envelope.payload)?;
        self.remediation.respond(&remediation_id, answer)?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true, "remediation_id": remediation_id}),
        ))
    }

    fn handle_platform_set(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let update = parse_platform_update(&envelope.payload)?;
        if let Some(enabled) = update.radio_enabled {
            self.platform.set_radio_enabled(enabled);
        }
        if let Some(granted) = update.permissions_granted {
            for permission in Permission::all() {
                self.platform.set_permission_granted(*permission, granted);
            }
        }
        // Service changes broadcast the location-mode notification.
        if let Some(enabled) = update.service_enabled {
            self.platform.set_service_enabled(enabled);
        }

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({
                "accepted": true,
                "radio_enabled": update.radio_enabled,
                "permissions_granted": update.permissions_granted,
                "service_enabled": update.service_enabled,
            }),
        ))
    }

    fn handle_stream_push(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let measurement = parse_measurement(&envelope.payload)?;
        let delivered = self
            .platform
            .push_event(DomainEvent::Measurement(measurement));
        if !delivered {
            tracing::debug!("stream.push with no live subscription; dropped");
        }
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": delivered}),
        ))
    }

    fn handle_peripheral_get(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let address = parse_non_empty_field(&envelope.payload, "address", "peripheral.get")?;
        let peripheral = StreamHandler::peripheral(&self.platform, &address);
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"address": address, "peripheral": peripheral}),
        ))
    }

    fn emit_event(&self, event: &str, payload: serde_json::Value) {
        let envelope =
            EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.to_owned(), payload);
        let _ = self.event_tx.send(envelope);
    }
}

fn accepted(envelope: &CommandEnvelope) -> ResponseEnvelope {
    ResponseEnvelope::ok(
        envelope.request_id.clone(),
        serde_json::json!({"accepted": true}),
    )
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PlatformUpdate {
    radio_enabled: Option<bool>,
    permissions_granted: Option<bool>,
    service_enabled: Option<bool>,
}

fn parse_platform_update(payload: &serde_json::Value) -> Result<PlatformUpdate> {
    let update = PlatformUpdate {
        radio_enabled: parse_optional_bool(payload, "radio_enabled", "platform.set")?,
        permissions_granted: parse_optional_bool(payload, "permissions_granted", "platform.set")?,
        service_enabled: parse_optional_bool(payload, "service_enabled", "platform.set")?,
    };
    if update == PlatformUpdate::default() {
        return Err(GateError::Host(
            "platform.set requires at least one of payload.radio_enabled, \
             payload.permissions_granted, payload.service_enabled"
                .to_owned(),
        ));
    }
    Ok(update)
}

fn parse_remediation_answer(payload: &serde_json::Value) -> Result<(String, RemediationAnswer)> {
    let request_id = parse_non_empty_field(payload, "request_id", "remediation.respond")?;
    if let Some(granted) = parse_optional_bool(payload, "granted", "remediation.respond")? {
        return Ok((request_id, RemediationAnswer::Granted(granted)));
    }
    let choice = match payload.get("choice").and_then(serde_json::Value::as_str) {
        Some("confirm") => DialogChoice::Confirm,
        Some("cancel") => DialogChoice::Cancel,
        Some("dismissed") => DialogChoice::Dismissed,
        _ => {
            return Err(GateError::Host(
                "remediation.respond requires payload.granted (boolean) or payload.choice \
                 (`confirm`, `cancel`, `dismissed`)"
                    .to_owned(),
            ));
        }
    };
    Ok((request_id, RemediationAnswer::Choice(choice)))
}

fn parse_measurement(payload: &serde_json::Value) -> Result<Measurement> {
    let peripheral = parse_non_empty_field(payload, "peripheral", "stream.push")?;
    let Some(value) = payload.get("value").and_then(serde_json::Value::as_f64) else {
        return Err(GateError::Host(
            "stream.push requires payload.value (number)".to_owned(),
        ));
    };
    let unit = match payload.get("unit") {
        None | Some(serde_json::Value::Null) => MeasurementUnit::MgPerDl,
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| {
            GateError::Host(
                "stream.push payload.unit must be `mg_per_dl` or `mmol_per_l`".to_owned(),
            )
        })?,
    };
    let sequence = match payload.get("sequence") {
        None | Some(serde_json::Value::Null) => None,
        Some(raw) => Some(
            raw.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    GateError::Host(
                        "stream.push payload.sequence must be a non-negative 32-bit integer"
                            .to_owned(),
                    )
                })?,
        ),
    };
    Ok(Measurement {
        peripheral,
        value,
        unit,
        sequence,
        timestamp: chrono::Utc::now(),
    })
}

fn parse_optional_bool(
    payload: &serde_json::Value,
    field: &str,
    command: &str,
) -> Result<Option<bool>> {
    match payload.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(GateError::Host(format!(
            "{command} payload.{field} must be a boolean when provided"
        ))),
    }
}

fn parse_non_empty_field(
    payload: &serde_json::Value,
    field: &str,
    command: &str,
) -> Result<String> {
    let Some(raw) = payload.get(field).and_then(serde_json::Value::as_str) else {
        return Err(GateError::Host(format!("{command} requires payload.{field}")));
    };
    let value = raw.trim();
    if value.is_empty() {
        return Err(GateError::Host(format!(
            "{command} requires a non-empty payload.{field}"
        )));
    }
    Ok(value.to_owned())
}
