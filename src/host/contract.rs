//! Versioned host command/event envelopes for the JSON bridge.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Event emitted whenever the published gate snapshot changes.
pub const EVENT_GATE_STATUS_CHANGED: &str = "gate.status_changed";

/// Event carrying one [`DomainEvent`](crate::events::DomainEvent) delivered to the consumer.
pub const EVENT_STREAM: &str = "stream.event";

/// A remediation flow or dialog is waiting for `remediation.respond`.
pub const EVENT_REMEDIATION_REQUESTED: &str = "remediation.requested";

/// A pending remediation was abandoned before the host answered.
pub const EVENT_REMEDIATION_CANCELLED: &str = "remediation.cancelled";

/// The host should open the location settings surface.
pub const EVENT_SETTINGS_OPEN_REQUESTED: &str = "settings.open_requested";

/// Command set accepted by the host bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "lifecycle.active")]
    LifecycleActive,
    #[serde(rename = "lifecycle.inactive")]
    LifecycleInactive,
    #[serde(rename = "gate.status")]
    GateStatus,
    #[serde(rename = "gate.retry")]
    GateRetry,
    #[serde(rename = "remediation.respond")]
    RemediationRespond,
    #[serde(rename = "platform.set")]
    PlatformSet,
    #[serde(rename = "stream.push")]
    StreamPush,
    #[serde(rename = "peripheral.get")]
    PeripheralGet,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::LifecycleActive => "lifecycle.active",
            Self::LifecycleInactive => "lifecycle.inactive",
            Self::GateStatus => "gate.status",
            Self::GateRetry => "gate.retry",
            Self::RemediationRespond => "remediation.respond",
            Self::PlatformSet => "platform.set",
            Self::StreamPush => "stream.push",
            Self::PeripheralGet => "peripheral.get",
            Self::RuntimeStop => "runtime.stop",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "host.ping" => Some(Self::HostPing),
            "host.version" => Some(Self::HostVersion),
            "lifecycle.active" => Some(Self::LifecycleActive),
            "lifecycle.inactive" => Some(Self::LifecycleInactive),
            "gate.status" => Some(Self::GateStatus),
            "gate.retry" => Some(Self::GateRetry),
            "remediation.respond" => Some(Self::RemediationRespond),
            "platform.set" => Some(Self::PlatformSet),
            "stream.push" => Some(Self::StreamPush),
            "peripheral.get" => Some(Self::PeripheralGet),
            "runtime.stop" => Some(Self::RuntimeStop),
            _ => None,
        }
    }
}

/// A versioned response envelope from bridge -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from host -> bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned event envelope from bridge -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}
