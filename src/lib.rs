//! Sensor gate: capability gating for a radio-backed sensor stream.
//!
//! Before a downstream event stream may run, three platform preconditions
//! must hold: the radio is powered, the required location permissions are
//! granted, and the location service is enabled. The [`gate::CapabilityGate`]
//! checks them in order, asks the user to remediate the first unmet one, and
//! opens the stream exactly once when all three hold.
//!
//! # Architecture
//!
//! - **Gate**: single-writer actor owning the precondition state, driven by
//!   lifecycle signals, service notifications, and remediation outcomes
//! - **Prompter**: runs one remediation flow or dialog per request
//! - **Monitor**: scoped registration for location-mode change notifications
//! - **Bridge**: opens the downstream subscription and delivers events to
//!   the consumer in order on a dedicated delivery task
//! - **Host**: newline-delimited JSON bridge for native shells
//!
//! Platform access goes through the traits in [`platform`];
//! [`sim::SimulatedPlatform`] implements all of them in memory.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod host;
pub mod monitor;
pub mod permissions;
pub mod platform;
pub mod prompter;
pub mod sim;
pub mod state;

pub use config::GateConfig;
pub use error::{GateError, Result};
pub use events::DomainEvent;
pub use gate::{CapabilityGate, GateCollaborators, GateHandle, GateSnapshot, GateStatus};
pub use state::{PreconditionKind, PreconditionState, RemediationOutcome};
