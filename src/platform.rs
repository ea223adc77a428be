//! Interfaces to the platform services the gate consumes.
//!
//! Nothing in this module talks to real hardware. Hosts implement these
//! traits over their radio stack, permission system, and settings UI;
//! [`crate::sim`] provides an in-memory implementation for tests and the
//! host bridge binary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::events::DomainEvent;
use crate::permissions::{ApiLevel, MissingPermissionSet, Permission};
use crate::state::RemediationOutcome;

/// Well-known notification identifier for location mode changes.
pub const LOCATION_MODE_CHANGED: &str = "location.mode_changed";

/// Synchronous capability queries. Implementations must be cheap and non-blocking.
pub trait PlatformCapabilities: Send + Sync + 'static {
    fn is_radio_hardware_present(&self) -> bool;
    fn is_radio_enabled(&self) -> bool;
    fn is_permission_granted(&self, permission: Permission) -> bool;
    fn is_auxiliary_service_enabled(&self) -> bool;
    /// API level of the running platform.
    fn platform_api_level(&self) -> ApiLevel;
    /// API level the application was built against.
    fn target_api_level(&self) -> ApiLevel;
}

/// Per-permission answer from a grant-request flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrantResult {
    pub permission: Permission,
    pub granted: bool,
}

/// Launches the external flows that can flip a precondition.
#[async_trait]
pub trait RemediationLauncher: Send + Sync + 'static {
    /// Run the system "enable radio" flow and report whether the radio ended up enabled.
    async fn request_enable_radio(&self) -> RemediationOutcome;

    /// Request every permission in `permissions` in a single round-trip.
    async fn request_permissions(
        &self,
        permissions: &MissingPermissionSet,
    ) -> Vec<PermissionGrantResult>;

    /// Open the auxiliary-service settings surface. Returns once launched, not once enabled.
    fn open_auxiliary_service_settings(&self) -> Result<()>;
}

/// Static content of a binary-choice dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogSpec {
    pub title: &'static str,
    pub message: &'static str,
    pub confirm_label: &'static str,
    /// `None` renders a dialog with only the confirm action.
    pub cancel_label: Option<&'static str>,
}

/// The user's answer to a [`DialogSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogChoice {
    Confirm,
    Cancel,
    /// Dismissed without choosing (back gesture, host going away).
    Dismissed,
}

/// Presents dialogs to the user.
#[async_trait]
pub trait UserDialog: Send + Sync + 'static {
    async fn present(&self, dialog: &DialogSpec) -> DialogChoice;
}

/// Callback invoked for each delivered notification.
pub type NotificationCallback = Arc<dyn Fn() + Send + Sync>;

/// Opaque identifier of a notification registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// System broadcast subscription, keyed by event identifier.
pub trait NotificationHub: Send + Sync + 'static {
    fn register(&self, event: &str, callback: NotificationCallback) -> Result<RegistrationId>;
    fn unregister(&self, id: RegistrationId) -> Result<()>;
}

/// Receiving end of a downstream subscription.
pub type EventChannel = mpsc::Receiver<DomainEvent>;

/// Summary of a peripheral known to the stream handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralInfo {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Owner of the radio protocol and peripheral decoding.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// Open a new event subscription.
    async fn subscribe(&self) -> Result<EventChannel>;

    /// Stop producing events for the current subscription.
    async fn unsubscribe(&self);

    /// Look up a peripheral by address.
    fn peripheral(&self, _address: &str) -> Option<PeripheralInfo> {
        None
    }
}

/// Receives stream events on the delivery context.
pub trait EventConsumer: Send + 'static {
    fn on_event(&mut self, event: DomainEvent);
}

impl<F> EventConsumer for F
where
    F: FnMut(DomainEvent) + Send + 'static,
{
    fn on_event(&mut self, event: DomainEvent) {
        self(event);
    }
}

/// Location provider switches as exposed by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationProviders {
    /// Master location switch (reported from API 28).
    pub master: Option<bool>,
    pub gps: bool,
    pub network: bool,
}

impl LocationProviders {
    /// Whether location services count as enabled on `api`.
    ///
    /// From API 28 the master switch decides; before that either provider suffices.
    #[must_use]
    pub fn is_enabled(&self, api: ApiLevel) -> bool {
        match self.master {
            Some(master) if api >= ApiLevel::P => master,
            _ => self.gps || self.network,
        }
    }
}
