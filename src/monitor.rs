//! Auxiliary-service availability notifications.
//!
//! [`ServiceAvailabilityMonitor`] owns one registration with a
//! [`NotificationHub`]. The registration is made in the constructor and
//! released exactly once, either by [`deregister`](ServiceAvailabilityMonitor::deregister)
//! or when the monitor is dropped.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::platform::{NotificationCallback, NotificationHub, RegistrationId};

/// Scoped subscription to auxiliary-service state-change notifications.
pub struct ServiceAvailabilityMonitor {
    hub: Arc<dyn NotificationHub>,
    event: String,
    registration: Option<RegistrationId>,
}

impl ServiceAvailabilityMonitor {
    /// Register `on_change` for `event` notifications.
    ///
    /// Notifications are at-least-once; `on_change` must tolerate duplicates.
    ///
    /// # Errors
    ///
    /// Returns the hub's error when registration fails.
    pub fn register<F>(hub: Arc<dyn NotificationHub>, event: &str, on_change: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: NotificationCallback = Arc::new(on_change);
        let id = hub.register(event, callback)?;
        debug!(event, registration = id.0, "service availability monitor registered");
        Ok(Self {
            hub,
            event: event.to_owned(),
            registration: Some(id),
        })
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Release the registration. Subsequent calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the hub's error from the first (and only) deregistration.
    pub fn deregister(&mut self) -> Result<()> {
        let Some(id) = self.registration.take() else {
            return Ok(());
        };
        debug!(event = %self.event, registration = id.0, "service availability monitor deregistered");
        self.hub.unregister(id)
    }
}

impl Drop for ServiceAvailabilityMonitor {
    fn drop(&mut self) {
        if let Err(e) = self.deregister() {
            warn!(error = %e, event = %self.event, "failed to deregister service monitor on drop");
        }
    }
}
