//! Remediation answered by the host.
//!
//! The bridge cannot run system flows or show dialogs itself. For every flow
//! or dialog the gate starts, [`HostRemediation`] emits `remediation.requested`
//! and parks the prompt until the host replies with `remediation.respond`.
//! A prompt abandoned before the host answers (the gate went inactive, the
//! prompt timed out) emits `remediation.cancelled` so the host can close
//! whatever it is showing.
//!
//! Granted flows are mirrored into the bridge's platform state so the gate's
//! next check sees them. The auxiliary service is not: the host reports it
//! with `platform.set`, which also fires the service-change notification.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use crate::error::{GateError, Result};
use crate::host::contract::{
    EVENT_REMEDIATION_CANCELLED, EVENT_REMEDIATION_REQUESTED, EVENT_SETTINGS_OPEN_REQUESTED,
    EventEnvelope,
};
use crate::permissions::MissingPermissionSet;
use crate::platform::{
    DialogChoice, DialogSpec, PermissionGrantResult, RemediationLauncher, UserDialog,
};
use crate::sim::SimulatedPlatform;
use crate::state::RemediationOutcome;

/// The host's answer to one `remediation.requested` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationAnswer {
    /// Answer to an `enable_radio` or `grant_permissions` request.
    Granted(bool),
    /// Answer to a `dialog` request.
    Choice(DialogChoice),
}

enum Pending {
    Grant(oneshot::Sender<bool>),
    Dialog(oneshot::Sender<DialogChoice>),
}

type PendingMap = Arc<Mutex<HashMap<u64, Pending>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, Pending>> {
    pending
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// [`RemediationLauncher`] and [`UserDialog`] that defer every decision to the host.
#[derive(Clone)]
pub struct HostRemediation {
    platform: SimulatedPlatform,
    event_tx: broadcast::Sender<EventEnvelope>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
}

/// Removes an unanswered request when the waiting prompt goes away.
struct PendingGuard {
    id: u64,
    pending: PendingMap,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if lock(&self.pending).remove(&self.id).is_some() {
            info!(request_id = self.id, "remediation abandoned before host answered");
            emit(
                &self.event_tx,
                EVENT_REMEDIATION_CANCELLED,
                serde_json::json!({"request_id": self.id.to_string()}),
            );
        }
    }
}

fn emit(event_tx: &broadcast::Sender<EventEnvelope>, event: &str, payload: serde_json::Value) {
    let _ = event_tx.send(EventEnvelope::new(
        uuid::Uuid::new_v4().to_string(),
        event,
        payload,
    ));
}

impl HostRemediation {
    pub fn new(platform: SimulatedPlatform, event_tx: broadcast::Sender<EventEnvelope>) -> Self {
        Self {
            platform,
            event_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of requests waiting on the host.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Deliver the host's answer for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Host`] if the id is malformed, unknown, or the
    /// answer does not fit the request (a choice for a grant, or the reverse).
    pub fn respond(&self, request_id: &str, answer: RemediationAnswer) -> Result<()> {
        info!(request_id, ?answer, "remediation.respond received");
        let id = request_id.parse::<u64>().map_err(|_| {
            GateError::Host(format!(
                "remediation.respond: request_id `{request_id}` is not a valid numeric ID"
            ))
        })?;

        let mut pending = lock(&self.pending);
        let delivered = match (pending.remove(&id), answer) {
            (None, _) => {
                return Err(GateError::Host(format!(
                    "remediation.respond: no pending request with id `{request_id}`"
                )));
            }
            (Some(Pending::Grant(tx)), RemediationAnswer::Granted(granted)) => {
                tx.send(granted).is_ok()
            }
            (Some(Pending::Dialog(tx)), RemediationAnswer::Choice(choice)) => {
                tx.send(choice).is_ok()
            }
            (Some(mismatched), _) => {
                let expected = match mismatched {
                    Pending::Grant(_) => "payload.granted",
                    Pending::Dialog(_) => "payload.choice",
                };
                pending.insert(id, mismatched);
                return Err(GateError::Host(format!(
                    "remediation.respond: request `{request_id}` expects {expected}"
                )));
            }
        };
        if !delivered {
            warn!(request_id, "remediation.respond: prompt already gone");
        }
        Ok(())
    }

    /// Publish a request and wait for the host. `None` when it never answers.
    async fn ask<T>(
        &self,
        kind: &str,
        detail: serde_json::Value,
        park: impl FnOnce(oneshot::Sender<T>) -> Pending,
    ) -> Option<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, park(tx));
        let _guard = PendingGuard {
            id,
            pending: Arc::clone(&self.pending),
            event_tx: self.event_tx.clone(),
        };

        info!(request_id = id, kind, "remediation requested from host");
        emit(
            &self.event_tx,
            EVENT_REMEDIATION_REQUESTED,
            serde_json::json!({
                "request_id": id.to_string(),
                "kind": kind,
                "detail": detail,
            }),
        );
        rx.await.ok()
    }
}

#[async_trait]
impl RemediationLauncher for HostRemediation {
    async fn request_enable_radio(&self) -> RemediationOutcome {
        match self
            .ask("enable_radio", serde_json::Value::Null, Pending::Grant)
            .await
        {
            Some(true) => {
                self.platform.set_radio_enabled(true);
                RemediationOutcome::Granted
            }
            Some(false) => RemediationOutcome::Declined,
            None => RemediationOutcome::Unavailable,
        }
    }

    async fn request_permissions(
        &self,
        permissions: &MissingPermissionSet,
    ) -> Vec<PermissionGrantResult> {
        let names: Vec<&str> = permissions.iter().map(|p| p.as_str()).collect();
        let Some(granted) = self
            .ask(
                "grant_permissions",
                serde_json::json!({"permissions": names}),
                Pending::Grant,
            )
            .await
        else {
            return Vec::new();
        };
        permissions
            .iter()
            .map(|permission| {
                if granted {
                    self.platform.set_permission_granted(permission, true);
                }
                PermissionGrantResult {
                    permission,
                    granted,
                }
            })
            .collect()
    }

    fn open_auxiliary_service_settings(&self) -> Result<()> {
        emit(
            &self.event_tx,
            EVENT_SETTINGS_OPEN_REQUESTED,
            serde_json::json!({"settings": "location"}),
        );
        Ok(())
    }
}

#[async_trait]
impl UserDialog for HostRemediation {
    async fn present(&self, dialog: &DialogSpec) -> DialogChoice {
        let detail = serde_json::json!({
            "title": dialog.title,
            "message": dialog.message,
            "confirm_label": dialog.confirm_label,
            "cancel_label": dialog.cancel_label,
        });
        self.ask("dialog", detail, Pending::Dialog)
            .await
            .unwrap_or(DialogChoice::Dismissed)
    }
}
