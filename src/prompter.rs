//! User-mediated remediation for unmet preconditions.
//!
//! [`RemediationPrompter`] is stateless per invocation: each call to
//! [`RemediationPrompter::prompt`] launches one external flow or dialog and
//! resolves to a single [`RemediationOutcome`]. It never blocks the calling
//! task; the gate spawns each prompt and receives the outcome as a message.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::permissions::MissingPermissionSet;
use crate::platform::{
    DialogChoice, DialogSpec, PermissionGrantResult, RemediationLauncher, UserDialog,
};
use crate::state::{PreconditionKind, RemediationOutcome};

/// Dialog shown when location services are off.
pub const AUXILIARY_SERVICE_DIALOG: DialogSpec = DialogSpec {
    title: "Location services are not enabled",
    message: "Scanning for nearby sensors requires location services to be turned on.",
    confirm_label: "Enable",
    cancel_label: Some("Cancel"),
};

/// Retry affordance shown after a permission request was denied.
pub const PERMISSION_RETRY_DIALOG: DialogSpec = DialogSpec {
    title: "Location permission is required to scan for sensors",
    message: "Please grant the location permission.",
    confirm_label: "Retry",
    cancel_label: None,
};

/// A single remediation the gate wants the user to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationRequest {
    /// Run the enable-radio flow.
    EnableRadio,
    /// Request every missing permission in one round-trip.
    GrantPermissions(MissingPermissionSet),
    /// Offer to retry after a denied permission request.
    RetryPermissions,
    /// Offer to open the auxiliary-service settings.
    EnableAuxiliaryService,
}

impl RemediationRequest {
    /// The precondition this request remediates.
    #[must_use]
    pub fn kind(&self) -> PreconditionKind {
        match self {
            Self::EnableRadio => PreconditionKind::RadioPower,
            Self::GrantPermissions(_) | Self::RetryPermissions => PreconditionKind::Permissions,
            Self::EnableAuxiliaryService => PreconditionKind::AuxiliaryService,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnableRadio => "enable_radio",
            Self::GrantPermissions(_) => "grant_permissions",
            Self::RetryPermissions => "retry_permissions",
            Self::EnableAuxiliaryService => "enable_auxiliary_service",
        }
    }
}

/// Presents remediation flows and reports the user's decision.
#[derive(Clone)]
pub struct RemediationPrompter {
    launcher: Arc<dyn RemediationLauncher>,
    dialog: Arc<dyn UserDialog>,
    timeout: Option<Duration>,
}

impl RemediationPrompter {
    pub fn new(launcher: Arc<dyn RemediationLauncher>, dialog: Arc<dyn UserDialog>) -> Self {
        Self {
            launcher,
            dialog,
            timeout: None,
        }
    }

    /// Bound every prompt by `timeout`. A timed-out prompt resolves to
    /// [`RemediationOutcome::Unavailable`].
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `request` to completion and report the outcome.
    pub async fn prompt(&self, request: &RemediationRequest) -> RemediationOutcome {
        let Some(limit) = self.timeout else {
            return self.run(request).await;
        };
        match tokio::time::timeout(limit, self.run(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    request = request.as_str(),
                    timeout = ?limit,
                    "remediation prompt timed out"
                );
                RemediationOutcome::Unavailable
            }
        }
    }

    async fn run(&self, request: &RemediationRequest) -> RemediationOutcome {
        match request {
            RemediationRequest::EnableRadio => self.launcher.request_enable_radio().await,
            RemediationRequest::GrantPermissions(missing) => {
                let results = self.launcher.request_permissions(missing).await;
                collapse_grants(missing, &results)
            }
            RemediationRequest::RetryPermissions => {
                match self.dialog.present(&PERMISSION_RETRY_DIALOG).await {
                    DialogChoice::Confirm => RemediationOutcome::Granted,
                    DialogChoice::Cancel | DialogChoice::Dismissed => RemediationOutcome::Declined,
                }
            }
            RemediationRequest::EnableAuxiliaryService => {
                match self.dialog.present(&AUXILIARY_SERVICE_DIALOG).await {
                    DialogChoice::Confirm => match self.launcher.open_auxiliary_service_settings()
                    {
                        Ok(()) => {
                            info!("auxiliary service settings opened");
                            RemediationOutcome::Granted
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to open auxiliary service settings");
                            RemediationOutcome::Unavailable
                        }
                    },
                    DialogChoice::Cancel | DialogChoice::Dismissed => {
                        RemediationOutcome::Unavailable
                    }
                }
            }
        }
    }
}

/// `Granted` only when every requested permission came back granted.
///
/// An interrupted flow (no result for some permission) counts as declined.
fn collapse_grants(
    requested: &MissingPermissionSet,
    results: &[PermissionGrantResult],
) -> RemediationOutcome {
    let all_granted = requested.iter().all(|permission| {
        results
            .iter()
            .any(|r| r.permission == permission && r.granted)
    });
    if all_granted {
        RemediationOutcome::Granted
    } else {
        RemediationOutcome::Declined
    }
}
