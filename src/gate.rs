//! Capability gate orchestrator.
//!
//! The gate is a single-writer actor. Lifecycle signals, auxiliary-service
//! notifications, user retries, and remediation outcomes all arrive as
//! [`GateCommand`]s on one channel, and only the actor task mutates the
//! precondition triple. External components observe the gate through the
//! [`GateSnapshot`] published on a `watch` channel.
//!
//! ```text
//! hardware? ── no ──▶ NoHardware (terminal)
//!    │
//! radio on? ── no ──▶ prompt EnableRadio ──▶ re-check
//!    │
//! permissions? ─ no ─▶ prompt GrantPermissions ─▶ denied ─▶ prompt RetryPermissions
//!    │
//! service on? ─ no ─▶ prompt EnableAuxiliaryService ─▶ wait for notification
//!    │
//!  activate stream (once per satisfied window)
//! ```
//!
//! At most one remediation is outstanding at any time. A trigger that arrives
//! while one is pending is coalesced and replayed when the outcome lands.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::StreamBridge;
use crate::config::{GateConfig, RecheckMode, RemediationConfig};
use crate::error::{GateError, Result};
use crate::monitor::ServiceAvailabilityMonitor;
use crate::permissions::{MissingPermissionSet, PermissionPolicy};
use crate::platform::{
    EventConsumer, LOCATION_MODE_CHANGED, NotificationHub, PlatformCapabilities,
    RemediationLauncher, StreamHandler, UserDialog,
};
use crate::prompter::{RemediationPrompter, RemediationRequest};
use crate::state::{PreconditionKind, PreconditionState, RemediationOutcome};

/// Everything the gate talks to, injected at construction.
#[derive(Clone)]
pub struct GateCollaborators {
    pub platform: Arc<dyn PlatformCapabilities>,
    pub launcher: Arc<dyn RemediationLauncher>,
    pub dialog: Arc<dyn UserDialog>,
    pub notifications: Arc<dyn NotificationHub>,
    pub stream: Arc<dyn StreamHandler>,
}

/// Coarse description of what the gate is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "precondition", rename_all = "snake_case")]
pub enum GateStatus {
    /// Not evaluated since the last activation.
    #[default]
    Idle,
    /// A remediation for this precondition is waiting on the user.
    AwaitingUser(PreconditionKind),
    /// The user declined; waiting for the next trigger.
    Blocked(PreconditionKind),
    /// Settings were opened; waiting for a service-change notification.
    AwaitingServiceChange,
    /// All preconditions hold and the stream is active.
    Open,
    /// All preconditions hold but the subscription could not be opened.
    StreamFailed,
    /// No radio hardware. Terminal for this gate instance.
    NoHardware,
    /// The gate was shut down.
    ShutDown,
}

/// Published view of the gate's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub radio: PreconditionState,
    pub permissions: PreconditionState,
    pub auxiliary_service: PreconditionState,
    pub pending: Option<PreconditionKind>,
    pub status: GateStatus,
    pub stream_active: bool,
    pub lifecycle_active: bool,
}

impl GateSnapshot {
    /// State of a single precondition.
    #[must_use]
    pub fn precondition(&self, kind: PreconditionKind) -> PreconditionState {
        match kind {
            PreconditionKind::RadioPower => self.radio,
            PreconditionKind::Permissions => self.permissions,
            PreconditionKind::AuxiliaryService => self.auxiliary_service,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == GateStatus::Open
    }
}

enum GateCommand {
    BecameActive,
    BecameInactive {
        done: oneshot::Sender<()>,
    },
    Evaluate,
    ServiceChanged,
    Retry,
    StreamEnded {
        epoch: u64,
    },
    RemediationFinished {
        cycle: u64,
        request: RemediationRequest,
        outcome: RemediationOutcome,
    },
    Shutdown {
        done: Option<oneshot::Sender<()>>,
    },
}

/// The orchestrator actor. Created and driven through [`CapabilityGate::spawn`].
pub struct CapabilityGate {
    platform: Arc<dyn PlatformCapabilities>,
    prompter: RemediationPrompter,
    policy: PermissionPolicy,
    remediation: RemediationConfig,
    bridge: StreamBridge,
    monitor: Option<ServiceAvailabilityMonitor>,
    commands: mpsc::UnboundedSender<GateCommand>,
    snapshot_tx: watch::Sender<GateSnapshot>,

    radio: PreconditionState,
    permissions: PreconditionState,
    auxiliary_service: PreconditionState,
    pending: Option<PreconditionKind>,
    prompt_task: Option<JoinHandle<()>>,
    coalesced: Option<PreconditionKind>,
    cycle: u64,
    radio_prompts: u32,
    lifecycle_active: bool,
    no_hardware: bool,
    stream_active: bool,
    status: GateStatus,
}

impl CapabilityGate {
    /// Build the gate, register the service monitor, and start the actor.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the service monitor cannot
    /// be registered.
    pub fn spawn<C: EventConsumer>(
        collaborators: GateCollaborators,
        consumer: C,
        config: &GateConfig,
    ) -> Result<GateHandle> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(GateSnapshot::default());

        let monitor_tx = tx.clone();
        let monitor_platform = Arc::clone(&collaborators.platform);
        let monitor = ServiceAvailabilityMonitor::register(
            Arc::clone(&collaborators.notifications),
            LOCATION_MODE_CHANGED,
            move || {
                let state = if monitor_platform.is_auxiliary_service_enabled() {
                    "on"
                } else {
                    "off"
                };
                info!(state, "auxiliary service state changed");
                let _ = monitor_tx.send(GateCommand::ServiceChanged);
            },
        )?;

        let prompter = RemediationPrompter::new(collaborators.launcher, collaborators.dialog)
            .with_timeout(config.remediation.prompt_timeout());
        let ended_tx = tx.clone();
        let bridge = StreamBridge::new(
            collaborators.stream,
            consumer,
            config.stream.delivery_queue_capacity,
        )
        .on_end(move |epoch| {
            let _ = ended_tx.send(GateCommand::StreamEnded { epoch });
        });

        let gate = Self {
            platform: collaborators.platform,
            prompter,
            policy: PermissionPolicy::from_config(&config.permissions),
            remediation: config.remediation.clone(),
            bridge,
            monitor: Some(monitor),
            commands: tx.clone(),
            snapshot_tx,
            radio: PreconditionState::Unknown,
            permissions: PreconditionState::Unknown,
            auxiliary_service: PreconditionState::Unknown,
            pending: None,
            prompt_task: None,
            coalesced: None,
            cycle: 0,
            radio_prompts: 0,
            lifecycle_active: false,
            no_hardware: false,
            stream_active: false,
            status: GateStatus::Idle,
        };
        tokio::spawn(gate.run(rx));

        Ok(GateHandle {
            tx: tx.clone(),
            snapshot_rx,
            _guard: Arc::new(ShutdownOnDrop { tx }),
        })
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<GateCommand>) {
        info!("capability gate started");
        while let Some(command) = rx.recv().await {
            match command {
                GateCommand::BecameActive => {
                    self.lifecycle_active = true;
                    self.radio_prompts = 0;
                    self.publish();
                    self.evaluate(PreconditionKind::RadioPower).await;
                }
                GateCommand::BecameInactive { done } => {
                    self.deactivate().await;
                    let _ = done.send(());
                }
                GateCommand::Evaluate => self.trigger(PreconditionKind::RadioPower).await,
                GateCommand::ServiceChanged => {
                    let from = match self.remediation.recheck {
                        RecheckMode::Full => PreconditionKind::RadioPower,
                        RecheckMode::ResumeAtService => PreconditionKind::AuxiliaryService,
                    };
                    self.trigger(from).await;
                }
                GateCommand::Retry => self.trigger(PreconditionKind::Permissions).await,
                GateCommand::StreamEnded { epoch } => self.on_stream_ended(epoch).await,
                GateCommand::RemediationFinished {
                    cycle,
                    request,
                    outcome,
                } => self.on_remediation_finished(cycle, request, outcome).await,
                GateCommand::Shutdown { done } => {
                    self.shutdown().await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    break;
                }
            }
        }
        info!("capability gate stopped");
    }

    async fn trigger(&mut self, from: PreconditionKind) {
        if !self.lifecycle_active {
            debug!(from = %from, "gate inactive; ignoring trigger");
            return;
        }
        if self.pending.is_none() {
            self.radio_prompts = 0;
        }
        self.evaluate(from).await;
    }

    /// Check preconditions in order starting at `from`, remediating the first unmet one.
    async fn evaluate(&mut self, from: PreconditionKind) {
        if self.no_hardware {
            debug!("radio hardware absent; evaluation skipped");
            return;
        }
        if let Some(kind) = self.pending {
            let merged = self.coalesced.map_or(from, |c| c.min(from));
            self.coalesced = Some(merged);
            debug!(pending = %kind, from = %merged, "remediation pending; evaluation coalesced");
            return;
        }

        if !self.platform.is_radio_hardware_present() {
            error!("radio hardware absent; gate permanently closed");
            self.no_hardware = true;
            self.status = GateStatus::NoHardware;
            self.publish();
            return;
        }

        let from = self.effective_start(from);

        if from <= PreconditionKind::RadioPower {
            let radio = PreconditionState::from_check(self.platform.is_radio_enabled());
            self.record(PreconditionKind::RadioPower, radio);
            if !radio.is_satisfied() {
                self.close_stream().await;
                self.remediate_radio();
                return;
            }
        }

        if from <= PreconditionKind::Permissions {
            let missing = self.missing_permissions();
            self.record(
                PreconditionKind::Permissions,
                PreconditionState::from_check(missing.is_empty()),
            );
            if !missing.is_empty() {
                self.close_stream().await;
                self.dispatch(RemediationRequest::GrantPermissions(missing));
                return;
            }
        }

        let service = PreconditionState::from_check(self.platform.is_auxiliary_service_enabled());
        self.record(PreconditionKind::AuxiliaryService, service);
        if !service.is_satisfied() {
            self.close_stream().await;
            self.dispatch(RemediationRequest::EnableAuxiliaryService);
            return;
        }

        self.open_stream().await;
    }

    /// Earlier preconditions that are not known to hold are re-checked first.
    fn effective_start(&self, from: PreconditionKind) -> PreconditionKind {
        if from > PreconditionKind::RadioPower && !self.radio.is_satisfied() {
            PreconditionKind::RadioPower
        } else if from > PreconditionKind::Permissions && !self.permissions.is_satisfied() {
            PreconditionKind::Permissions
        } else {
            from
        }
    }

    fn missing_permissions(&self) -> MissingPermissionSet {
        let required = self.policy.required_permissions(
            self.platform.platform_api_level(),
            self.platform.target_api_level(),
        );
        required.missing(|p| self.platform.is_permission_granted(p))
    }

    /// Whether any precondition checked this cycle now reads differently.
    fn observed_change(&self) -> bool {
        let live = [
            (
                self.radio,
                PreconditionState::from_check(self.platform.is_radio_enabled()),
            ),
            (
                self.permissions,
                PreconditionState::from_check(self.missing_permissions().is_empty()),
            ),
            (
                self.auxiliary_service,
                PreconditionState::from_check(self.platform.is_auxiliary_service_enabled()),
            ),
        ];
        live.iter()
            .any(|(recorded, now)| *recorded != PreconditionState::Unknown && recorded != now)
    }

    fn record(&mut self, kind: PreconditionKind, state: PreconditionState) {
        debug!(precondition = %kind, state = ?state, "precondition checked");
        match kind {
            PreconditionKind::RadioPower => self.radio = state,
            PreconditionKind::Permissions => self.permissions = state,
            PreconditionKind::AuxiliaryService => self.auxiliary_service = state,
        }
    }

    fn remediate_radio(&mut self) {
        if !self.remediation.allows_radio_prompt(self.radio_prompts) {
            warn!(
                attempts = self.radio_prompts,
                "radio still disabled; not prompting again until next trigger"
            );
            self.status = GateStatus::Blocked(PreconditionKind::RadioPower);
            self.publish();
            return;
        }
        self.radio_prompts += 1;
        self.dispatch(RemediationRequest::EnableRadio);
    }

    /// Start `request` on its own task; the outcome comes back as a command.
    fn dispatch(&mut self, request: RemediationRequest) {
        let kind = request.kind();
        info!(kind = %kind, request = request.as_str(), "requesting remediation");
        self.pending = Some(kind);
        self.status = GateStatus::AwaitingUser(kind);
        self.publish();

        let prompter = self.prompter.clone();
        let commands = self.commands.clone();
        let cycle = self.cycle;
        self.prompt_task = Some(tokio::spawn(async move {
            let outcome = prompter.prompt(&request).await;
            let _ = commands.send(GateCommand::RemediationFinished {
                cycle,
                request,
                outcome,
            });
        }));
    }

    async fn on_remediation_finished(
        &mut self,
        cycle: u64,
        request: RemediationRequest,
        outcome: RemediationOutcome,
    ) {
        if cycle != self.cycle {
            debug!(request = request.as_str(), "discarding stale remediation outcome");
            return;
        }
        self.pending = None;
        self.prompt_task = None;
        let coalesced = self.coalesced.take();
        info!(
            request = request.as_str(),
            outcome = %outcome,
            "remediation finished"
        );

        let next = match (&request, outcome) {
            (RemediationRequest::EnableRadio, outcome) => {
                if outcome.is_granted() {
                    self.radio_prompts = 0;
                } else {
                    warn!("radio was not enabled");
                }
                Some(PreconditionKind::RadioPower)
            }
            (RemediationRequest::GrantPermissions(_), RemediationOutcome::Granted)
            | (RemediationRequest::RetryPermissions, RemediationOutcome::Granted) => {
                Some(PreconditionKind::Permissions)
            }
            (RemediationRequest::GrantPermissions(missing), _) => {
                warn!(permissions = %missing, "permission request denied");
                self.dispatch(RemediationRequest::RetryPermissions);
                self.coalesced = coalesced;
                return;
            }
            (RemediationRequest::RetryPermissions, _) => {
                self.status = GateStatus::Blocked(PreconditionKind::Permissions);
                None
            }
            (RemediationRequest::EnableAuxiliaryService, RemediationOutcome::Granted) => {
                self.status = GateStatus::AwaitingServiceChange;
                None
            }
            (RemediationRequest::EnableAuxiliaryService, _) => {
                self.status = GateStatus::Blocked(PreconditionKind::AuxiliaryService);
                None
            }
        };
        self.publish();

        // A halted cycle only resumes for triggers that saw something change.
        let coalesced = match coalesced {
            Some(from) if next.is_none() && !self.observed_change() => {
                debug!(from = %from, "nothing changed during prompt; coalesced trigger dropped");
                None
            }
            other => other,
        };
        let next = match (next, coalesced) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(from) = next {
            self.evaluate(from).await;
        }
    }

    async fn open_stream(&mut self) {
        if self.stream_active {
            debug!("all preconditions hold; stream already active");
            self.status = GateStatus::Open;
            self.publish();
            return;
        }
        match self.bridge.activate().await {
            Ok(_) => {
                self.stream_active = true;
                self.status = GateStatus::Open;
                info!("all preconditions hold; gate open");
            }
            Err(e) => {
                warn!(error = %e, "failed to open stream subscription");
                self.status = GateStatus::StreamFailed;
            }
        }
        self.publish();
    }

    /// The handler closed the live subscription; report it and wait for a trigger.
    async fn on_stream_ended(&mut self, epoch: u64) {
        if !self.bridge.release_ended(epoch).await {
            return;
        }
        self.stream_active = false;
        warn!(epoch, "stream subscription lost; resubscribing on next trigger");
        if self.status == GateStatus::Open {
            self.status = GateStatus::StreamFailed;
        }
        self.publish();
    }

    async fn close_stream(&mut self) {
        if !self.stream_active {
            return;
        }
        self.bridge.deactivate().await;
        self.stream_active = false;
        info!("precondition no longer holds; stream closed");
    }

    async fn deactivate(&mut self) {
        self.lifecycle_active = false;
        self.cycle += 1;
        if let Some(task) = self.prompt_task.take() {
            task.abort();
        }
        self.pending = None;
        self.coalesced = None;
        self.radio_prompts = 0;
        self.bridge.deactivate().await;
        self.stream_active = false;
        self.radio = PreconditionState::Unknown;
        self.permissions = PreconditionState::Unknown;
        self.auxiliary_service = PreconditionState::Unknown;
        if !self.no_hardware {
            self.status = GateStatus::Idle;
        }
        info!("gate deactivated");
        self.publish();
    }

    async fn shutdown(&mut self) {
        self.deactivate().await;
        if let Some(mut monitor) = self.monitor.take() {
            if let Err(e) = monitor.deregister() {
                warn!(error = %e, "failed to deregister service monitor");
            }
        }
        self.status = GateStatus::ShutDown;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(GateSnapshot {
            radio: self.radio,
            permissions: self.permissions,
            auxiliary_service: self.auxiliary_service,
            pending: self.pending,
            status: self.status,
            stream_active: self.stream_active,
            lifecycle_active: self.lifecycle_active,
        });
    }
}

/// Sends a fire-and-forget shutdown when the last [`GateHandle`] is dropped.
struct ShutdownOnDrop {
    tx: mpsc::UnboundedSender<GateCommand>,
}

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        let _ = self.tx.send(GateCommand::Shutdown { done: None });
    }
}

/// Cloneable handle for driving a running [`CapabilityGate`].
#[derive(Clone)]
pub struct GateHandle {
    tx: mpsc::UnboundedSender<GateCommand>,
    snapshot_rx: watch::Receiver<GateSnapshot>,
    _guard: Arc<ShutdownOnDrop>,
}

impl GateHandle {
    fn send(&self, command: GateCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| GateError::GateClosed("gate actor is not running".to_owned()))
    }

    /// The host became active: evaluate from the top.
    pub fn on_became_active(&self) -> Result<()> {
        self.send(GateCommand::BecameActive)
    }

    /// The host became inactive: close the stream and reset every precondition.
    ///
    /// Resolves once the stream is closed.
    pub async fn on_became_inactive(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.send(GateCommand::BecameInactive { done })?;
        wait.await
            .map_err(|_| GateError::GateClosed("gate stopped during deactivation".to_owned()))
    }

    /// Re-check every precondition. Coalesced when a remediation is pending.
    pub fn evaluate(&self) -> Result<()> {
        self.send(GateCommand::Evaluate)
    }

    /// User-initiated retry, resuming at the permission check.
    pub fn retry(&self) -> Result<()> {
        self.send(GateCommand::Retry)
    }

    #[must_use]
    pub fn snapshot(&self) -> GateSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<GateSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Wait until the published snapshot satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::GateClosed`] if the gate stops first.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<GateSnapshot>
    where
        F: FnMut(&GateSnapshot) -> bool,
    {
        let mut rx = self.watch();
        rx.wait_for(predicate)
            .await
            .map(|snapshot| snapshot.clone())
            .map_err(|_| GateError::GateClosed("gate stopped while waiting".to_owned()))
    }

    /// Close the stream, deregister the service monitor, and stop the actor.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.send(GateCommand::Shutdown { done: Some(done) })?;
        wait.await
            .map_err(|_| GateError::GateClosed("gate stopped during shutdown".to_owned()))
    }
}
