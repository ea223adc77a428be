//! In-memory platform used by tests and the host bridge binary.
//!
//! [`SimulatedPlatform`] implements every collaborator trait from
//! [`crate::platform`] over a single mutex-protected state. Remediation and
//! dialog answers are scripted ahead of time; when a script runs dry the
//! simulated user accepts. Every interaction is appended to an ordered log so
//! tests can assert prompt ordering.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, mpsc};
use tracing::debug;

use crate::error::{GateError, Result};
use crate::events::DomainEvent;
use crate::gate::GateCollaborators;
use crate::permissions::{ApiLevel, MissingPermissionSet, Permission};
use crate::platform::{
    DialogChoice, DialogSpec, EventChannel, LOCATION_MODE_CHANGED, LocationProviders,
    NotificationCallback, NotificationHub, PeripheralInfo, PermissionGrantResult,
    PlatformCapabilities, RegistrationId, RemediationLauncher, StreamHandler, UserDialog,
};
use crate::state::RemediationOutcome;

/// Capacity of each simulated subscription channel.
const SUBSCRIPTION_CAPACITY: usize = 1024;

struct SimState {
    hardware_present: bool,
    radio_enabled: bool,
    granted: HashSet<Permission>,
    location: LocationProviders,
    platform_api: ApiLevel,
    target_api: ApiLevel,
    settings_enable_service: bool,

    radio_answers: VecDeque<bool>,
    permission_answers: VecDeque<bool>,
    dialog_answers: VecDeque<DialogChoice>,
    hold_dialogs: bool,

    log: Vec<String>,
    dialogs_shown: Vec<String>,
    radio_requests: usize,
    permission_requests: Vec<Vec<Permission>>,
    settings_opened: usize,
    in_flight: usize,
    max_in_flight: usize,

    registrations: HashMap<u64, (String, NotificationCallback)>,
    next_registration: u64,
    unregister_calls: usize,

    subscription: Option<mpsc::Sender<DomainEvent>>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    fail_next_subscribe: bool,
    peripherals: HashMap<String, PeripheralInfo>,
}

struct SimInner {
    state: Mutex<SimState>,
    dialog_release: Notify,
}

/// Scriptable in-memory platform. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimulatedPlatform {
    inner: Arc<SimInner>,
}

/// Builder for [`SimulatedPlatform`]. Defaults to every precondition satisfied.
pub struct SimulatedPlatformBuilder {
    hardware_present: bool,
    radio_enabled: bool,
    permissions_granted: bool,
    service_enabled: bool,
    platform_api: ApiLevel,
    target_api: ApiLevel,
    settings_enable_service: bool,
    peripherals: Vec<PeripheralInfo>,
}

impl Default for SimulatedPlatformBuilder {
    fn default() -> Self {
        Self {
            hardware_present: true,
            radio_enabled: true,
            permissions_granted: true,
            service_enabled: true,
            platform_api: ApiLevel(33),
            target_api: ApiLevel(33),
            settings_enable_service: false,
            peripherals: Vec::new(),
        }
    }
}

impl SimulatedPlatformBuilder {
    #[must_use]
    pub fn hardware_present(mut self, present: bool) -> Self {
        self.hardware_present = present;
        self
    }

    #[must_use]
    pub fn radio_enabled(mut self, enabled: bool) -> Self {
        self.radio_enabled = enabled;
        self
    }

    /// Grant (or revoke) every known permission up front.
    #[must_use]
    pub fn permissions_granted(mut self, granted: bool) -> Self {
        self.permissions_granted = granted;
        self
    }

    #[must_use]
    pub fn service_enabled(mut self, enabled: bool) -> Self {
        self.service_enabled = enabled;
        self
    }

    #[must_use]
    pub fn api_levels(mut self, platform: ApiLevel, target: ApiLevel) -> Self {
        self.platform_api = platform;
        self.target_api = target;
        self
    }

    /// Opening the settings surface turns the service on and broadcasts the change.
    #[must_use]
    pub fn settings_enable_service(mut self, enable: bool) -> Self {
        self.settings_enable_service = enable;
        self
    }

    #[must_use]
    pub fn peripheral(mut self, info: PeripheralInfo) -> Self {
        self.peripherals.push(info);
        self
    }

    pub fn build(self) -> SimulatedPlatform {
        let granted = if self.permissions_granted {
            Permission::all().iter().copied().collect()
        } else {
            HashSet::new()
        };
        let state = SimState {
            hardware_present: self.hardware_present,
            radio_enabled: self.radio_enabled,
            granted,
            location: providers(self.service_enabled),
            platform_api: self.platform_api,
            target_api: self.target_api,
            settings_enable_service: self.settings_enable_service,
            radio_answers: VecDeque::new(),
            permission_answers: VecDeque::new(),
            dialog_answers: VecDeque::new(),
            hold_dialogs: false,
            log: Vec::new(),
            dialogs_shown: Vec::new(),
            radio_requests: 0,
            permission_requests: Vec::new(),
            settings_opened: 0,
            in_flight: 0,
            max_in_flight: 0,
            registrations: HashMap::new(),
            next_registration: 1,
            unregister_calls: 0,
            subscription: None,
            subscribe_calls: 0,
            unsubscribe_calls: 0,
            fail_next_subscribe: false,
            peripherals: self
                .peripherals
                .into_iter()
                .map(|p| (p.address.clone(), p))
                .collect(),
        };
        SimulatedPlatform {
            inner: Arc::new(SimInner {
                state: Mutex::new(state),
                dialog_release: Notify::new(),
            }),
        }
    }
}

fn providers(enabled: bool) -> LocationProviders {
    LocationProviders {
        master: Some(enabled),
        gps: enabled,
        network: false,
    }
}

impl SimulatedPlatform {
    pub fn builder() -> SimulatedPlatformBuilder {
        SimulatedPlatformBuilder::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // ── Trait-object accessors ───────────────────────────────────────────

    pub fn capabilities(&self) -> Arc<dyn PlatformCapabilities> {
        Arc::new(self.clone())
    }

    pub fn launcher(&self) -> Arc<dyn RemediationLauncher> {
        Arc::new(self.clone())
    }

    pub fn dialog(&self) -> Arc<dyn UserDialog> {
        Arc::new(self.clone())
    }

    pub fn notifications(&self) -> Arc<dyn NotificationHub> {
        Arc::new(self.clone())
    }

    pub fn stream(&self) -> Arc<dyn StreamHandler> {
        Arc::new(self.clone())
    }

    /// Every collaborator the gate needs, all backed by this platform.
    pub fn collaborators(&self) -> GateCollaborators {
        GateCollaborators {
            platform: self.capabilities(),
            launcher: self.launcher(),
            dialog: self.dialog(),
            notifications: self.notifications(),
            stream: self.stream(),
        }
    }

    // ── Scripting ────────────────────────────────────────────────────────

    /// Queue answers for successive enable-radio flows (`true` = user enabled it).
    pub fn script_radio_answers(&self, answers: impl IntoIterator<Item = bool>) {
        self.state().radio_answers.extend(answers);
    }

    /// Queue answers for successive permission rounds (`true` = grant all).
    pub fn script_permission_answers(&self, answers: impl IntoIterator<Item = bool>) {
        self.state().permission_answers.extend(answers);
    }

    /// Queue answers for successive dialogs.
    pub fn script_dialog_answers(&self, answers: impl IntoIterator<Item = DialogChoice>) {
        self.state().dialog_answers.extend(answers);
    }

    /// While held, dialogs stay open until [`release_dialogs`](Self::release_dialogs).
    pub fn hold_dialogs(&self, hold: bool) {
        self.state().hold_dialogs = hold;
    }

    pub fn release_dialogs(&self) {
        self.state().hold_dialogs = false;
        self.inner.dialog_release.notify_waiters();
    }

    pub fn fail_next_subscribe(&self) {
        self.state().fail_next_subscribe = true;
    }

    /// Close the live subscription from the handler side, as a lost connection would.
    pub fn end_subscription(&self) {
        self.state().subscription = None;
    }

    // ── External state changes ───────────────────────────────────────────

    pub fn set_radio_enabled(&self, enabled: bool) {
        self.state().radio_enabled = enabled;
    }

    pub fn set_permission_granted(&self, permission: Permission, granted: bool) {
        let mut state = self.state();
        if granted {
            state.granted.insert(permission);
        } else {
            state.granted.remove(&permission);
        }
    }

    /// Flip the service switch and broadcast [`LOCATION_MODE_CHANGED`].
    pub fn set_service_enabled(&self, enabled: bool) {
        self.state().location = providers(enabled);
        self.broadcast(LOCATION_MODE_CHANGED);
    }

    /// Deliver `event` to every callback registered for it.
    pub fn broadcast(&self, event: &str) {
        let callbacks: Vec<NotificationCallback> = self
            .state()
            .registrations
            .values()
            .filter(|(name, _)| name == event)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        debug!(event, receivers = callbacks.len(), "simulated broadcast");
        for callback in callbacks {
            callback();
        }
    }

    /// Push an event into the live subscription. Returns `false` when none is open.
    pub fn push_event(&self, event: DomainEvent) -> bool {
        let sender = self.state().subscription.clone();
        match sender {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn is_radio_enabled_now(&self) -> bool {
        self.state().radio_enabled
    }

    pub fn is_service_enabled_now(&self) -> bool {
        let state = self.state();
        state.location.is_enabled(state.platform_api)
    }

    /// Ordered log of every remediation interaction.
    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn dialogs_shown(&self) -> Vec<String> {
        self.state().dialogs_shown.clone()
    }

    pub fn radio_requests(&self) -> usize {
        self.state().radio_requests
    }

    pub fn permission_requests(&self) -> Vec<Vec<Permission>> {
        self.state().permission_requests.clone()
    }

    pub fn settings_opened(&self) -> usize {
        self.state().settings_opened
    }

    /// Total remediation interactions of any kind.
    pub fn prompt_count(&self) -> usize {
        self.state().log.len()
    }

    /// Remediations currently running.
    pub fn prompts_in_flight(&self) -> usize {
        self.state().in_flight
    }

    /// Highest number of remediations observed running at the same time.
    pub fn max_concurrent_prompts(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn registered_callbacks(&self) -> usize {
        self.state().registrations.len()
    }

    pub fn unregister_calls(&self) -> usize {
        self.state().unregister_calls
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state().unsubscribe_calls
    }

    pub fn has_live_subscription(&self) -> bool {
        self.state().subscription.is_some()
    }

    /// Count a remediation as running until the returned guard drops.
    ///
    /// Aborted prompts drop the guard too, so the count never leaks.
    fn begin_prompt(&self, entry: String) -> InFlightPrompt {
        let mut state = self.state();
        state.log.push(entry);
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        InFlightPrompt {
            platform: self.clone(),
        }
    }
}

struct InFlightPrompt {
    platform: SimulatedPlatform,
}

impl Drop for InFlightPrompt {
    fn drop(&mut self) {
        let mut state = self.platform.state();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

impl PlatformCapabilities for SimulatedPlatform {
    fn is_radio_hardware_present(&self) -> bool {
        self.state().hardware_present
    }

    fn is_radio_enabled(&self) -> bool {
        let state = self.state();
        state.hardware_present && state.radio_enabled
    }

    fn is_permission_granted(&self, permission: Permission) -> bool {
        self.state().granted.contains(&permission)
    }

    fn is_auxiliary_service_enabled(&self) -> bool {
        self.is_service_enabled_now()
    }

    fn platform_api_level(&self) -> ApiLevel {
        self.state().platform_api
    }

    fn target_api_level(&self) -> ApiLevel {
        self.state().target_api
    }
}

#[async_trait]
impl RemediationLauncher for SimulatedPlatform {
    async fn request_enable_radio(&self) -> RemediationOutcome {
        let _prompt = self.begin_prompt("radio".to_owned());
        tokio::task::yield_now().await;
        let outcome = {
            let mut state = self.state();
            state.radio_requests += 1;
            let accept = state.radio_answers.pop_front().unwrap_or(true);
            if accept {
                state.radio_enabled = true;
                RemediationOutcome::Granted
            } else {
                RemediationOutcome::Declined
            }
        };
        outcome
    }

    async fn request_permissions(
        &self,
        permissions: &MissingPermissionSet,
    ) -> Vec<PermissionGrantResult> {
        let _prompt = self.begin_prompt(format!("permissions:{permissions}"));
        tokio::task::yield_now().await;
        let results = {
            let mut state = self.state();
            state
                .permission_requests
                .push(permissions.iter().collect());
            let grant = state.permission_answers.pop_front().unwrap_or(true);
            permissions
                .iter()
                .map(|permission| {
                    if grant {
                        state.granted.insert(permission);
                    }
                    PermissionGrantResult {
                        permission,
                        granted: grant,
                    }
                })
                .collect()
        };
        results
    }

    fn open_auxiliary_service_settings(&self) -> Result<()> {
        let enable = {
            let mut state = self.state();
            state.settings_opened += 1;
            state.log.push("settings".to_owned());
            state.settings_enable_service
        };
        if enable {
            self.set_service_enabled(true);
        }
        Ok(())
    }
}

#[async_trait]
impl UserDialog for SimulatedPlatform {
    async fn present(&self, dialog: &DialogSpec) -> DialogChoice {
        let _prompt = self.begin_prompt(format!("dialog:{}", dialog.title));
        self.state().dialogs_shown.push(dialog.title.to_owned());
        loop {
            let released = self.inner.dialog_release.notified();
            if !self.state().hold_dialogs {
                break;
            }
            released.await;
        }
        let choice = self
            .state()
            .dialog_answers
            .pop_front()
            .unwrap_or(DialogChoice::Confirm);
        choice
    }
}

impl NotificationHub for SimulatedPlatform {
    fn register(&self, event: &str, callback: NotificationCallback) -> Result<RegistrationId> {
        let mut state = self.state();
        let id = state.next_registration;
        state.next_registration += 1;
        state.registrations.insert(id, (event.to_owned(), callback));
        Ok(RegistrationId(id))
    }

    fn unregister(&self, id: RegistrationId) -> Result<()> {
        let mut state = self.state();
        state.unregister_calls += 1;
        state
            .registrations
            .remove(&id.0)
            .map(|_| ())
            .ok_or_else(|| GateError::Notification(format!("unknown registration {}", id.0)))
    }
}

#[async_trait]
impl StreamHandler for SimulatedPlatform {
    async fn subscribe(&self) -> Result<EventChannel> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_subscribe) {
            return Err(GateError::Stream("simulated subscribe failure".to_owned()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        state.subscribe_calls += 1;
        state.subscription = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        let mut state = self.state();
        state.unsubscribe_calls += 1;
        state.subscription = None;
    }

    fn peripheral(&self, address: &str) -> Option<PeripheralInfo> {
        self.state().peripherals.get(address).cloned()
    }
}
