//! Softphone session
//!
//! [`Softphone`] is the explicitly owned session context. It holds the
//! device session, the active call and the conference state behind a single
//! mutex. User actions, device events and timer callbacks all go through
//! that mutex, so state changes apply one at a time in the order they
//! arrive. Background tasks (event pump, token refresh, invite polling,
//! status recovery) hold only a weak reference to the session and a child
//! of the device session's cancellation token.

mod call;
mod conference;
mod device;
mod poller;


use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ApiError, HttpInviteApi, HttpTokenProvider, InviteApi, TokenProvider};
use crate::config::ClientConfig;
use crate::device::{Call, CallEvent, Device, DeviceEvent, DeviceFactory, EventReceiver};
use crate::error::SessionError;
use crate::models::{
    AccessToken, CallStatus, ConferenceState, ConferenceSummary, Destination, IncomingInvite,
};

pub use call::{ActiveCall, CallSession};
pub use conference::ConferenceCoordinator;
pub use device::DeviceSession;

use device::TokenRefresher;
use poller::InvitePoller;

const EVENT_CAPACITY: usize = 64;

/// Notifications for whoever renders the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StatusChanged(CallStatus),
    IncomingCall { from: String },
    InviteReceived(IncomingInvite),
    Error(String),
}

#[derive(Default)]
struct SessionState {
    identity: Option<String>,
    device: DeviceSession,
    call: CallSession,
    conference: ConferenceCoordinator,
    last_error: Option<String>,
    /// Bumped whenever a recovery is scheduled; older ones stand down
    recovery_epoch: u64,
    /// Bumped by `initialize` and `destroy`; an in-flight initialize only
    /// attaches its device if the epoch is unchanged
    init_epoch: u64,
}

struct RegisteredDevice {
    device: Arc<dyn Device>,
    token: AccessToken,
    events: EventReceiver,
}

struct Inner {
    config: ClientConfig,
    tokens: Arc<dyn TokenProvider>,
    invites: Arc<dyn InviteApi>,
    devices: Arc<dyn DeviceFactory>,
    state: Mutex<SessionState>,
    status_tx: watch::Sender<CallStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
}

/// Handle to a softphone session. Clones share the same session.
#[derive(Clone)]
pub struct Softphone {
    inner: Arc<Inner>,
}

impl Softphone {
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        invites: Arc<dyn InviteApi>,
        devices: Arc<dyn DeviceFactory>,
    ) -> Self {
        let (status_tx, _) = watch::channel(CallStatus::Closed);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                config,
                tokens,
                invites,
                devices,
                state: Mutex::new(SessionState::default()),
                status_tx,
                events_tx,
            }),
        }
    }

    /// Session backed by the HTTP token and invite endpoints at
    /// `config.api_url`.
    pub fn from_config(config: ClientConfig, devices: Arc<dyn DeviceFactory>) -> Result<Self, ApiError> {
        let client = ApiClient::new(&config.api_url, config.request_timeout())?;
        let tokens = Arc::new(HttpTokenProvider::new(client.clone(), config.token_ttl()));
        let invites = Arc::new(HttpInviteApi::new(client));
        Ok(Self::new(config, tokens, invites, devices))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn status(&self) -> CallStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<CallStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Fetch a token for `identity`, build and register the device.
    /// An existing device session is torn down first. The session lock is
    /// not held while the token is fetched or the device registers; a
    /// `destroy` or another `initialize` in the meantime wins and this call
    /// returns [`SessionError::InitSuperseded`].
    pub async fn initialize(&self, identity: &str) -> Result<(), SessionError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(SessionError::InvalidIdentity);
        }

        let inner = &self.inner;
        let epoch = {
            let mut guard = inner.state.lock().await;
            let state = &mut *guard;

            if state.device.is_initialized() {
                tracing::info!("Replacing device session for {:?}", state.identity);
                inner.teardown(state);
            }

            state.init_epoch += 1;
            state.last_error = None;
            inner.set_status(CallStatus::Initializing);
            state.init_epoch
        };
        tracing::info!("Initializing device for {}", identity);

        let built = inner.build_device(identity).await;

        let mut guard = inner.state.lock().await;
        let state = &mut *guard;

        if state.init_epoch != epoch {
            if let Ok(registered) = &built {
                registered.device.destroy();
            }
            tracing::info!("Initialization for {} was superseded", identity);
            return Err(SessionError::InitSuperseded);
        }

        match built {
            Ok(registered) => {
                state.device.attach(registered.device, registered.token);
                state.identity = Some(identity.to_string());
                inner.spawn_session_tasks(state, identity, registered.events);
                inner.set_status(CallStatus::Ready);
                tracing::info!("Device registered as {}", identity);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Device initialization for {} failed: {}", identity, e);
                inner.record_error(state, &e.to_string());
                inner.set_status(CallStatus::Error);
                Err(e)
            }
        }
    }

    /// Tear down the device session. Safe to call at any time, any number
    /// of times. An `initialize` still in flight is abandoned.
    pub async fn destroy(&self) {
        let mut guard = self.inner.state.lock().await;
        guard.init_epoch += 1;
        self.inner.teardown(&mut guard);
    }

    pub async fn make_call(&self, destination: &str) -> Result<(), SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        state.device.device()?;
        let destination = Destination::parse(destination)?;
        self.inner.dial(state, destination, None).await
    }

    pub async fn answer_call(&self) -> Result<(), SessionError> {
        let guard = self.inner.state.lock().await;
        let active = guard.call.require()?;
        tracing::info!("Answering call {}", active.id());
        active.call.accept().map_err(SessionError::CallRuntime)
    }

    pub async fn reject_call(&self) -> Result<(), SessionError> {
        let guard = self.inner.state.lock().await;
        let active = guard.call.require()?;
        tracing::info!("Rejecting call {}", active.id());
        active.call.reject().map_err(SessionError::CallRuntime)
    }

    /// Hang up. The disconnect event finishes the call; if the disconnect
    /// itself fails no event will come, so the call is finished here.
    pub async fn end_call(&self) -> Result<(), SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let call = state.call.require()?.call.clone();
        tracing::info!("Ending call {}", call.id());

        if let Err(e) = call.disconnect() {
            tracing::warn!("Disconnect of call {} failed, cleaning up locally: {}", call.id(), e);
            self.inner.finish_call(state, CallStatus::Closed);
            return Err(SessionError::CallRuntime(e));
        }
        Ok(())
    }

    /// Flip mute on the active call. Returns the new mute state.
    pub async fn toggle_mute(&self) -> Result<bool, SessionError> {
        let mut guard = self.inner.state.lock().await;
        let muted = guard.call.toggle_mute()?;
        tracing::debug!("Mute {}", if muted { "on" } else { "off" });
        Ok(muted)
    }

    /// Dial into the conference named by the displayed invite.
    pub async fn accept_conference_invite(&self) -> Result<(), SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        state.device.device()?;
        let invite = state.conference.take_invite()?;
        tracing::info!("Accepting invite {} from {}", invite.invite_id, invite.from);

        let destination = Destination::Conference(invite.invite_id.clone());
        self.inner.dial(state, destination, Some(&invite.invite_id)).await
    }

    /// Decline the displayed invite without dialing.
    pub async fn reject_conference_invite(&self) -> Result<(), SessionError> {
        let (invite, identity) = {
            let mut guard = self.inner.state.lock().await;
            let identity = guard.identity.clone().ok_or(SessionError::NotInitialized)?;
            (guard.conference.take_invite()?, identity)
        };

        tracing::info!("Rejecting invite {} from {}", invite.invite_id, invite.from);
        self.inner
            .invites
            .reject_invite(&invite.invite_id, &identity)
            .await
            .map_err(SessionError::Invite)
    }

    pub async fn list_conferences(&self) -> Result<Vec<ConferenceSummary>, SessionError> {
        self.inner.invites.list_conferences().await.map_err(SessionError::Invite)
    }

    /// Apply a device event directly. Events from the device registered by
    /// [`Softphone::initialize`] are delivered automatically.
    pub async fn handle_event(&self, event: DeviceEvent) {
        self.inner.dispatch(event, None).await;
    }

    pub async fn identity(&self) -> Option<String> {
        self.inner.state.lock().await.identity.clone()
    }

    pub async fn has_active_call(&self) -> bool {
        self.inner.state.lock().await.call.is_active()
    }

    pub async fn active_call_id(&self) -> Option<String> {
        let state = self.inner.state.lock().await;
        state.call.active().map(|a| a.id().to_string())
    }

    pub async fn remote_identity(&self) -> Option<String> {
        let state = self.inner.state.lock().await;
        state.call.remote_identity().map(str::to_string)
    }

    pub async fn is_muted(&self) -> bool {
        self.inner.state.lock().await.call.is_muted()
    }

    pub async fn call_duration(&self) -> Option<Duration> {
        self.inner.state.lock().await.call.duration()
    }

    pub async fn incoming_invite(&self) -> Option<IncomingInvite> {
        self.inner.state.lock().await.conference.incoming_invite().cloned()
    }

    pub async fn conference(&self) -> Option<ConferenceState> {
        self.inner.state.lock().await.conference.state().cloned()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.state.lock().await.last_error.clone()
    }
}

impl Inner {
    fn status(&self) -> CallStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&self, status: CallStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            tracing::debug!("Status -> {}", status);
            let _ = self.events_tx.send(SessionEvent::StatusChanged(status));
        }
    }

    fn record_error(&self, state: &mut SessionState, message: &str) {
        state.last_error = Some(message.to_string());
        let _ = self.events_tx.send(SessionEvent::Error(message.to_string()));
    }

    /// Token fetch, device construction and registration. Runs without
    /// the session lock.
    async fn build_device(&self, identity: &str) -> Result<RegisteredDevice, SessionError> {
        let token = self
            .tokens
            .fetch_token(identity)
            .await
            .map_err(SessionError::TokenFetch)?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let device = self
            .devices
            .create(&token.token, &self.config.device, events_tx)
            .map_err(SessionError::DeviceInit)?;

        if let Err(e) = device.register().await {
            device.destroy();
            return Err(SessionError::DeviceInit(e));
        }

        Ok(RegisteredDevice {
            device,
            token,
            events,
        })
    }

    fn spawn_session_tasks(self: &Arc<Self>, state: &SessionState, identity: &str, events: EventReceiver) {
        let (Some(timers), Some(token)) = (state.device.timers(), state.device.token()) else {
            return;
        };

        tokio::spawn(pump_events(Arc::downgrade(self), events, timers.child_token()));

        let first_refresh = token.refresh_delay(self.config.token_refresh_lead());
        tokio::spawn(
            TokenRefresher::new(
                Arc::downgrade(self),
                identity.to_string(),
                first_refresh,
                timers.child_token(),
            )
            .run(),
        );

        if self.config.poll_invites {
            tokio::spawn(
                InvitePoller::new(Arc::downgrade(self), identity.to_string(), timers.child_token()).run(),
            );
        }
    }

    /// Release everything tied to the device session and return to closed.
    fn teardown(&self, state: &mut SessionState) {
        self.end_active_call(state);
        if state.device.destroy() {
            tracing::info!("Device session for {:?} destroyed", state.identity);
        }
        state.conference = ConferenceCoordinator::default();
        state.identity = None;
        self.set_status(CallStatus::Closed);
    }

    fn end_active_call(&self, state: &mut SessionState) {
        if let Some(ended) = state.call.cleanup() {
            state.conference.on_call_ended();
            tracing::info!(
                "Call {} with {} finished",
                ended.id(),
                ended.remote_identity.as_deref().unwrap_or("unknown")
            );
        }
    }

    /// Clean up the active call, show `status`, and return to ready after
    /// the recovery delay.
    fn finish_call(self: &Arc<Self>, state: &mut SessionState, status: CallStatus) {
        self.end_active_call(state);
        self.set_status(status);
        self.schedule_recovery(state);
    }

    fn schedule_recovery(self: &Arc<Self>, state: &mut SessionState) {
        let Some(cancel) = state.device.timers().map(CancellationToken::child_token) else {
            return;
        };

        state.recovery_epoch += 1;
        let epoch = state.recovery_epoch;
        let session = Arc::downgrade(self);
        let delay = self.config.error_recovery_delay();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(inner) = session.upgrade() {
                inner.recover(epoch, &cancel).await;
            }
        });
    }

    async fn recover(&self, epoch: u64, cancel: &CancellationToken) {
        let state = self.state.lock().await;
        if cancel.is_cancelled() || state.recovery_epoch != epoch {
            return;
        }

        if state.device.is_ready()
            && !state.call.is_active()
            && matches!(self.status(), CallStatus::Closed | CallStatus::Error)
        {
            self.set_status(CallStatus::Ready);
        }
    }

    async fn dial(
        self: &Arc<Self>,
        state: &mut SessionState,
        destination: Destination,
        invite_id: Option<&str>,
    ) -> Result<(), SessionError> {
        let device = state.device.device()?;

        if state.call.is_active() {
            tracing::info!("Ending current call before dialing {}", destination);
            self.end_active_call(state);
        }

        let params = ConferenceCoordinator::dial_params(&destination, invite_id);
        self.set_status(CallStatus::Connecting);
        tracing::info!("Dialing {}", destination);

        match device.connect(params).await {
            Ok(call) => {
                tracing::debug!("Outgoing call {} created", call.id());
                state.call.attach(ActiveCall::outgoing(
                    call,
                    destination.display(),
                    destination.is_conference(),
                ));
                Ok(())
            }
            Err(e) => {
                tracing::error!("Dialing {} failed: {}", destination, e);
                self.record_error(state, &e.to_string());
                self.finish_call(state, CallStatus::Error);
                Err(SessionError::CallRuntime(e))
            }
        }
    }

    /// Event dispatch. `guard` is the cancellation token of the device
    /// session the event came from; events from a torn-down session are
    /// dropped.
    async fn dispatch(self: &Arc<Self>, event: DeviceEvent, guard: Option<&CancellationToken>) {
        let mut locked = self.state.lock().await;
        let state = &mut *locked;

        if guard.map(|g| g.is_cancelled()).unwrap_or(false) {
            tracing::debug!("Dropping {} event from a torn-down device", event.name());
            return;
        }
        tracing::debug!("Device event: {:?}", event);

        match event {
            DeviceEvent::Registered => state.device.set_registered(true),
            DeviceEvent::Unregistered => {
                tracing::info!("Device unregistered");
                self.teardown(state);
            }
            DeviceEvent::TokenExpired => {
                tracing::warn!("Access token expired");
                self.teardown(state);
                self.record_error(state, "Access token expired");
            }
            DeviceEvent::Error(message) => self.on_device_error(state, message),
            DeviceEvent::Incoming(call) => self.on_incoming(state, call),
            DeviceEvent::Call { call_id, event } => self.on_call_event(state, &call_id, event),
        }
    }

    fn on_device_error(self: &Arc<Self>, state: &mut SessionState, message: String) {
        tracing::error!("Device error: {}", message);
        self.record_error(state, &message);

        if state.device.is_initialized() && !state.call.is_active() {
            self.set_status(CallStatus::Error);
            self.schedule_recovery(state);
        }
    }

    fn on_incoming(&self, state: &mut SessionState, call: Arc<dyn Call>) {
        if !state.device.is_initialized() {
            tracing::warn!("Incoming call {} without a device session, rejecting", call.id());
            if let Err(e) = call.reject() {
                tracing::warn!("Reject of call {} failed: {}", call.id(), e);
            }
            return;
        }

        if state.call.is_active() {
            tracing::info!("Incoming call {} replaces the active call", call.id());
            self.end_active_call(state);
        }

        let active = ActiveCall::incoming(call);
        let from = active
            .remote_identity
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        tracing::info!("Incoming call {} from {}", active.id(), from);

        state.call.attach(active);
        self.set_status(CallStatus::Pending);
        let _ = self.events_tx.send(SessionEvent::IncomingCall { from });
    }

    fn on_call_event(self: &Arc<Self>, state: &mut SessionState, call_id: &str, event: CallEvent) {
        if !state.call.is_current(call_id) {
            tracing::debug!("Ignoring {} for stale call {}", event.name(), call_id);
            return;
        }

        if event.ends_call() {
            self.on_call_ended(state, call_id, event);
            return;
        }

        match event {
            CallEvent::Ringing => {
                if self.status() == CallStatus::Connecting {
                    self.set_status(CallStatus::Ringing);
                }
            }
            CallEvent::Accept => {
                state.call.mark_connected();
                let is_conference = match state.call.active() {
                    Some(active) => state.conference.on_call_accepted(active, state.identity.as_deref()),
                    None => false,
                };
                tracing::info!("Call {} connected", call_id);
                self.set_status(if is_conference {
                    CallStatus::Conference
                } else {
                    CallStatus::Open
                });
            }
            CallEvent::Reconnecting => {
                if self.status().is_connected() {
                    tracing::warn!("Call {} lost media, reconnecting", call_id);
                    self.set_status(CallStatus::Reconnecting);
                }
            }
            CallEvent::Reconnected => {
                if self.status() == CallStatus::Reconnecting {
                    tracing::info!("Call {} reconnected", call_id);
                    self.set_status(if state.conference.state().is_some() {
                        CallStatus::Conference
                    } else {
                        CallStatus::Open
                    });
                }
            }
            _ => {}
        }
    }

    fn on_call_ended(self: &Arc<Self>, state: &mut SessionState, call_id: &str, event: CallEvent) {
        match event {
            CallEvent::Error(message) => {
                tracing::error!("Call {} failed: {}", call_id, message);
                self.record_error(state, &message);
                self.finish_call(state, CallStatus::Error);
            }
            other => {
                tracing::info!("Call {} ended ({})", call_id, other.name());
                self.finish_call(state, CallStatus::Closed);
            }
        }
    }

    /// One token refresh attempt. Returns the delay until the next one.
    async fn refresh_token(&self, identity: &str, cancel: &CancellationToken) -> Result<Duration, SessionError> {
        let token = self
            .tokens
            .fetch_token(identity)
            .await
            .map_err(SessionError::TokenFetch)?;

        let mut state = self.state.lock().await;
        let next = token.refresh_delay(self.config.token_refresh_lead());
        if cancel.is_cancelled() {
            return Ok(next);
        }

        let expires_at = token.expires_at();
        state.device.apply_token(token).map_err(SessionError::TokenUpdate)?;
        tracing::info!(
            "Access token for {} refreshed, valid until {}, next refresh in {:?}",
            identity,
            expires_at,
            next
        );
        Ok(next)
    }

    async fn poll_interval(&self) -> Duration {
        let state = self.state.lock().await;
        self.config.poll_interval(state.call.is_active())
    }

    async fn apply_invites(&self, invites: Vec<IncomingInvite>, cancel: &CancellationToken) {
        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            return;
        }

        if let Some(invite) = state.conference.apply_poll(invites) {
            tracing::info!("Conference invite {} from {}", invite.invite_id, invite.from);
            let _ = self.events_tx.send(SessionEvent::InviteReceived(invite));
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.device.is_initialized() {
            tracing::info!("Softphone session shutting down");
        }
        state.call.cleanup();
        state.device.destroy();
    }
}

/// Drains the device's event channel into the session, in order.
async fn pump_events(session: Weak<Inner>, mut events: EventReceiver, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.dispatch(event, Some(&cancel)).await;
    }
    tracing::debug!("Device event pump stopped");
}
