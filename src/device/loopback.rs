//! In-process loopback device
//!
//! Behaves like the hosted SDK from the session's point of view: `accept()`,
//! `reject()` and `disconnect()` emit the matching call event, `register()`
//! emits `registered`. The remote side of every call is driven explicitly
//! through [`LoopbackDevice::ring_in`], [`LoopbackDevice::remote_answer`],
//! [`LoopbackDevice::remote_hangup`] and friends, which makes it usable for
//! local runs without a telephony account and for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    Call, CallEvent, CallParams, Device, DeviceError, DeviceEvent, DeviceFactory, DeviceOptions,
    EventSender, PARAM_CALL_SID, PARAM_FROM,
};
use crate::models::CallDirection;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Failure switches applied to devices built after they are set
#[derive(Debug, Default)]
struct FailureSwitches {
    register: AtomicBool,
    connect: AtomicBool,
    disconnect: AtomicBool,
    token_update: AtomicBool,
}

/// Builds [`LoopbackDevice`]s and keeps a handle to each one.
#[derive(Default)]
pub struct LoopbackFactory {
    failures: Arc<FailureSwitches>,
    devices: Mutex<Vec<Arc<LoopbackDevice>>>,
}

impl LoopbackFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_register(&self, fail: bool) {
        self.failures.register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.failures.connect.store(fail, Ordering::SeqCst);
    }

    /// Make `disconnect()` on every call return an error
    pub fn fail_disconnect(&self, fail: bool) {
        self.failures.disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_token_update(&self, fail: bool) {
        self.failures.token_update.store(fail, Ordering::SeqCst);
    }

    pub fn devices(&self) -> Vec<Arc<LoopbackDevice>> {
        lock(&self.devices).clone()
    }

    pub fn last_device(&self) -> Option<Arc<LoopbackDevice>> {
        lock(&self.devices).last().cloned()
    }
}

impl DeviceFactory for LoopbackFactory {
    fn create(
        &self,
        token: &str,
        options: &DeviceOptions,
        events: EventSender,
    ) -> Result<Arc<dyn Device>, DeviceError> {
        if token.is_empty() {
            return Err(DeviceError::Registration("empty access token".to_string()));
        }

        let device = Arc::new(LoopbackDevice {
            token: Mutex::new(token.to_string()),
            options: options.clone(),
            events,
            failures: self.failures.clone(),
            registered: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            register_count: AtomicUsize::new(0),
            token_updates: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        });
        lock(&self.devices).push(device.clone());

        tracing::debug!("Loopback device created with codecs {:?}", options.codec_preferences);
        Ok(device)
    }
}

pub struct LoopbackDevice {
    token: Mutex<String>,
    options: DeviceOptions,
    events: EventSender,
    failures: Arc<FailureSwitches>,
    registered: AtomicBool,
    destroyed: AtomicBool,
    register_count: AtomicUsize,
    token_updates: AtomicUsize,
    calls: Mutex<Vec<Arc<LoopbackCall>>>,
}

impl LoopbackDevice {
    fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    fn ensure_alive(&self) -> Result<(), DeviceError> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(DeviceError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn new_call(&self, direction: CallDirection, mut params: CallParams) -> Arc<LoopbackCall> {
        let id = format!("CA{}", Uuid::new_v4().simple());
        params.insert(PARAM_CALL_SID, id.clone());

        let call = Arc::new(LoopbackCall {
            id,
            params,
            direction,
            events: self.events.clone(),
            failures: self.failures.clone(),
            closed: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            accepted: AtomicBool::new(false),
            media_released: AtomicBool::new(false),
        });
        lock(&self.calls).push(call.clone());
        call
    }

    fn find_call(&self, call_id: &str) -> Option<Arc<LoopbackCall>> {
        lock(&self.calls).iter().find(|c| c.id == call_id).cloned()
    }

    fn emit_call(&self, call_id: &str, event: CallEvent) {
        self.emit(DeviceEvent::Call {
            call_id: call_id.to_string(),
            event,
        });
    }

    /// Deliver an incoming call from `from`.
    pub fn ring_in(&self, from: &str, params: CallParams) -> Arc<LoopbackCall> {
        let call = self.new_call(
            CallDirection::Inbound,
            params.with(PARAM_FROM, format!("client:{}", from)),
        );
        self.emit(DeviceEvent::Incoming(call.clone()));
        call
    }

    pub fn remote_ringing(&self, call_id: &str) {
        self.emit_call(call_id, CallEvent::Ringing);
    }

    pub fn remote_answer(&self, call_id: &str) {
        if let Some(call) = self.find_call(call_id) {
            call.accepted.store(true, Ordering::SeqCst);
        }
        self.emit_call(call_id, CallEvent::Accept);
    }

    pub fn remote_hangup(&self, call_id: &str) {
        if let Some(call) = self.find_call(call_id) {
            call.closed.store(true, Ordering::SeqCst);
        }
        self.emit_call(call_id, CallEvent::Disconnect);
    }

    pub fn remote_cancel(&self, call_id: &str) {
        if let Some(call) = self.find_call(call_id) {
            call.closed.store(true, Ordering::SeqCst);
        }
        self.emit_call(call_id, CallEvent::Cancel);
    }

    /// Report a mid-call SDK error. The call itself stays open.
    pub fn fail_call(&self, call_id: &str, message: &str) {
        self.emit_call(call_id, CallEvent::Error(message.to_string()));
    }

    pub fn drop_media(&self, call_id: &str) {
        self.emit_call(call_id, CallEvent::Reconnecting);
    }

    pub fn restore_media(&self, call_id: &str) {
        self.emit_call(call_id, CallEvent::Reconnected);
    }

    /// Emit an arbitrary device event.
    pub fn emit_event(&self, event: DeviceEvent) {
        self.emit(event);
    }

    pub fn token(&self) -> String {
        lock(&self.token).clone()
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn register_count(&self) -> usize {
        self.register_count.load(Ordering::SeqCst)
    }

    pub fn token_update_count(&self) -> usize {
        self.token_updates.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Arc<LoopbackCall>> {
        lock(&self.calls).clone()
    }

    pub fn last_call(&self) -> Option<Arc<LoopbackCall>> {
        lock(&self.calls).last().cloned()
    }

    /// Calls that have not been closed by either side
    pub fn open_call_count(&self) -> usize {
        lock(&self.calls).iter().filter(|c| !c.is_closed()).count()
    }
}

#[async_trait]
impl Device for LoopbackDevice {
    async fn register(&self) -> Result<(), DeviceError> {
        self.ensure_alive()?;
        self.register_count.fetch_add(1, Ordering::SeqCst);

        if self.failures.register.load(Ordering::SeqCst) {
            return Err(DeviceError::Registration("simulated registration failure".to_string()));
        }

        self.registered.store(true, Ordering::SeqCst);
        self.emit(DeviceEvent::Registered);
        Ok(())
    }

    async fn connect(&self, params: CallParams) -> Result<Arc<dyn Call>, DeviceError> {
        self.ensure_alive()?;

        if self.failures.connect.load(Ordering::SeqCst) {
            return Err(DeviceError::Connect("simulated connect failure".to_string()));
        }

        let call = self.new_call(CallDirection::Outbound, params);
        tracing::debug!("Loopback connect {} -> {:?}", call.id, call.params.get(super::PARAM_TO));
        Ok(call)
    }

    fn update_token(&self, token: &str) -> Result<(), DeviceError> {
        self.ensure_alive()?;

        if self.failures.token_update.load(Ordering::SeqCst) {
            return Err(DeviceError::Registration("simulated token update failure".to_string()));
        }

        *lock(&self.token) = token.to_string();
        self.token_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registered.store(false, Ordering::SeqCst);
        for call in lock(&self.calls).iter() {
            call.closed.store(true, Ordering::SeqCst);
        }
    }
}

pub struct LoopbackCall {
    id: String,
    params: CallParams,
    direction: CallDirection,
    events: EventSender,
    failures: Arc<FailureSwitches>,
    closed: AtomicBool,
    muted: AtomicBool,
    accepted: AtomicBool,
    media_released: AtomicBool,
}

impl LoopbackCall {
    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(DeviceEvent::Call {
            call_id: self.id.clone(),
            event,
        });
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.is_closed() {
            Err(DeviceError::Call("call is closed".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn media_released(&self) -> bool {
        self.media_released.load(Ordering::SeqCst)
    }
}

impl Call for LoopbackCall {
    fn id(&self) -> &str {
        &self.id
    }

    fn parameters(&self) -> &CallParams {
        &self.params
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn accept(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.accepted.store(true, Ordering::SeqCst);
        self.emit(CallEvent::Accept);
        Ok(())
    }

    fn reject(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.closed.store(true, Ordering::SeqCst);
        self.emit(CallEvent::Reject);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), DeviceError> {
        if self.failures.disconnect.load(Ordering::SeqCst) {
            return Err(DeviceError::Call("simulated disconnect failure".to_string()));
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.emit(CallEvent::Disconnect);
        Ok(())
    }

    fn mute(&self, muted: bool) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    fn release_media(&self) {
        self.media_released.store(true, Ordering::SeqCst);
    }
}
