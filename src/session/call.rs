//! Active call slot and its cleanup protocol

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::device::Call;
use crate::error::SessionError;
use crate::models::CallDirection;

/// The one call the session is currently handling.
pub struct ActiveCall {
    pub call: Arc<dyn Call>,
    pub direction: CallDirection,
    /// Caller identity for incoming calls, dialed target for outgoing ones
    pub remote_identity: Option<String>,
    /// Dialed as a conference
    pub conference: bool,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl ActiveCall {
    pub fn outgoing(call: Arc<dyn Call>, remote: &str, conference: bool) -> Self {
        Self {
            call,
            direction: CallDirection::Outbound,
            remote_identity: Some(remote.to_string()),
            conference,
            started_at: Utc::now(),
            connected_at: None,
        }
    }

    pub fn incoming(call: Arc<dyn Call>) -> Self {
        let remote_identity = call.parameters().caller_identity();
        Self {
            call,
            direction: CallDirection::Inbound,
            remote_identity,
            conference: false,
            started_at: Utc::now(),
            connected_at: None,
        }
    }

    pub fn id(&self) -> &str {
        self.call.id()
    }
}

#[derive(Default)]
pub struct CallSession {
    active: Option<ActiveCall>,
    muted: bool,
}

impl CallSession {
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveCall> {
        self.active.as_ref()
    }

    pub fn require(&self) -> Result<&ActiveCall, SessionError> {
        self.active.as_ref().ok_or(SessionError::NoActiveCall)
    }

    pub fn is_current(&self, call_id: &str) -> bool {
        self.active.as_ref().map(|a| a.id() == call_id).unwrap_or(false)
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn remote_identity(&self) -> Option<&str> {
        self.active.as_ref().and_then(|a| a.remote_identity.as_deref())
    }

    /// Store `call` as the active call, tearing down any call still held.
    /// Returns the call that was replaced.
    pub fn attach(&mut self, call: ActiveCall) -> Option<ActiveCall> {
        let replaced = self.cleanup();
        tracing::debug!("Active call is now {}", call.id());
        self.active = Some(call);
        replaced
    }

    /// Record the connect time on the first accept.
    pub fn mark_connected(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.connected_at.get_or_insert_with(Utc::now);
        }
    }

    pub fn toggle_mute(&mut self) -> Result<bool, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NoActiveCall)?;
        let muted = !active.call.is_muted();
        active.call.mute(muted).map_err(SessionError::CallRuntime)?;
        self.muted = muted;
        Ok(muted)
    }

    /// Release the active call. The reference is cleared before the call is
    /// touched, and failures while disconnecting are logged, never returned.
    pub fn cleanup(&mut self) -> Option<ActiveCall> {
        let ended = self.active.take()?;
        self.muted = false;

        if !ended.call.is_closed() {
            if let Err(e) = ended.call.disconnect() {
                tracing::warn!("Disconnect during cleanup of call {} failed: {}", ended.id(), e);
            }
        }
        ended.call.release_media();

        tracing::debug!("Call {} cleaned up", ended.id());
        Some(ended)
    }

    /// Time since the active call connected
    pub fn duration(&self) -> Option<Duration> {
        let connected_at = self.active.as_ref()?.connected_at?;
        (Utc::now() - connected_at).to_std().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CallParams, DeviceFactory, DeviceOptions, LoopbackFactory};
    use tokio::sync::mpsc;

    async fn outgoing_call(factory: &LoopbackFactory) -> Arc<dyn Call> {
        // Loopback ignores send failures once the receiver is gone
        let (tx, _rx) = mpsc::unbounded_channel();
        let device = factory.create("tok", &DeviceOptions::default(), tx).unwrap();
        device.connect(CallParams::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_require_without_call() {
        let mut session = CallSession::default();
        assert!(matches!(session.require(), Err(SessionError::NoActiveCall)));
        assert!(matches!(session.toggle_mute(), Err(SessionError::NoActiveCall)));
        assert!(session.cleanup().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_disconnects_and_releases_media() {
        let factory = LoopbackFactory::new();
        let call = outgoing_call(&factory).await;
        let mut session = CallSession::default();
        session.attach(ActiveCall::outgoing(call.clone(), "bob", false));

        assert!(session.toggle_mute().unwrap());
        assert!(session.is_muted());

        let ended = session.cleanup().unwrap();
        assert_eq!(ended.id(), call.id());
        assert!(call.is_closed());
        assert!(!session.is_active());
        assert!(!session.is_muted());
        assert!(factory.last_device().unwrap().last_call().unwrap().media_released());
    }

    #[tokio::test]
    async fn test_cleanup_survives_failing_disconnect() {
        let factory = LoopbackFactory::new();
        factory.fail_disconnect(true);
        let call = outgoing_call(&factory).await;
        let mut session = CallSession::default();
        session.attach(ActiveCall::outgoing(call, "bob", false));

        assert!(session.cleanup().is_some());
        assert!(!session.is_active());
        assert!(session.remote_identity().is_none());
    }

    #[tokio::test]
    async fn test_attach_replaces_previous_call() {
        let factory = LoopbackFactory::new();
        let first = outgoing_call(&factory).await;
        let second = outgoing_call(&factory).await;
        let mut session = CallSession::default();

        assert!(session.attach(ActiveCall::outgoing(first.clone(), "bob", false)).is_none());
        let replaced = session.attach(ActiveCall::outgoing(second.clone(), "carol", false));

        assert_eq!(replaced.unwrap().id(), first.id());
        assert!(first.is_closed());
        assert!(session.is_current(second.id()));
        assert_eq!(session.remote_identity(), Some("carol"));
    }

    #[tokio::test]
    async fn test_duration_starts_on_connect() {
        let factory = LoopbackFactory::new();
        let call = outgoing_call(&factory).await;
        let mut session = CallSession::default();
        session.attach(ActiveCall::outgoing(call, "bob", false));

        assert!(session.duration().is_none());
        session.mark_connected();
        assert!(session.duration().is_some());
    }
}
