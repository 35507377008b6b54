//! Device registration and token lifetime

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::Inner;
use crate::device::{Device, DeviceError};
use crate::error::SessionError;
use crate::models::AccessToken;

/// The registered device, its current token and the timers tied to it.
#[derive(Default)]
pub struct DeviceSession {
    device: Option<Arc<dyn Device>>,
    token: Option<AccessToken>,
    registered: bool,
    timers: Option<CancellationToken>,
}

impl DeviceSession {
    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.device.is_some() && self.registered
    }

    /// The device, if it is registered and can place calls.
    pub fn device(&self) -> Result<Arc<dyn Device>, SessionError> {
        match &self.device {
            Some(device) if self.registered => Ok(device.clone()),
            _ => Err(SessionError::NotInitialized),
        }
    }

    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    /// Take ownership of a freshly registered device. Returns the parent
    /// cancellation token for every timer of this device session.
    pub fn attach(&mut self, device: Arc<dyn Device>, token: AccessToken) -> CancellationToken {
        self.destroy();

        let timers = CancellationToken::new();
        self.device = Some(device);
        self.token = Some(token);
        self.registered = true;
        self.timers = Some(timers.clone());
        timers
    }

    pub fn set_registered(&mut self, registered: bool) {
        if self.device.is_some() {
            self.registered = registered;
        }
    }

    pub fn timers(&self) -> Option<&CancellationToken> {
        self.timers.as_ref()
    }

    /// Push a refreshed token into the live device.
    pub fn apply_token(&mut self, token: AccessToken) -> Result<(), DeviceError> {
        let device = self.device.as_ref().ok_or(DeviceError::Destroyed)?;
        device.update_token(&token.token)?;
        self.token = Some(token);
        Ok(())
    }

    /// Cancel timers and release the device. Returns false when there was
    /// nothing to release.
    pub fn destroy(&mut self) -> bool {
        if let Some(timers) = self.timers.take() {
            timers.cancel();
        }
        self.token = None;
        self.registered = false;

        match self.device.take() {
            Some(device) => {
                device.destroy();
                true
            }
            None => false,
        }
    }
}

/// Background task that refreshes the access token `lead` before it
/// expires, retrying after a fixed backoff until it succeeds.
pub(super) struct TokenRefresher {
    session: Weak<Inner>,
    identity: String,
    first_delay: Duration,
    cancel: CancellationToken,
}

impl TokenRefresher {
    pub(super) fn new(
        session: Weak<Inner>,
        identity: String,
        first_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            identity,
            first_delay,
            cancel,
        }
    }

    pub(super) async fn run(self) {
        let mut delay = self.first_delay;
        tracing::debug!("Token refresh for {} scheduled in {:?}", self.identity, delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(session) = self.session.upgrade() else {
                break;
            };

            delay = match session.refresh_token(&self.identity, &self.cancel).await {
                Ok(next) => next,
                Err(e) => {
                    let retry = session.config.token_retry();
                    tracing::warn!(
                        "Token refresh for {} failed, retrying in {:?}: {}",
                        self.identity,
                        retry,
                        e
                    );
                    retry
                }
            };
        }

        tracing::debug!("Token refresh for {} stopped", self.identity);
    }
}
