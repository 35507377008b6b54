//! Telephony device abstraction
//!
//! The hosted calling SDK is an external collaborator. A [`DeviceFactory`]
//! builds a [`Device`] from an access token; the device places and receives
//! [`Call`]s. Lifecycle notifications from both are delivered in emission
//! order as [`DeviceEvent`]s on the channel handed to the factory.

pub mod loopback;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::strip_client_prefix;

pub use loopback::{LoopbackCall, LoopbackDevice, LoopbackFactory};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Call operation failed: {0}")]
    Call(String),

    #[error("Device destroyed")]
    Destroyed,
}

/// Audio codecs the device may negotiate, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Opus,
    Pcmu,
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "opus" => Ok(Codec::Opus),
            "pcmu" | "ulaw" => Ok(Codec::Pcmu),
            other => Err(format!("unknown codec: {}", other)),
        }
    }
}

/// Options recognised by the device at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceOptions {
    pub codec_preferences: Vec<Codec>,
    pub log_level: String,
    pub max_average_bitrate: Option<u32>,
    pub allow_incoming_while_busy: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            codec_preferences: vec![Codec::Opus, Codec::Pcmu],
            log_level: "error".to_string(),
            max_average_bitrate: None,
            allow_incoming_while_busy: false,
        }
    }
}

pub const PARAM_TO: &str = "To";
pub const PARAM_FROM: &str = "From";
pub const PARAM_CALL_SID: &str = "CallSid";
pub const PARAM_IS_CONFERENCE: &str = "isConference";
pub const PARAM_CONFERENCE_NAME: &str = "conferenceName";
pub const PARAM_PARTICIPANTS: &str = "participants";
pub const PARAM_INVITE_ID: &str = "inviteId";

/// String parameters attached to a call (SDK connect params on outgoing
/// calls, signalling params on incoming ones).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallParams(BTreeMap<String, String>);

impl CallParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Identity of the caller, without the `client:` prefix.
    pub fn caller_identity(&self) -> Option<String> {
        self.get(PARAM_FROM)
            .map(strip_client_prefix)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn is_conference(&self) -> bool {
        self.get(PARAM_IS_CONFERENCE)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn conference_name(&self) -> Option<&str> {
        self.get(PARAM_CONFERENCE_NAME)
    }

    /// Comma-separated `participants` parameter.
    pub fn participants(&self) -> Vec<String> {
        self.get(PARAM_PARTICIPANTS)
            .map(|list| {
                list.split(',')
                    .map(|p| strip_client_prefix(p.trim()).to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Per-call lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// Remote side is alerting
    Ringing,
    /// Media connected
    Accept,
    /// Media path lost; the SDK is trying to recover
    Reconnecting,
    Reconnected,
    Disconnect,
    /// Incoming call withdrawn by the caller before it was answered
    Cancel,
    Reject,
    Error(String),
}

impl CallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::Ringing => "ringing",
            CallEvent::Accept => "accept",
            CallEvent::Reconnecting => "reconnecting",
            CallEvent::Reconnected => "reconnected",
            CallEvent::Disconnect => "disconnect",
            CallEvent::Cancel => "cancel",
            CallEvent::Reject => "reject",
            CallEvent::Error(_) => "error",
        }
    }

    /// Events after which the call is over and must be cleaned up.
    pub fn ends_call(&self) -> bool {
        matches!(
            self,
            CallEvent::Disconnect | CallEvent::Cancel | CallEvent::Reject | CallEvent::Error(_)
        )
    }
}

/// Device-level notifications, including the events of its calls.
#[derive(Clone)]
pub enum DeviceEvent {
    Registered,
    Unregistered,
    TokenExpired,
    Error(String),
    Incoming(Arc<dyn Call>),
    Call { call_id: String, event: CallEvent },
}

impl DeviceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceEvent::Registered => "registered",
            DeviceEvent::Unregistered => "unregistered",
            DeviceEvent::TokenExpired => "tokenExpired",
            DeviceEvent::Error(_) => "error",
            DeviceEvent::Incoming(_) => "incoming",
            DeviceEvent::Call { event, .. } => event.name(),
        }
    }
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::Incoming(call) => f.debug_tuple("Incoming").field(&call.id()).finish(),
            DeviceEvent::Call { call_id, event } => f
                .debug_struct("Call")
                .field("call_id", call_id)
                .field("event", event)
                .finish(),
            DeviceEvent::Error(message) => f.debug_tuple("Error").field(message).finish(),
            other => f.write_str(other.name()),
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<DeviceEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DeviceEvent>;

pub trait DeviceFactory: Send + Sync {
    fn create(
        &self,
        token: &str,
        options: &DeviceOptions,
        events: EventSender,
    ) -> Result<Arc<dyn Device>, DeviceError>;
}

#[async_trait]
pub trait Device: Send + Sync {
    async fn register(&self) -> Result<(), DeviceError>;

    /// Place an outgoing call. Progress is reported through call events.
    ///
    /// The session calls this with its state lock held, so it must return
    /// once the call handle exists and never wait for its own events to be
    /// delivered.
    async fn connect(&self, params: CallParams) -> Result<Arc<dyn Call>, DeviceError>;

    fn update_token(&self, token: &str) -> Result<(), DeviceError>;

    /// Release the device. Safe to call more than once.
    fn destroy(&self);
}

pub trait Call: Send + Sync {
    fn id(&self) -> &str;

    fn parameters(&self) -> &CallParams;

    fn is_closed(&self) -> bool;

    fn accept(&self) -> Result<(), DeviceError>;

    fn reject(&self) -> Result<(), DeviceError>;

    fn disconnect(&self) -> Result<(), DeviceError>;

    fn mute(&self, muted: bool) -> Result<(), DeviceError>;

    fn is_muted(&self) -> bool;

    /// Stop local media held for this call (microphone stream, ringtone).
    fn release_media(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_identity_strips_prefix() {
        let params = CallParams::new().with(PARAM_FROM, "client:bob");
        assert_eq!(params.caller_identity().as_deref(), Some("bob"));

        let params = CallParams::new().with(PARAM_FROM, "+15551234567");
        assert_eq!(params.caller_identity().as_deref(), Some("+15551234567"));

        assert_eq!(CallParams::new().caller_identity(), None);
    }

    #[test]
    fn test_conference_params() {
        let params = CallParams::new()
            .with(PARAM_IS_CONFERENCE, "True")
            .with(PARAM_CONFERENCE_NAME, "standup")
            .with(PARAM_PARTICIPANTS, "client:alice, bob,,");

        assert!(params.is_conference());
        assert_eq!(params.conference_name(), Some("standup"));
        assert_eq!(params.participants(), vec!["alice".to_string(), "bob".to_string()]);
        assert!(!CallParams::new().is_conference());
    }

    #[test]
    fn test_ending_events() {
        assert!(CallEvent::Disconnect.ends_call());
        assert!(CallEvent::Cancel.ends_call());
        assert!(CallEvent::Reject.ends_call());
        assert!(CallEvent::Error("31005".to_string()).ends_call());
        assert!(!CallEvent::Accept.ends_call());
        assert!(!CallEvent::Reconnecting.ends_call());
    }

    #[test]
    fn test_device_options_wire_names() {
        let json = serde_json::to_value(DeviceOptions::default()).unwrap();
        assert_eq!(json["codecPreferences"], serde_json::json!(["opus", "pcmu"]));
        assert_eq!(json["allowIncomingWhileBusy"], serde_json::json!(false));
    }

    #[test]
    fn test_codec_from_str() {
        assert_eq!("OPUS".parse::<Codec>(), Ok(Codec::Opus));
        assert_eq!(" ulaw ".parse::<Codec>(), Ok(Codec::Pcmu));
        assert!("g729".parse::<Codec>().is_err());
    }
}
