//! VoIP softphone session
//!
//! Drives one browser-style softphone: fetches access tokens, registers a
//! telephony device, places and receives calls, tags conference calls and
//! polls for conference invites. All state lives in an explicitly owned
//! [`Softphone`] context.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod models;
pub mod session;

pub use api::{ApiClient, ApiError, HttpInviteApi, HttpTokenProvider, InviteApi, TokenProvider};
pub use config::ClientConfig;
pub use device::{Call, CallEvent, Device, DeviceError, DeviceEvent, DeviceFactory, DeviceOptions};
pub use error::SessionError;
pub use models::{CallStatus, ConferenceState, Destination, IncomingInvite};
pub use session::{SessionEvent, Softphone};
