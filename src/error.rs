//! Session error taxonomy

use thiserror::Error;

use crate::api::ApiError;
use crate::device::DeviceError;

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("Token fetch failed: {0}")]
    TokenFetch(#[source] ApiError),

    #[error("Device initialization failed: {0}")]
    DeviceInit(#[source] DeviceError),

    #[error("No active call")]
    NoActiveCall,

    #[error("Device not initialized")]
    NotInitialized,

    #[error("Call error: {0}")]
    CallRuntime(#[source] DeviceError),

    #[error("Device rejected refreshed token: {0}")]
    TokenUpdate(#[source] DeviceError),

    #[error("Identity must not be empty")]
    InvalidIdentity,

    #[error("Invalid destination: {0:?}")]
    InvalidDestination(String),

    #[error("No pending conference invite")]
    NoPendingInvite,

    #[error("Invite request failed: {0}")]
    Invite(#[source] ApiError),

    #[error("Initialization superseded by a later initialize or destroy")]
    InitSuperseded,
}
