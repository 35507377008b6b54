//! Client configuration
//!
//! Endpoint, timer and device settings for a softphone session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{Codec, DeviceOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the voice backend (token, invite and conference endpoints)
    pub api_url: String,

    /// Identity to register when none is given explicitly
    pub identity: Option<String>,

    /// Nominal lifetime of an access token in seconds
    pub token_ttl_secs: u64,

    /// How long before expiry the token is refreshed, in seconds
    pub token_refresh_lead_secs: u64,

    /// Backoff between failed refresh attempts, in seconds
    pub token_retry_secs: u64,

    /// Poll the backend for conference invites
    pub poll_invites: bool,

    /// Invite poll interval while a call is active
    pub poll_active_ms: u64,

    /// Invite poll interval while idle
    pub poll_idle_ms: u64,

    /// Delay before returning to ready after a call ends or fails
    pub error_recovery_ms: u64,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// Options passed to the telephony device
    pub device: DeviceOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            identity: None,
            token_ttl_secs: 3600,
            token_refresh_lead_secs: 60,
            token_retry_secs: 60,
            poll_invites: true,
            poll_active_ms: 3000,
            poll_idle_ms: 10000,
            error_recovery_ms: 3000,
            request_timeout_secs: 30,
            device: DeviceOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let codec_preferences = std::env::var("VOICE_CODECS")
            .ok()
            .and_then(|list| {
                list.split(',')
                    .filter(|c| !c.trim().is_empty())
                    .map(|c| c.parse::<Codec>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| tracing::warn!("Ignoring VOICE_CODECS: {}", e))
                    .ok()
            })
            .unwrap_or(defaults.device.codec_preferences);

        let device = DeviceOptions {
            codec_preferences,
            log_level: std::env::var("VOICE_DEVICE_LOG_LEVEL").unwrap_or(defaults.device.log_level),
            max_average_bitrate: std::env::var("VOICE_MAX_AVERAGE_BITRATE")
                .ok()
                .and_then(|b| b.parse().ok()),
            allow_incoming_while_busy: std::env::var("VOICE_ALLOW_INCOMING_WHILE_BUSY")
                .ok()
                .and_then(|b| b.parse().ok())
                .unwrap_or(defaults.device.allow_incoming_while_busy),
        };

        Self {
            api_url: std::env::var("VOICE_API_URL").unwrap_or(defaults.api_url),
            identity: std::env::var("VOICE_IDENTITY").ok().filter(|i| !i.trim().is_empty()),
            token_ttl_secs: std::env::var("VOICE_TOKEN_TTL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.token_ttl_secs),
            token_refresh_lead_secs: std::env::var("VOICE_TOKEN_REFRESH_LEAD_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.token_refresh_lead_secs),
            token_retry_secs: std::env::var("VOICE_TOKEN_RETRY_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.token_retry_secs),
            poll_invites: std::env::var("VOICE_POLL_INVITES")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.poll_invites),
            poll_active_ms: std::env::var("VOICE_POLL_ACTIVE_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.poll_active_ms),
            poll_idle_ms: std::env::var("VOICE_POLL_IDLE_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.poll_idle_ms),
            error_recovery_ms: std::env::var("VOICE_ERROR_RECOVERY_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.error_recovery_ms),
            request_timeout_secs: std::env::var("VOICE_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),
            device,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.api_url.trim().is_empty() {
            return Err("Voice API URL is required".to_string());
        }
        if self.token_ttl_secs == 0 {
            return Err("Token TTL must be positive".to_string());
        }
        if self.token_refresh_lead_secs >= self.token_ttl_secs {
            return Err("Token refresh lead must be shorter than the token TTL".to_string());
        }
        if self.token_retry_secs == 0 {
            return Err("Token retry backoff must be positive".to_string());
        }
        if self.poll_active_ms == 0 || self.poll_idle_ms == 0 {
            return Err("Invite poll intervals must be positive".to_string());
        }
        if self.poll_active_ms > self.poll_idle_ms {
            return Err("Active poll interval must not exceed the idle interval".to_string());
        }
        if self.device.codec_preferences.is_empty() {
            return Err("At least one codec is required".to_string());
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn token_refresh_lead(&self) -> Duration {
        Duration::from_secs(self.token_refresh_lead_secs)
    }

    pub fn token_retry(&self) -> Duration {
        Duration::from_secs(self.token_retry_secs)
    }

    /// Invite poll interval for the current call activity
    pub fn poll_interval(&self, call_active: bool) -> Duration {
        if call_active {
            Duration::from_millis(self.poll_active_ms)
        } else {
            Duration::from_millis(self.poll_idle_ms)
        }
    }

    pub fn error_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.error_recovery_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.token_ttl(), Duration::from_secs(3600));
        assert_eq!(config.device.codec_preferences, vec![Codec::Opus, Codec::Pcmu]);
    }

    #[test]
    fn test_poll_interval_shortens_during_calls() {
        let config = ClientConfig::default();
        assert!(config.poll_interval(true) < config.poll_interval(false));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.token_refresh_lead_secs = config.token_ttl_secs;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.poll_active_ms = config.poll_idle_ms + 1;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.device.codec_preferences.clear();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.api_url = " ".to_string();
        assert!(config.validate().is_err());
    }
}
