use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub identity: String,
}

/// Response of `POST /token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub identity: String,
}

/// Short-lived device credential. The server does not report an expiry, so
/// the nominal lifetime comes from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub identity: String,
    pub issued_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl AccessToken {
    pub fn new(token: String, identity: String, ttl: Duration) -> Self {
        Self {
            token,
            identity,
            issued_at: Utc::now(),
            ttl,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .unwrap_or(self.issued_at)
    }

    /// Delay from issue until the proactive refresh, `lead` before expiry.
    pub fn refresh_delay(&self, lead: Duration) -> Duration {
        self.ttl.saturating_sub(lead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_fires_before_expiry() {
        let token = AccessToken::new(
            "tok".to_string(),
            "alice".to_string(),
            Duration::from_secs(3600),
        );
        let delay = token.refresh_delay(Duration::from_secs(60));
        assert_eq!(delay, Duration::from_secs(3540));
        assert!(delay < token.ttl);
    }

    #[test]
    fn test_refresh_lead_longer_than_ttl_refreshes_immediately() {
        let token = AccessToken::new("tok".to_string(), "alice".to_string(), Duration::from_secs(30));
        assert_eq!(token.refresh_delay(Duration::from_secs(60)), Duration::ZERO);
    }

    #[test]
    fn test_expires_at_is_issue_plus_ttl() {
        let token = AccessToken::new("tok".to_string(), "alice".to_string(), Duration::from_secs(3600));
        assert_eq!((token.expires_at() - token.issued_at).num_seconds(), 3600);
    }
}
