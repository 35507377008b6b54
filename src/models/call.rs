use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Single source of truth for UI and control gating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    #[default]
    Closed,
    Initializing,
    Ready,
    Connecting,
    Ringing,
    Pending,
    Open,
    Reconnecting,
    Error,
    Conference,
}

impl CallStatus {
    pub fn display_name(&self) -> &str {
        match self {
            CallStatus::Closed => "Disconnected",
            CallStatus::Initializing => "Connecting...",
            CallStatus::Ready => "Phone Ready",
            CallStatus::Connecting => "Dialing...",
            CallStatus::Ringing => "Ringing...",
            CallStatus::Pending => "Incoming Call",
            CallStatus::Open => "Connected",
            CallStatus::Reconnecting => "Reconnecting...",
            CallStatus::Error => "Error",
            CallStatus::Conference => "In Conference",
        }
    }

    /// True for statuses an incoming or outgoing call has once media flows.
    pub fn is_connected(&self) -> bool {
        matches!(self, CallStatus::Open | CallStatus::Conference)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallStatus::Closed => "closed",
            CallStatus::Initializing => "initializing",
            CallStatus::Ready => "ready",
            CallStatus::Connecting => "connecting",
            CallStatus::Ringing => "ringing",
            CallStatus::Pending => "pending",
            CallStatus::Open => "open",
            CallStatus::Reconnecting => "reconnecting",
            CallStatus::Error => "error",
            CallStatus::Conference => "conference",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

const CLIENT_PREFIX: &str = "client:";
const CONFERENCE_PREFIX: &str = "conference:";

/// Parsed dial target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Another registered identity, dialed as `client:<identity>`
    Client(String),
    /// A named conference room, dialed as `conference:<name>`
    Conference(String),
    /// A PSTN number in E.164 form
    Phone(String),
}

impl Destination {
    pub fn parse(input: &str) -> Result<Self, SessionError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SessionError::InvalidDestination(input.to_string()));
        }

        if let Some(name) = input.strip_prefix(CONFERENCE_PREFIX) {
            return non_empty(name).map(Destination::Conference);
        }
        if let Some(identity) = input.strip_prefix(CLIENT_PREFIX) {
            return non_empty(identity).map(Destination::Client);
        }
        if looks_like_phone_number(input) {
            return Ok(Destination::Phone(format_e164(input)));
        }

        Ok(Destination::Client(input.to_string()))
    }

    pub fn is_conference(&self) -> bool {
        matches!(self, Destination::Conference(_))
    }

    /// Value sent as the `To` parameter of an outgoing call
    pub fn to_param(&self) -> String {
        match self {
            Destination::Client(identity) => format!("{}{}", CLIENT_PREFIX, identity),
            Destination::Conference(name) => format!("{}{}", CONFERENCE_PREFIX, name),
            Destination::Phone(number) => number.clone(),
        }
    }

    /// Name shown as the remote party
    pub fn display(&self) -> &str {
        match self {
            Destination::Client(identity) => identity,
            Destination::Conference(name) => name,
            Destination::Phone(number) => number,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_param())
    }
}

/// Strip the `client:` prefix the SDK puts on identities in `From`/`To`.
pub fn strip_client_prefix(value: &str) -> &str {
    value.strip_prefix(CLIENT_PREFIX).unwrap_or(value)
}

fn non_empty(value: &str) -> Result<String, SessionError> {
    let value = value.trim();
    if value.is_empty() {
        Err(SessionError::InvalidDestination(value.to_string()))
    } else {
        Ok(value.to_string())
    }
}

fn looks_like_phone_number(input: &str) -> bool {
    let digits = input.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 7
        && input
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'))
}

/// Format phone number to E.164
fn format_e164(number: &str) -> String {
    let cleaned: String = number.chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if cleaned.starts_with('+') {
        return cleaned;
    }

    if cleaned.len() == 10 {
        return format!("+1{}", cleaned);
    }

    if cleaned.len() == 11 && cleaned.starts_with('1') {
        return format!("+{}", cleaned);
    }

    format!("+{}", cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_identity_is_client() {
        let dest = Destination::parse("bob").unwrap();
        assert_eq!(dest, Destination::Client("bob".to_string()));
        assert_eq!(dest.to_param(), "client:bob");
        assert!(!dest.is_conference());
    }

    #[test]
    fn test_parse_prefixed_destinations() {
        assert_eq!(
            Destination::parse("client:carol").unwrap(),
            Destination::Client("carol".to_string())
        );

        let conf = Destination::parse("conference:standup").unwrap();
        assert!(conf.is_conference());
        assert_eq!(conf.to_param(), "conference:standup");
        assert_eq!(conf.display(), "standup");
    }

    #[test]
    fn test_parse_phone_numbers_to_e164() {
        assert_eq!(
            Destination::parse("(555) 123-4567").unwrap(),
            Destination::Phone("+15551234567".to_string())
        );
        assert_eq!(
            Destination::parse("+44 20 7946 0958").unwrap(),
            Destination::Phone("+442079460958".to_string())
        );
        assert_eq!(
            Destination::parse("15551234567").unwrap().to_param(),
            "+15551234567"
        );
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(
            Destination::parse("   "),
            Err(SessionError::InvalidDestination(_))
        ));
        assert!(matches!(
            Destination::parse("conference:"),
            Err(SessionError::InvalidDestination(_))
        ));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&CallStatus::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
        assert_eq!(CallStatus::Conference.to_string(), "conference");
    }

    #[test]
    fn test_status_gating() {
        assert!(CallStatus::Open.is_connected());
        assert!(CallStatus::Conference.is_connected());
        assert!(!CallStatus::Ringing.is_connected());
    }

    #[test]
    fn test_strip_client_prefix() {
        assert_eq!(strip_client_prefix("client:alice"), "alice");
        assert_eq!(strip_client_prefix("+15551234567"), "+15551234567");
    }
}
