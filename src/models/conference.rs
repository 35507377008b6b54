use serde::{Deserialize, Serialize};

/// A pending request for this identity to join a call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingInvite {
    #[serde(rename = "inviteId")]
    pub invite_id: String,
    pub from: String,
    pub to: String,
}

/// Metadata for a conference-tagged active call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConferenceState {
    #[serde(rename = "isConference")]
    pub is_conference: bool,
    pub participants: Vec<String>,
    #[serde(rename = "pendingInvites")]
    pub pending_invites: Vec<IncomingInvite>,
}

impl ConferenceState {
    pub fn add_participant(&mut self, identity: &str) {
        if !identity.is_empty() && !self.participants.iter().any(|p| p == identity) {
            self.participants.push(identity.to_string());
        }
    }
}

/// Response of `GET /check-invites`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InviteCheckResponse {
    #[serde(rename = "hasInvites", default)]
    pub has_invites: bool,
    #[serde(default)]
    pub invites: Vec<IncomingInvite>,
}

impl InviteCheckResponse {
    /// The listed invites. `hasInvites` is advisory and may be missing.
    pub fn into_invites(self) -> Vec<IncomingInvite> {
        if !self.has_invites && !self.invites.is_empty() {
            tracing::debug!("Invite response lists {} invite(s) without hasInvites", self.invites.len());
        }
        self.invites
    }
}

/// Body of `POST /voice` for invite actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteActionRequest {
    #[serde(rename = "inviteId")]
    pub invite_id: String,
    pub action: String,
    pub identity: String,
}

impl InviteActionRequest {
    pub fn reject(invite_id: &str, identity: &str) -> Self {
        Self {
            invite_id: invite_id.to_string(),
            action: "reject".to_string(),
            identity: identity.to_string(),
        }
    }
}

/// One entry of `GET /conferences`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConferenceSummary {
    #[serde(alias = "sid")]
    pub id: String,
    #[serde(default, alias = "friendlyName")]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "participantCount", default)]
    pub participant_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConferenceListResponse {
    #[serde(default)]
    pub conferences: Vec<ConferenceSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invites_without_has_invites_flag() {
        let response: InviteCheckResponse = serde_json::from_str(
            r#"{"invites":[{"inviteId":"inv-1","from":"bob","to":"alice"}]}"#,
        )
        .unwrap();

        let invites = response.into_invites();
        assert_eq!(invites.len(), 1);
        assert_eq!(invites[0].invite_id, "inv-1");
    }

    #[test]
    fn test_empty_invite_response() {
        let response: InviteCheckResponse = serde_json::from_str(r#"{"hasInvites":false}"#).unwrap();
        assert!(response.into_invites().is_empty());
    }

    #[test]
    fn test_conference_summary_aliases() {
        let summary: ConferenceSummary = serde_json::from_str(
            r#"{"sid":"CF1","friendlyName":"standup","participantCount":2}"#,
        )
        .unwrap();

        assert_eq!(summary.id, "CF1");
        assert_eq!(summary.name, "standup");
        assert_eq!(summary.participant_count, Some(2));
    }
}
