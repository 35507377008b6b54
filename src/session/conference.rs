//! Conference tagging and invite bookkeeping

use std::collections::HashSet;

use super::call::ActiveCall;
use crate::device::{
    CallParams, PARAM_CONFERENCE_NAME, PARAM_INVITE_ID, PARAM_IS_CONFERENCE, PARAM_TO,
};
use crate::error::SessionError;
use crate::models::{CallDirection, ConferenceState, Destination, IncomingInvite};

#[derive(Debug, Default)]
pub struct ConferenceCoordinator {
    state: Option<ConferenceState>,
    incoming: Option<IncomingInvite>,
    /// Invite ids already accepted or rejected
    handled: HashSet<String>,
    /// Invite ids that have been displayed at some point
    seen: HashSet<String>,
}

impl ConferenceCoordinator {
    /// Connect parameters for an outgoing call to `destination`.
    pub fn dial_params(destination: &Destination, invite_id: Option<&str>) -> CallParams {
        let mut params = CallParams::new().with(PARAM_TO, destination.to_param());

        if let Destination::Conference(name) = destination {
            params.insert(PARAM_IS_CONFERENCE, "true");
            params.insert(PARAM_CONFERENCE_NAME, name.clone());
        }
        if let Some(invite_id) = invite_id {
            params.insert(PARAM_INVITE_ID, invite_id);
        }
        params
    }

    /// Inspect an accepted call and populate the conference state if it is
    /// one. Returns whether the call is a conference.
    pub fn on_call_accepted(&mut self, active: &ActiveCall, local_identity: Option<&str>) -> bool {
        let params = active.call.parameters();
        if !active.conference && !params.is_conference() {
            self.state = None;
            return false;
        }

        let mut state = ConferenceState {
            is_conference: true,
            ..Default::default()
        };
        if let Some(me) = local_identity {
            state.add_participant(me);
        }
        if active.direction == CallDirection::Inbound {
            if let Some(caller) = active.remote_identity.as_deref() {
                state.add_participant(caller);
            }
        }
        for participant in params.participants() {
            state.add_participant(&participant);
        }

        tracing::info!(
            "Call {} joined conference {} with {} participant(s)",
            active.id(),
            params.conference_name().unwrap_or("(unnamed)"),
            state.participants.len()
        );
        self.state = Some(state);
        true
    }

    pub fn on_call_ended(&mut self) {
        self.state = None;
    }

    pub fn state(&self) -> Option<&ConferenceState> {
        self.state.as_ref()
    }

    pub fn incoming_invite(&self) -> Option<&IncomingInvite> {
        self.incoming.as_ref()
    }

    /// Remove the displayed invite so it can be acted on. It will not be
    /// displayed again.
    pub fn take_invite(&mut self) -> Result<IncomingInvite, SessionError> {
        let invite = self.incoming.take().ok_or(SessionError::NoPendingInvite)?;
        self.handled.insert(invite.invite_id.clone());
        if let Some(state) = self.state.as_mut() {
            state.pending_invites.retain(|i| i.invite_id != invite.invite_id);
        }
        Ok(invite)
    }

    /// Merge a poll result. Returns the invite to notify about, if the
    /// newest unhandled invite has never been displayed. A displayed invite
    /// is only ever replaced by a newer one.
    pub fn apply_poll(&mut self, invites: Vec<IncomingInvite>) -> Option<IncomingInvite> {
        let fresh: Vec<IncomingInvite> = invites
            .into_iter()
            .filter(|i| !self.handled.contains(&i.invite_id))
            .collect();

        if let Some(state) = self.state.as_mut() {
            state.pending_invites = fresh.clone();
        }

        let newest = fresh.last()?;
        if self.seen.contains(&newest.invite_id) {
            return None;
        }

        self.seen.insert(newest.invite_id.clone());
        self.incoming = Some(newest.clone());
        Some(newest.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite(id: &str) -> IncomingInvite {
        IncomingInvite {
            invite_id: id.to_string(),
            from: "bob".to_string(),
            to: "alice".to_string(),
        }
    }

    #[test]
    fn test_dial_params_for_conference() {
        let dest = Destination::Conference("standup".to_string());
        let params = ConferenceCoordinator::dial_params(&dest, Some("inv-1"));

        assert_eq!(params.get(PARAM_TO), Some("conference:standup"));
        assert!(params.is_conference());
        assert_eq!(params.conference_name(), Some("standup"));
        assert_eq!(params.get(PARAM_INVITE_ID), Some("inv-1"));
    }

    #[test]
    fn test_dial_params_for_direct_call() {
        let dest = Destination::Client("bob".to_string());
        let params = ConferenceCoordinator::dial_params(&dest, None);

        assert_eq!(params.get(PARAM_TO), Some("client:bob"));
        assert!(!params.is_conference());
        assert_eq!(params.get(PARAM_INVITE_ID), None);
    }

    #[test]
    fn test_same_invite_notifies_once() {
        let mut coordinator = ConferenceCoordinator::default();

        assert_eq!(coordinator.apply_poll(vec![invite("inv-1")]), Some(invite("inv-1")));
        assert_eq!(coordinator.apply_poll(vec![invite("inv-1")]), None);
        assert_eq!(coordinator.incoming_invite(), Some(&invite("inv-1")));
    }

    #[test]
    fn test_newer_invite_replaces_displayed() {
        let mut coordinator = ConferenceCoordinator::default();
        coordinator.apply_poll(vec![invite("inv-1")]);

        let shown = coordinator.apply_poll(vec![invite("inv-1"), invite("inv-2")]);
        assert_eq!(shown, Some(invite("inv-2")));
        assert_eq!(coordinator.incoming_invite().unwrap().invite_id, "inv-2");
    }

    #[test]
    fn test_older_invite_does_not_replace_newer() {
        let mut coordinator = ConferenceCoordinator::default();
        coordinator.apply_poll(vec![invite("inv-1")]);
        coordinator.apply_poll(vec![invite("inv-1"), invite("inv-2")]);

        assert_eq!(coordinator.apply_poll(vec![invite("inv-1")]), None);
        assert_eq!(coordinator.incoming_invite().unwrap().invite_id, "inv-2");
    }

    #[test]
    fn test_empty_poll_keeps_displayed_invite() {
        let mut coordinator = ConferenceCoordinator::default();
        coordinator.apply_poll(vec![invite("inv-1")]);

        assert_eq!(coordinator.apply_poll(Vec::new()), None);
        assert_eq!(coordinator.incoming_invite().unwrap().invite_id, "inv-1");
    }

    #[test]
    fn test_handled_invite_is_never_redisplayed() {
        let mut coordinator = ConferenceCoordinator::default();
        coordinator.apply_poll(vec![invite("inv-1")]);

        let taken = coordinator.take_invite().unwrap();
        assert_eq!(taken.invite_id, "inv-1");
        assert!(coordinator.incoming_invite().is_none());

        assert_eq!(coordinator.apply_poll(vec![invite("inv-1")]), None);
        assert!(coordinator.incoming_invite().is_none());
        assert!(matches!(coordinator.take_invite(), Err(SessionError::NoPendingInvite)));
    }
}
