//! Conference invite polling

use std::sync::Weak;

use tokio_util::sync::CancellationToken;

use super::Inner;

/// Polls the backend for invites addressed to the registered identity.
/// Polls faster while a call is active so join requests show up promptly.
pub(super) struct InvitePoller {
    session: Weak<Inner>,
    identity: String,
    cancel: CancellationToken,
}

impl InvitePoller {
    pub(super) fn new(session: Weak<Inner>, identity: String, cancel: CancellationToken) -> Self {
        Self {
            session,
            identity,
            cancel,
        }
    }

    pub(super) async fn run(self) {
        tracing::debug!("Invite polling started for {}", self.identity);

        loop {
            let interval = match self.session.upgrade() {
                Some(session) => session.poll_interval().await,
                None => break,
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let Some(session) = self.session.upgrade() else {
                break;
            };

            match session.invites.check_invites(&self.identity).await {
                Ok(invites) => session.apply_invites(invites, &self.cancel).await,
                Err(e) => tracing::debug!("Invite poll for {} failed: {}", self.identity, e),
            }
        }

        tracing::debug!("Invite polling stopped for {}", self.identity);
    }
}
