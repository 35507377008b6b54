//! Conference invite endpoints

use async_trait::async_trait;

use super::client::{ApiClient, ApiError};
use crate::models::{
    ConferenceListResponse, ConferenceSummary, IncomingInvite, InviteActionRequest,
    InviteCheckResponse,
};

#[async_trait]
pub trait InviteApi: Send + Sync {
    /// Pending invites addressed to `identity`, oldest first.
    async fn check_invites(&self, identity: &str) -> Result<Vec<IncomingInvite>, ApiError>;

    async fn reject_invite(&self, invite_id: &str, identity: &str) -> Result<(), ApiError>;

    async fn list_conferences(&self) -> Result<Vec<ConferenceSummary>, ApiError>;
}

#[derive(Clone)]
pub struct HttpInviteApi {
    client: ApiClient,
}

impl HttpInviteApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InviteApi for HttpInviteApi {
    async fn check_invites(&self, identity: &str) -> Result<Vec<IncomingInvite>, ApiError> {
        let response: InviteCheckResponse = self
            .client
            .get_with_query("/check-invites", &[("identity", identity)])
            .await?;
        Ok(response.into_invites())
    }

    async fn reject_invite(&self, invite_id: &str, identity: &str) -> Result<(), ApiError> {
        self.client
            .post_no_response("/voice", &InviteActionRequest::reject(invite_id, identity))
            .await
    }

    async fn list_conferences(&self) -> Result<Vec<ConferenceSummary>, ApiError> {
        let response: ConferenceListResponse = self.client.get("/conferences").await?;
        Ok(response.conferences)
    }
}
