//! Token provider

use std::time::Duration;

use async_trait::async_trait;

use super::client::{ApiClient, ApiError};
use crate::models::{AccessToken, TokenRequest, TokenResponse};

/// Source of device access tokens. Implementations make one attempt per
/// call; retry policy belongs to the caller.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self, identity: &str) -> Result<AccessToken, ApiError>;
}

/// Fetches tokens from `POST /token`.
#[derive(Clone)]
pub struct HttpTokenProvider {
    client: ApiClient,
    ttl: Duration,
}

impl HttpTokenProvider {
    pub fn new(client: ApiClient, ttl: Duration) -> Self {
        Self { client, ttl }
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self, identity: &str) -> Result<AccessToken, ApiError> {
        let response: TokenResponse = self
            .client
            .post("/token", &TokenRequest {
                identity: identity.to_string(),
            })
            .await?;

        if response.token.is_empty() {
            return Err(ApiError::Parse("empty token in response".to_string()));
        }

        tracing::debug!("Fetched access token for {}", response.identity);
        Ok(AccessToken::new(response.token, response.identity, self.ttl))
    }
}
