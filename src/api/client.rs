use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Authentication required")]
    Unauthorized,
    #[error("Access denied")]
    Forbidden,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Server error: {0}")]
    Server(String),
    #[error("Invalid response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}

/// JSON client for the voice backend (token, invites, conferences).
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(ApiClient {
            inner: Arc::new(ApiClientInner {
                base_url: base_url.trim_end_matches('/').to_string(),
                client,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.inner.client.get(self.url(path)).send().await?;
        self.handle_response(response).await
    }

    pub async fn get_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, ApiError> {
        let response = self.inner.client.get(self.url(path)).query(query).send().await?;
        self.handle_response(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let response = self.inner.client.post(self.url(path)).json(body).send().await?;
        self.handle_response(response).await
    }

    /// POST whose response body is not interpreted (the voice webhook may
    /// answer with TwiML or nothing at all).
    pub async fn post_no_response<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let response = self.inner.client.post(self.url(path)).json(body).send().await?;
        self.handle_empty_response(response).await
    }

    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<(), ApiError> {
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }
        Err(Self::error_for(status, response).await)
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();

        match status {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => {
                response.json::<T>().await.map_err(|e| ApiError::Parse(e.to_string()))
            }
            _ => Err(Self::error_for(status, response).await),
        }
    }

    async fn error_for(status: StatusCode, response: reqwest::Response) -> ApiError {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::Forbidden,
            StatusCode::NOT_FOUND => {
                let text = response.text().await.unwrap_or_default();
                ApiError::NotFound(text)
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                ApiError::Server(format!("{}: {}", status, text))
            }
        }
    }
}
