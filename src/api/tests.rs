//! HTTP client tests against an in-process mock of the voice backend

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use super::*;

#[derive(Clone, Default)]
struct MockBackend {
    voice_posts: Arc<Mutex<Vec<Value>>>,
}

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn issue_token(Json(body): Json<Value>) -> Json<Value> {
    let identity = body["identity"].as_str().unwrap_or_default().to_string();
    Json(json!({ "token": format!("token-for-{}", identity), "identity": identity }))
}

async fn check_invites(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    match params.get("identity").map(String::as_str) {
        Some("alice") => Json(json!({
            "hasInvites": true,
            "invites": [
                { "inviteId": "inv-1", "from": "bob", "to": "alice" },
                { "inviteId": "inv-2", "from": "carol", "to": "alice" }
            ]
        })),
        _ => Json(json!({ "hasInvites": false, "invites": [] })),
    }
}

async fn voice(State(backend): State<MockBackend>, Json(body): Json<Value>) -> StatusCode {
    backend.voice_posts.lock().unwrap().push(body);
    StatusCode::OK
}

async fn conferences() -> Json<Value> {
    Json(json!({
        "conferences": [
            { "sid": "CF1", "friendlyName": "standup", "status": "in-progress", "participantCount": 3 },
            { "id": "CF2" }
        ]
    }))
}

fn backend_router(backend: MockBackend) -> Router {
    Router::new()
        .route("/token", post(issue_token))
        .route("/check-invites", get(check_invites))
        .route("/voice", post(voice))
        .route("/conferences", get(conferences))
        .with_state(backend)
}

fn client(base_url: &str) -> ApiClient {
    ApiClient::new(base_url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_fetch_token() {
    let base_url = spawn_server(backend_router(MockBackend::default())).await;
    let provider = HttpTokenProvider::new(client(&base_url), Duration::from_secs(3600));

    let token = provider.fetch_token("alice").await.unwrap();
    assert_eq!(token.token, "token-for-alice");
    assert_eq!(token.identity, "alice");
    assert_eq!(token.ttl, Duration::from_secs(3600));
}

#[tokio::test]
async fn test_fetch_token_non_success_is_error() {
    let router = Router::new().route(
        "/token",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base_url = spawn_server(router).await;
    let provider = HttpTokenProvider::new(client(&base_url), Duration::from_secs(3600));

    let err = provider.fetch_token("alice").await.unwrap_err();
    assert!(matches!(err, ApiError::Server(ref msg) if msg.contains("boom")));
}

#[tokio::test]
async fn test_fetch_token_unauthorized() {
    let router = Router::new().route("/token", post(|| async { StatusCode::UNAUTHORIZED }));
    let base_url = spawn_server(router).await;
    let provider = HttpTokenProvider::new(client(&base_url), Duration::from_secs(3600));

    assert!(matches!(
        provider.fetch_token("alice").await,
        Err(ApiError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_fetch_token_network_error() {
    // Bind and drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider = HttpTokenProvider::new(
        client(&format!("http://{}", addr)),
        Duration::from_secs(3600),
    );
    assert!(matches!(
        provider.fetch_token("alice").await,
        Err(ApiError::Network(_))
    ));
}

#[tokio::test]
async fn test_fetch_token_malformed_body() {
    let router = Router::new().route("/token", post(|| async { Json(json!({ "nope": true })) }));
    let base_url = spawn_server(router).await;
    let provider = HttpTokenProvider::new(client(&base_url), Duration::from_secs(3600));

    assert!(matches!(
        provider.fetch_token("alice").await,
        Err(ApiError::Parse(_))
    ));
}

#[tokio::test]
async fn test_check_invites() {
    let base_url = spawn_server(backend_router(MockBackend::default())).await;
    let api = HttpInviteApi::new(client(&base_url));

    let invites = api.check_invites("alice").await.unwrap();
    assert_eq!(invites.len(), 2);
    assert_eq!(invites[0].invite_id, "inv-1");
    assert_eq!(invites[1].from, "carol");

    assert!(api.check_invites("dave").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reject_invite_posts_action() {
    let backend = MockBackend::default();
    let base_url = spawn_server(backend_router(backend.clone())).await;
    let api = HttpInviteApi::new(client(&base_url));

    api.reject_invite("inv-9", "alice").await.unwrap();

    let posts = backend.voice_posts.lock().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0], json!({ "inviteId": "inv-9", "action": "reject", "identity": "alice" }));
}

#[tokio::test]
async fn test_list_conferences() {
    let base_url = spawn_server(backend_router(MockBackend::default())).await;
    let api = HttpInviteApi::new(client(&base_url));

    let conferences = api.list_conferences().await.unwrap();
    assert_eq!(conferences.len(), 2);
    assert_eq!(conferences[0].id, "CF1");
    assert_eq!(conferences[0].name, "standup");
    assert_eq!(conferences[0].participant_count, Some(3));
    assert_eq!(conferences[1].name, "");
}

#[tokio::test]
async fn test_base_url_trailing_slash_is_trimmed() {
    let base_url = spawn_server(backend_router(MockBackend::default())).await;
    let api = client(&format!("{}/", base_url));
    assert_eq!(api.base_url(), base_url);

    let provider = HttpTokenProvider::new(api, Duration::from_secs(60));
    assert!(provider.fetch_token("bob").await.is_ok());
}
