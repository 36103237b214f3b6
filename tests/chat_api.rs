use async_trait::async_trait;
use axum::body::{ to_bytes, Body };
use axum::http::{ header, Request, StatusCode };
use axum::Router;
use serde_json::{ json, Value };
use session_chat::agent::{ AgentSettings, ChatAgent };
use session_chat::cache::memory::MemoryResponseCache;
use session_chat::cache::ResponseCache;
use session_chat::history::MemoryHistoryStore;
use session_chat::limiter::RateLimiter;
use session_chat::llm::chat::ChatClient;
use session_chat::llm::{ LlmType, UpstreamError };
use session_chat::models::chat::ConversationMessage;
use session_chat::server::api::build_router;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::Arc;
use tower::ServiceExt;

struct StubClient {
    failure: Option<UpstreamError>,
    calls: AtomicUsize,
}

#[async_trait]
impl ChatClient for StubClient {
    async fn complete(&self, conversation: &[ConversationMessage]) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let last = conversation.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(format!("echo: {}", last))
    }

    fn get_model(&self) -> String {
        "stub".to_string()
    }

    fn get_llm_type(&self) -> LlmType {
        LlmType::Ollama
    }
}

fn app_with(failure: Option<UpstreamError>, per_minute: u32) -> (Router, Arc<StubClient>) {
    app_behind_proxy(failure, per_minute, true)
}

fn app_behind_proxy(
    failure: Option<UpstreamError>,
    per_minute: u32,
    trust_forwarded_for: bool
) -> (Router, Arc<StubClient>) {
    let client = Arc::new(StubClient { failure, calls: AtomicUsize::new(0) });
    let agent = ChatAgent::new(
        client.clone(),
        Arc::new(MemoryHistoryStore::new()),
        Some(Arc::new(MemoryResponseCache::new()) as Arc<dyn ResponseCache>),
        Arc::new(RateLimiter::per_minute(per_minute).unwrap()),
        AgentSettings::default()
    );
    (build_router(Arc::new(agent), trust_forwarded_for), client)
}

fn chat(body: &str, caller: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat/")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", caller)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn chat_then_history_round_trip() {
    let (app, _) = app_with(None, 10);

    let (status, body) = send(&app, chat(r#"{"message":"Hello"}"#, "10.0.0.1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "echo: Hello");
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert!(!session_id.is_empty());

    let req = Request::builder()
        .uri(format!("/history/{}/", session_id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], session_id.as_str());
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["message"], "Hello");
    assert_eq!(history[0]["is_user"], true);
    assert_eq!(history[1]["message"], "echo: Hello");
    assert_eq!(history[1]["is_user"], false);
    assert!(history[0]["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn unknown_session_has_empty_history() {
    let (app, _) = app_with(None, 10);
    let req = Request::builder().uri("/history/nobody").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "session_id": "nobody", "history": [] }));
}

#[tokio::test]
async fn clear_empties_the_session() {
    let (app, _) = app_with(None, 10);
    send(&app, chat(r#"{"message":"Hi","session_id":"s1"}"#, "10.0.0.2")).await;

    let (status, body) = send(
        &app,
        chat(r#"{"session_id":"s1","clear_conversation":true}"#, "10.0.0.2")
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "session_id": "s1", "message": "Conversation history cleared" }));

    let req = Request::builder().uri("/history/s1/").body(Body::empty()).unwrap();
    let (_, body) = send(&app, req).await;
    assert!(body["history"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn blank_or_unreadable_message_is_rejected() {
    let (app, client) = app_with(None, 10);

    let (status, body) = send(&app, chat(r#"{"message":"   "}"#, "10.0.0.3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request");
    assert_eq!(body["detail"], "Message cannot be empty");

    let (status, _) = send(&app, chat("not json", "10.0.0.3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn excess_requests_get_429() {
    let (app, _) = app_with(None, 2);
    for _ in 0..2 {
        let (status, _) = send(&app, chat(r#"{"message":"ping"}"#, "198.51.100.9")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&app, chat(r#"{"message":"ping"}"#, "198.51.100.9")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Rate limit exceeded");

    let (status, _) = send(&app, chat(r#"{"message":"ping"}"#, "198.51.100.10")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn spoofed_forwarded_header_does_not_reset_budget() {
    let (app, client) = app_behind_proxy(None, 2, false);
    for i in 0..2 {
        let caller = format!("203.0.113.{}", i);
        let (status, _) = send(&app, chat(r#"{"message":"ping"}"#, &caller)).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = send(&app, chat(r#"{"message":"ping"}"#, "203.0.113.99")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn message_is_recorded_as_sent() {
    let (app, _) = app_with(None, 10);
    send(&app, chat(r#"{"message":"  Hello there \n","session_id":"raw"}"#, "10.0.0.6")).await;

    let req = Request::builder().uri("/history/raw/").body(Body::empty()).unwrap();
    let (_, body) = send(&app, req).await;
    assert_eq!(body["history"][0]["message"], "  Hello there \n");
}

#[tokio::test]
async fn quota_exhaustion_returns_503_with_session() {
    let (app, _) = app_with(Some(UpstreamError::QuotaExceeded), 10);
    let resp = app
        .clone()
        .oneshot(chat(r#"{"message":"Hello","session_id":"q1"}"#, "10.0.0.4"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.headers()[header::RETRY_AFTER], "60");
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "Service temporarily unavailable");
    assert_eq!(body["session_id"], "q1");

    let req = Request::builder().uri("/history/q1/").body(Body::empty()).unwrap();
    let (_, body) = send(&app, req).await;
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["is_user"], true);
}

#[tokio::test]
async fn repeated_question_is_served_from_cache() {
    let (app, client) = app_with(None, 10);
    let first = r#"{"message":"What is Rust?","session_id":"c1"}"#;
    let second = r#"{"message":"what is rust?  ","session_id":"c1"}"#;

    let (_, a) = send(&app, chat(first, "10.0.0.5")).await;
    let (_, b) = send(&app, chat(second, "10.0.0.5")).await;
    assert_eq!(a["response"], b["response"]);
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
}
