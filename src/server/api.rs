use crate::agent::{ ChatAgent, ChatOutcome };
use crate::cli::Args;
use crate::llm::UpstreamError;
use crate::models::api::{
    ChatRequest,
    ChatResponse,
    ClearResponse,
    ErrorResponse,
    HistoryEntry,
    HistoryResponse,
};
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::{ ConnectInfo, FromRequestParts, Path, State, rejection::JsonRejection },
    response::{ IntoResponse, Response },
    http::{ header, request::Parts, StatusCode },
};
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, warn, error };

const QUOTA_RETRY_AFTER_SECS: &str = "60";

#[derive(Clone)]
pub struct AppState {
    agent: Arc<ChatAgent>,
    trust_forwarded_for: bool,
}

/// Caller identity used for admission: the peer address, or a shared
/// anonymous bucket when none is known. The first `X-Forwarded-For` hop takes
/// precedence only when the deployment trusts that header.
pub struct ClientIdentity(pub String);

fn resolve_identity(parts: &Parts, trust_forwarded_for: bool) -> String {
    let forwarded = parts.headers
        .get("x-forwarded-for")
        .filter(|_| trust_forwarded_for)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let peer = parts.extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    forwarded.or(peer).unwrap_or_else(|| "anonymous".to_string())
}

impl FromRequestParts<AppState> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(resolve_identity(parts, state.trust_forwarded_for)))
    }
}

fn error_body(status: StatusCode, error: &str, detail: &str, session_id: Option<String>) -> Response {
    (status, Json(ErrorResponse {
        error: error.to_string(),
        detail: detail.to_string(),
        session_id,
    })).into_response()
}

fn internal_error() -> Response {
    error_body(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        "The request could not be completed",
        None
    )
}

fn outcome_response(outcome: ChatOutcome) -> Response {
    match outcome {
        ChatOutcome::RateLimited =>
            error_body(
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded",
                "Too many requests, please slow down",
                None
            ),
        ChatOutcome::InvalidInput { detail } =>
            error_body(StatusCode::BAD_REQUEST, "Invalid request", &detail, None),
        ChatOutcome::Cleared { session_id, .. } =>
            (StatusCode::OK, Json(ClearResponse {
                session_id,
                message: "Conversation history cleared".to_string(),
            })).into_response(),
        ChatOutcome::Served { session_id, response, .. } =>
            (StatusCode::OK, Json(ChatResponse { response, session_id })).into_response(),
        ChatOutcome::UpstreamFailed { session_id, error: UpstreamError::QuotaExceeded } => {
            let mut resp = error_body(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
                "The assistant is over capacity, please retry later",
                Some(session_id)
            );
            resp.headers_mut().insert(
                header::RETRY_AFTER,
                header::HeaderValue::from_static(QUOTA_RETRY_AFTER_SECS)
            );
            resp
        }
        ChatOutcome::UpstreamFailed { session_id, .. } =>
            error_body(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable",
                "The assistant could not be reached, please retry",
                Some(session_id)
            ),
    }
}

async fn chat_handler(
    State(state): State<AppState>,
    ClientIdentity(identity): ClientIdentity,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Response {
    let request = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!("Unreadable chat body from {}: {}", identity, rejection.body_text());
            ChatRequest::default()
        }
    };

    match state.agent.handle(&identity, request).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => {
            error!("Chat request from {} failed: {}", identity, e);
            internal_error()
        }
    }
}

async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>
) -> Response {
    match state.agent.history(&session_id).await {
        Ok(turns) =>
            Json(HistoryResponse {
                session_id,
                history: turns.into_iter().map(HistoryEntry::from).collect(),
            }).into_response(),
        Err(e) => {
            error!("History lookup for session {} failed: {}", session_id, e);
            internal_error()
        }
    }
}

pub fn build_router(agent: Arc<ChatAgent>, trust_forwarded_for: bool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat/", post(chat_handler))
        .route("/chat", post(chat_handler))
        .route("/history/{session_id}/", get(history_handler))
        .route("/history/{session_id}", get(history_handler))
        .layer(cors)
        .with_state(AppState { agent, trust_forwarded_for })
}

pub async fn start_http_server(
    addr: &str,
    agent: Arc<ChatAgent>,
    args: &Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    let app = build_router(agent, args.trust_forwarded_for);

    match (args.enable_tls, &args.tls_cert_path, &args.tls_key_path) {
        (true, Some(cert_path), Some(key_path)) => {
            info!(
                "TLS enabled. Loading certificate from '{}' and key from '{}'",
                cert_path,
                key_path
            );
            let _ = rustls::crypto::ring::default_provider().install_default();
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                cert_path,
                key_path
            ).await?;

            info!("Starting HTTPS server on: https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>()).await?;
        }
        (true, _, _) => {
            error!("--enable-tls was set but certificate/key paths are incomplete.");
            return Err("TLS enabled without cert/key".into());
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                e
            })?;
            info!("Starting HTTP server on: http://{}", addr);
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
        }
    }

    Ok(())
}
