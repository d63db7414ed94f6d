//! # sage-server
//!
//! Thin HTTP/WebSocket shell over the pipeline engine:
//!
//! - `POST /api/v1/chat` — non-streaming request/response
//! - `GET /ws?user_id=…` — full-duplex streaming protocol
//! - `GET /health` — liveness plus provider circuit states
//!
//! Authentication is an upstream collaborator: the shell trusts the
//! verified `user_id` it is handed and only enforces that a connection
//! speaks for a single user.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sage_core as core_types;
use sage_core::{ClientMessage, SageError};
use sage_engine::{ChatRequest, Engine, StreamRequest};
use sage_providers::HealthTracker;

/// Shared server state.
pub struct AppState {
    pub engine: Arc<Engine>,
    pub health: Arc<HealthTracker>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, health: Arc<HealthTracker>) -> Self {
        Self {
            engine,
            health,
            started_at: Instant::now(),
        }
    }
}

/// Build the Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/chat", post(chat_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ── Health ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    active_streams: usize,
    providers: Vec<ProviderHealthView>,
}

#[derive(Serialize)]
struct ProviderHealthView {
    name: String,
    circuit_state: core_types::CircuitState,
    success_rate: f64,
    p95_latency_ms: u64,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let providers = state
        .health
        .providers()
        .into_iter()
        .map(|name| {
            let snap = state.health.snapshot(&name);
            ProviderHealthView {
                name,
                circuit_state: snap.circuit_state,
                success_rate: snap.success_rate,
                p95_latency_ms: snap.p95_latency_ms,
            }
        })
        .collect();

    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_streams: state.engine.registry().active_count(),
        providers,
    })
}

// ── Non-streaming chat ─────────────────────────────────────────

#[derive(Deserialize)]
struct ChatBody {
    user_id: String,
    #[serde(default)]
    session_id: Option<Uuid>,
    message: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    options: Option<serde_json::Value>,
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Response {
    let _ = body.options; // reserved: max_tokens / provider_preference
    let result = state
        .engine
        .process(ChatRequest {
            user_id: body.user_id,
            session_id: body.session_id,
            message: body.message,
            subject: body.subject,
            embedding: None,
        })
        .await;

    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &SageError) -> Response {
    let status = match e {
        SageError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
        SageError::Unauthorized(_) => StatusCode::FORBIDDEN,
        SageError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        SageError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        SageError::BudgetExhausted { .. } => StatusCode::PAYMENT_REQUIRED,
        SageError::NoProviderAvailable(_) | SageError::ProviderUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SageError::GenerationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = serde_json::json!({
        "error": {
            "code": e.code(),
            "message": e.to_string(),
            "recoverable": e.recoverable(),
        }
    });
    (status, Json(body)).into_response()
}

// ── Streaming (WebSocket) ──────────────────────────────────────

#[derive(Deserialize)]
struct WsParams {
    user_id: String,
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, params.user_id, socket))
}

type WsSink = Arc<Mutex<SplitSink<WebSocket, WsMessage>>>;

async fn handle_socket(state: Arc<AppState>, user_id: String, socket: WebSocket) {
    info!(user = %user_id, "websocket connected");
    let (sink, mut incoming) = socket.split();
    let sink: WsSink = Arc::new(Mutex::new(sink));

    while let Some(frame) = incoming.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "websocket read error");
                break;
            }
        };
        let WsMessage::Text(raw) = frame else {
            continue;
        };

        match serde_json::from_str::<ClientMessage>(&raw) {
            Ok(ClientMessage::ChatStream {
                message_id,
                session_id,
                user_id: msg_user,
                message,
                context,
            }) => {
                if msg_user != user_id {
                    send_json(
                        &sink,
                        &serde_json::json!({
                            "type": "stream_error",
                            "message_id": message_id,
                            "error": {
                                "code": "UNAUTHORIZED",
                                "message": "user mismatch on connection",
                                "recoverable": false,
                            },
                            "partial_content": "",
                        }),
                    )
                    .await;
                    continue;
                }

                let subject = context.as_ref().and_then(|c| c.subject.clone());
                let rx = state.engine.process_stream(StreamRequest {
                    message_id,
                    session_id,
                    user_id: user_id.clone(),
                    message,
                    subject,
                    embedding: None,
                });
                let sink = Arc::clone(&sink);
                tokio::spawn(forward_events(rx, sink));
            }
            Ok(ClientMessage::StopGeneration { message_id, .. }) => {
                let cancelled = state.engine.cancel(message_id, &user_id);
                debug!(%message_id, cancelled, "stop_generation received");
            }
            Err(e) => {
                warn!(error = %e, "unparseable client frame");
                send_json(
                    &sink,
                    &serde_json::json!({
                        "type": "stream_error",
                        "error": {
                            "code": "INVALID_MESSAGE_FORMAT",
                            "message": e.to_string(),
                            "recoverable": false,
                        },
                        "partial_content": "",
                    }),
                )
                .await;
            }
        }
    }
    debug!(user = %user_id, "websocket closed");
}

async fn forward_events(
    mut rx: tokio::sync::mpsc::Receiver<core_types::StreamEvent>,
    sink: WsSink,
) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => {
                if sink.lock().await.send(WsMessage::text(json)).await.is_err() {
                    // Client went away; the engine notices via its own
                    // cancellation checks when the stream next suspends.
                    return;
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize stream event"),
        }
    }
}

async fn send_json(sink: &WsSink, value: &serde_json::Value) {
    if let Ok(json) = serde_json::to_string(value) {
        let _ = sink.lock().await.send(WsMessage::text(json)).await;
    }
}

/// Serve until the shutdown token fires.
pub async fn serve(
    listen: &str,
    state: Arc<AppState>,
    shutdown: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "server listening");
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
