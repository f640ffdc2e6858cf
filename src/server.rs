//! HTTP surface: the WebSocket log stream, topic listing and health.

use crate::record::FilterSpec;
use crate::{kafka, session, Config, Result};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    shutdown: CancellationToken,
    active_sessions: Arc<AtomicUsize>,
    next_session_id: Arc<AtomicU64>,
}

pub struct LogServer {
    state: AppState,
}

impl LogServer {
    pub fn new(config: Config) -> Self {
        Self {
            state: AppState {
                config: Arc::new(config),
                shutdown: CancellationToken::new(),
                active_sessions: Arc::new(AtomicUsize::new(0)),
                next_session_id: Arc::new(AtomicU64::new(1)),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/log/{topic}", get(stream_logs))
            .route("/log/topics", get(log_topics))
            .route("/health", get(health))
            .with_state(self.state.clone())
    }

    /// Cancelling this token stops the listener and every active session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.state.active_sessions.load(Ordering::SeqCst)
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.state.config.server.address).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(address = %listener.local_addr()?, "wslog server listening");
        let shutdown = self.state.shutdown.clone();
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
        info!("wslog server stopped");
        Ok(())
    }
}

/// GET /ws/log/{topic}
async fn stream_logs(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.config.is_log_topic(&topic) {
        warn!(%peer, %topic, "Rejected invalid topic");
        return error_response(StatusCode::BAD_REQUEST, format!("invalid topic: {}", topic));
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let filter = FilterSpec::from_query_pairs(pairs);
    let id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
    debug!(session_id = id, %peer, %topic, filter = ?filter, "Upgrading connection");

    upgrade.on_upgrade(move |socket| async move {
        let _active = ActiveSession::enter(&state.active_sessions);
        info!(session_id = id, %peer, %topic, "WebSocket connection opened");
        let result = session::serve(socket, id, state.config.clone(), topic, filter, &state.shutdown).await;
        // Failures were logged where they were detected.
        debug!(session_id = id, result = ?result, "Session finished");
        info!(session_id = id, %peer, "WebSocket connection closed");
    })
}

/// GET /log/topics
async fn log_topics(State(state): State<AppState>) -> Response {
    match kafka::list_topics(&state.config.kafka).await {
        Ok(topics) => {
            let topics: Vec<String> = topics
                .into_iter()
                .filter(|topic| state.config.is_log_topic(topic))
                .collect();
            Json(topics).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to list topics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to list topics")
        }
    }
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.active_sessions.load(Ordering::SeqCst),
    }))
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(json!({ "msg": msg.into() }))).into_response()
}

/// Counts a session as active for as long as it is alive.
struct ActiveSession(Arc<AtomicUsize>);

impl ActiveSession {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
