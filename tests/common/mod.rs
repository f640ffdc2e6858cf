#![allow(dead_code)]

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use wslog::config::{Config, KafkaConfig, SessionConfig};
use wslog::record::{FieldFilter, FilterSpec};
use wslog::source::ChannelSource;
use wslog::{Result, Session, SessionEnd};

pub type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Session settings with short timeouts so keepalive behaviour is observable
/// in real time.
pub fn fast_session_config() -> SessionConfig {
    SessionConfig {
        write_timeout_secs: 2,
        pong_wait_secs: 1,
        max_lifetime_secs: 30,
        queue_capacity: 16,
    }
}

/// Configuration pointing at a broker address nothing listens on, unless
/// `TEST_KAFKA_BROKERS` is set.
pub fn get_test_config() -> Config {
    let kafka = KafkaConfig {
        brokers: env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "127.0.0.1:1".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
        client_id: format!("wslog_test_{}", std::process::id()),
        metadata_timeout_ms: 500,
        channel_capacity: 1,
    };

    Config {
        kafka,
        session: fast_session_config(),
        ..Config::default()
    }
}

#[derive(Clone)]
struct TestState {
    config: SessionConfig,
    source: Arc<Mutex<Option<ChannelSource>>>,
    results: mpsc::UnboundedSender<Result<SessionEnd>>,
}

/// A server running exactly one session over an in-memory payload source.
pub struct TestServer {
    pub url: String,
    pub feed: mpsc::Sender<bytes::Bytes>,
    pub results: mpsc::UnboundedReceiver<Result<SessionEnd>>,
}

pub async fn boot_session_server(config: SessionConfig) -> TestServer {
    let (feed, source) = ChannelSource::pair(16);
    let (results_tx, results) = mpsc::unbounded_channel();
    let state = TestState {
        config,
        source: Arc::new(Mutex::new(Some(source))),
        results: results_tx,
    };

    let app = Router::new()
        .route("/ws", get(session_handler))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    TestServer {
        url: format!("ws://{}/ws", addr),
        feed,
        results,
    }
}

async fn session_handler(
    State(state): State<TestState>,
    Query(pairs): Query<Vec<(String, String)>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        let source = state
            .source
            .lock()
            .await
            .take()
            .expect("test server serves a single session");
        let (sink, stream) = socket.split();
        let session = Session::new(1, state.config.clone())
            .with_filter(FieldFilter::new(FilterSpec::from_query_pairs(pairs)));
        let result = session.run(source, sink, stream).await;
        let _ = state.results.send(result);
    })
}

pub async fn connect(url: &str) -> WsClient {
    let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
}
