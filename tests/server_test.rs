mod common;

use common::get_test_config;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use wslog::LogServer;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn boot_log_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = LogServer::new(get_test_config());
    tokio::spawn(server.serve(listener));
    format!("ws://{}", addr)
}

#[tokio::test]
async fn test_invalid_topic_rejected_before_upgrade() {
    let base = boot_log_server().await;

    let result = tokio_tungstenite::connect_async(format!("{}/ws/log/metrics", base)).await;
    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 400),
        other => panic!("expected HTTP 400, got {:?}", other.map(|(_, r)| r.status())),
    }
}

#[tokio::test]
async fn test_unreachable_broker_closes_with_error() {
    if std::env::var("TEST_KAFKA_BROKERS").is_ok() {
        return;
    }
    let base = boot_log_server().await;

    let (mut client, _) = tokio_tungstenite::connect_async(format!("{}/ws/log/log_app", base))
        .await
        .unwrap();

    let frame = timeout(TIMEOUT, client.next()).await.unwrap();
    match frame {
        Some(Ok(Message::Close(Some(close)))) => assert_eq!(close.code, CloseCode::Error),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
#[ignore] // Requires running Kafka with topic `log_wslog_test`; set TEST_KAFKA_BROKERS
async fn test_streams_from_kafka() {
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::ClientConfig;

    let config = get_test_config();
    let base = boot_log_server().await;
    let (mut client, _) =
        tokio_tungstenite::connect_async(format!("{}/ws/log/log_wslog_test?device=abc", base))
            .await
            .unwrap();

    // Give the reader time to assign the partition at the newest offset.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", config.kafka.brokers.join(","))
        .create()
        .unwrap();
    for payload in [
        r#"{"msg":"other","device":"zzz"}"#,
        r#"{"msg":"wanted","device":"abc","level":"info"}"#,
    ] {
        producer
            .send(
                FutureRecord::<(), _>::to("log_wslog_test").partition(0).payload(payload),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
    }

    loop {
        match timeout(TIMEOUT, client.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => {
                assert!(text.as_str().starts_with("INFO\t[]\t[]\twanted"));
                break;
            }
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
