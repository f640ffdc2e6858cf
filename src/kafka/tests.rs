use super::*;
use crate::config::KafkaConfig;
use crate::source::ReaderHandle;
use crate::Error;
use bytes::Bytes;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn create_test_kafka_config(brokers: &str) -> KafkaConfig {
    KafkaConfig {
        brokers: vec![brokers.to_string()],
        client_id: "wslog_test".to_string(),
        metadata_timeout_ms: 500,
        channel_capacity: 1,
    }
}

#[tokio::test]
async fn test_open_unreachable_broker_fails_to_connect() {
    // Nothing listens on port 1.
    let config = create_test_kafka_config("127.0.0.1:1");
    let result = PartitionReader::open(&config, "log_unreachable").await;
    assert!(matches!(result, Err(Error::ConnectFailed { .. })));
}

#[tokio::test]
async fn test_list_topics_unreachable_broker() {
    let config = create_test_kafka_config("127.0.0.1:1");
    assert!(list_topics(&config).await.is_err());
}

#[tokio::test]
#[ignore] // Requires running Kafka
async fn test_open_missing_topic() {
    let config = create_test_kafka_config("localhost:9092");
    let result = PartitionReader::open(&config, "log_does_not_exist_wslog").await;
    assert!(matches!(result, Err(Error::ConnectFailed { .. })));
}

#[tokio::test]
#[ignore] // Requires running Kafka with topic `log_wslog_test`
async fn test_reads_records_published_after_open() {
    let config = create_test_kafka_config("localhost:9092");
    let topic = "log_wslog_test";

    let reader = PartitionReader::open(&config, topic).await.unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    let parent = CancellationToken::new();
    let mut handle = ReaderHandle::start(reader, tx, &parent);

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers[0])
        .create()
        .unwrap();
    for payload in ["", r#"{"msg":"one"}"#, r#"{"msg":"two"}"#] {
        producer
            .send(
                FutureRecord::<(), _>::to(topic).partition(0).payload(payload),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
    }

    // The empty record is skipped.
    let first = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await.unwrap();
    assert_eq!(first, Some(Bytes::from_static(br#"{"msg":"one"}"#)));
    let second = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await.unwrap();
    assert_eq!(second, Some(Bytes::from_static(br#"{"msg":"two"}"#)));

    handle.stop().await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
#[ignore] // Requires running Kafka
async fn test_list_topics() {
    let config = create_test_kafka_config("localhost:9092");
    let topics = list_topics(&config).await.unwrap();
    let mut sorted = topics.clone();
    sorted.sort();
    assert_eq!(topics, sorted);
}
