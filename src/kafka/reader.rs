use crate::config::KafkaConfig;
use crate::source::PayloadSource;
use crate::{Error, Result};
use bytes::Bytes;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Reads one partition of one topic, starting at the newest offset.
pub struct PartitionReader {
    consumer: StreamConsumer,
    topic: String,
    partition: i32,
}

impl PartitionReader {
    /// The only partition log topics are read from.
    pub const PARTITION: i32 = 0;

    /// Connects to the brokers, checks that the partition exists and
    /// assigns it at [`Offset::End`]. Every failure is reported as
    /// [`Error::ConnectFailed`].
    #[instrument(skip(config), fields(brokers = ?config.brokers))]
    pub async fn open(config: &KafkaConfig, topic: &str) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("client.id", &config.client_id)
            .set("group.id", &config.client_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| connect_failed(topic, e))?;

        let consumer = verify_partition(consumer, topic, config).await?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, Self::PARTITION, Offset::End)
            .map_err(|e| connect_failed(topic, e))?;
        consumer
            .assign(&assignment)
            .map_err(|e| connect_failed(topic, e))?;

        info!(topic, partition = Self::PARTITION, "Partition reader opened");

        Ok(Self {
            consumer,
            topic: topic.to_string(),
            partition: Self::PARTITION,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Releases the partition assignment, then the broker connection.
    fn release(self) {
        if let Err(e) = self.consumer.unassign() {
            warn!(topic = %self.topic, error = %e, "Failed to release partition assignment");
        }
        drop(self.consumer);
        debug!(topic = %self.topic, "Partition reader released");
    }
}

impl PayloadSource for PartitionReader {
    async fn run(self, tx: mpsc::Sender<Bytes>, cancel: CancellationToken) -> Result<()> {
        info!(topic = %self.topic, partition = self.partition, "Partition reader started");

        let result = loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                message = self.consumer.recv() => message.map(|m| {
                    (m.offset(), m.payload().map(Bytes::copy_from_slice))
                }),
            };

            let payload = match received {
                Ok((offset, Some(payload))) if !payload.is_empty() => {
                    trace!(offset, bytes = payload.len(), "Record received");
                    payload
                }
                Ok((offset, _)) => {
                    warn!(offset, "Skipping empty record");
                    continue;
                }
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "Partition read failed");
                    break Err(Error::Kafka(e));
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                sent = tx.send(payload) => {
                    if sent.is_err() {
                        debug!("Payload receiver dropped");
                        break Ok(());
                    }
                }
            }
        };

        info!(topic = %self.topic, "Partition reader stopped");
        self.release();
        result
    }
}

async fn verify_partition(
    consumer: StreamConsumer,
    topic: &str,
    config: &KafkaConfig,
) -> Result<StreamConsumer> {
    let timeout = config.metadata_timeout();
    let owned_topic = topic.to_string();

    // Metadata requests block the calling thread.
    let (consumer, checked) = tokio::task::spawn_blocking(move || {
        let checked = consumer
            .fetch_metadata(Some(&owned_topic), timeout)
            .map_err(|e| e.to_string())
            .and_then(|metadata| {
                let found = metadata
                    .topics()
                    .iter()
                    .find(|t| t.name() == owned_topic)
                    .ok_or_else(|| "topic not found".to_string())?;
                if let Some(err) = found.error() {
                    return Err(format!("topic error: {:?}", err));
                }
                if !found
                    .partitions()
                    .iter()
                    .any(|p| p.id() == PartitionReader::PARTITION)
                {
                    return Err(format!("partition {} not found", PartitionReader::PARTITION));
                }
                Ok(())
            });
        (consumer, checked)
    })
    .await
    .map_err(|e| connect_failed(topic, e))?;

    checked.map_err(|e| connect_failed(topic, e))?;
    Ok(consumer)
}

fn connect_failed(topic: &str, cause: impl std::fmt::Display) -> Error {
    Error::ConnectFailed {
        message: format!("topic '{}': {}", topic, cause),
    }
}
