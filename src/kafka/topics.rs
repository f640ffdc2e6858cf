use crate::config::KafkaConfig;
use crate::{Error, Result};
use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::ClientConfig;
use tracing::{debug, instrument};

/// Lists every topic known to the brokers, sorted by name.
#[instrument(skip(config), fields(brokers = ?config.brokers))]
pub async fn list_topics(config: &KafkaConfig) -> Result<Vec<String>> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.brokers.join(","))
        .set("client.id", &config.client_id);
    let timeout = config.metadata_timeout();

    // Metadata requests block the calling thread.
    let mut topics = tokio::task::spawn_blocking(move || {
        let admin_client: AdminClient<DefaultClientContext> = client_config.create()?;
        let metadata = admin_client.inner().fetch_metadata(None, timeout)?;
        Ok::<_, rdkafka::error::KafkaError>(
            metadata
                .topics()
                .iter()
                .map(|topic| topic.name().to_string())
                .collect::<Vec<_>>(),
        )
    })
    .await
    .map_err(|e| Error::ConnectFailed {
        message: format!("metadata task failed: {}", e),
    })??;

    topics.sort();
    debug!(count = topics.len(), "Fetched topic list");
    Ok(topics)
}
