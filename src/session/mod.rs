//! Per-connection log streaming sessions.

pub mod coordinator;
mod keepalive;
mod shutdown;
pub mod state;
mod writer;


pub use coordinator::{Session, SessionHandle};
pub use state::{SessionEnd, SessionState};

use crate::config::Config;
use crate::kafka::PartitionReader;
use crate::record::{FieldFilter, FilterSpec};
use crate::Result;
use axum::extract::ws::WebSocket;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Streams `topic` to an upgraded WebSocket until the session ends.
///
/// Opens the Kafka partition reader as the session's setup step, so a broker
/// that cannot be reached yields [`crate::Error::ConnectFailed`] without the
/// session ever running.
#[instrument(skip_all, fields(topic = %topic))]
pub async fn serve(
    socket: WebSocket,
    id: u64,
    config: Arc<Config>,
    topic: String,
    filter: FilterSpec,
    parent: &CancellationToken,
) -> Result<SessionEnd> {
    let (sink, stream) = socket.split();
    let session = Session::child_of(id, config.session.clone(), parent)
        .with_filter(FieldFilter::new(filter))
        .with_reader_capacity(config.kafka.channel_capacity);

    let open = async move { PartitionReader::open(&config.kafka, &topic).await };
    session.start(open, sink, stream).await
}
