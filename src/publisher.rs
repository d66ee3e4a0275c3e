//! Downstream event publication.
//!
//! One summary event is broadcast per successful ingestion. The in-process
//! implementation fans out over a `tokio::sync::broadcast` channel;
//! consumers subscribe for their own receiver. Nobody listening is not an
//! error, and a lagging consumer only loses its own backlog.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::ReadingEvent;

// ---

/// Announces successfully ingested readings to downstream consumers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ReadingEvent) -> Result<()>;
}

/// Broadcast-channel publisher.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ReadingEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receiver for a downstream consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<ReadingEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &ReadingEvent) -> Result<()> {
        // ---
        // send() only errors when there are no receivers; that is fine.
        let delivered = self.tx.send(event.clone()).unwrap_or(0);
        debug!(
            "published reading event {} for talhao {} to {delivered} consumers",
            event.event_id, event.talhao_id
        );
        Ok(())
    }
}
