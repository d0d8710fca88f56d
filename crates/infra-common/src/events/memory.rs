use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{trace, warn};

use super::bus::{BusMessage, BusReceiver, BusReceiverImpl, MessageBus};
use crate::errors::types::Result;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// In-process bus built on one `tokio::sync::broadcast` channel per name
pub struct InMemoryBus {
    channels: DashMap<String, broadcast::Sender<BusMessage>>,
    capacity: usize,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<BusMessage> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscribers on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let message = BusMessage::new(channel, payload);
        if self.sender(channel).send(message).is_err() {
            trace!("No subscriber on '{}', message dropped", channel);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusReceiver> {
        let rx = self.sender(channel).subscribe();
        Ok(BusReceiver::new(
            channel,
            Box::new(BroadcastReceiver {
                channel: channel.to_string(),
                rx,
            }),
        ))
    }
}

struct BroadcastReceiver {
    channel: String,
    rx: broadcast::Receiver<BusMessage>,
}

#[async_trait]
impl BusReceiverImpl for BroadcastReceiver {
    async fn recv(&mut self) -> Result<Option<BusMessage>> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Ok(Some(message)),
                Err(RecvError::Closed) => return Ok(None),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber on '{}' lagged, {} messages skipped", self.channel, skipped);
                }
            }
        }
    }
}
