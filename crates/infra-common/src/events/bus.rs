use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::types::Result;

/// One payload delivered on a named channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// Channel (queue or routing key) the payload travelled on
    pub channel: String,
    /// Raw payload, JSON for every channel the controller uses
    pub payload: String,
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            published_at: Utc::now(),
        }
    }
}

/// Publish/subscribe transport for run submissions and reports
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on a channel. Publishing with no subscriber is not an error.
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    /// Subscribe to every payload published on a channel from now on
    async fn subscribe(&self, channel: &str) -> Result<BusReceiver>;
}

/// Receiving half of a subscription
pub struct BusReceiver {
    channel: String,
    receiver: Box<dyn BusReceiverImpl>,
}

impl BusReceiver {
    pub fn new(channel: impl Into<String>, receiver: Box<dyn BusReceiverImpl>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the bus side has shut down
    pub async fn recv(&mut self) -> Result<Option<BusMessage>> {
        self.receiver.recv().await
    }
}

/// Internal trait for receiver implementations
#[async_trait]
pub trait BusReceiverImpl: Send + Sync {
    async fn recv(&mut self) -> Result<Option<BusMessage>>;
}
