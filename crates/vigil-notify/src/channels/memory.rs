//! In-memory sender for tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use vigil_core::{Channel, EngineError, Result};

use crate::channels::ChannelSender;
use crate::message::{DeliveryReceipt, OutboundMessage};

/// Sender that records messages instead of delivering them.
///
/// Construct with `failing()` to make every send return a delivery error,
/// which is how dispatcher tests exercise partial-failure paths.
pub struct MemorySender {
    channel: Channel,
    fail: bool,
    enabled: bool,
    messages: Arc<RwLock<Vec<OutboundMessage>>>,
}

impl MemorySender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            fail: false,
            enabled: true,
            messages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// A sender whose every send fails.
    pub fn failing(channel: Channel) -> Self {
        Self {
            fail: true,
            ..Self::new(channel)
        }
    }

    /// A sender that reports itself disabled.
    pub fn disabled(channel: Channel) -> Self {
        Self {
            enabled: false,
            ..Self::new(channel)
        }
    }

    /// Messages recorded so far.
    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.messages.read().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn clear(&self) {
        self.messages.write().await.clear();
    }
}

#[async_trait]
impl ChannelSender for MemorySender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        if self.fail {
            return Err(EngineError::ChannelDelivery(format!(
                "Simulated {} failure",
                self.channel.as_str()
            )));
        }
        self.messages.write().await.push(message.clone());
        Ok(DeliveryReceipt::with_message_id(format!(
            "mem-{}",
            self.messages.read().await.len()
        )))
    }
}
