//! Channel senders.
//!
//! One sender per delivery medium, registered in a `SenderRegistry` keyed
//! by `Channel`. Transports are external collaborators; the dispatcher only
//! sees this trait.

pub mod console;
pub mod memory;

#[cfg(feature = "webhook")]
pub mod gateway;
#[cfg(feature = "webhook")]
pub mod webhook;

#[cfg(feature = "email")]
pub mod email;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use vigil_core::{Channel, Result};

use crate::message::{DeliveryReceipt, OutboundMessage};

pub use console::ConsoleSender;
pub use memory::MemorySender;

#[cfg(feature = "webhook")]
pub use gateway::HttpGatewaySender;
#[cfg(feature = "webhook")]
pub use webhook::WebhookSender;

#[cfg(feature = "email")]
pub use email::EmailSender;

/// A transport capable of delivering messages over one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// The channel this sender serves.
    fn channel(&self) -> Channel;

    /// Check if the sender is enabled.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Deliver a message.
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt>;
}

/// Registry of channel senders keyed by channel.
#[derive(Default)]
pub struct SenderRegistry {
    senders: RwLock<HashMap<Channel, Arc<dyn ChannelSender>>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender for its channel, replacing any previous one.
    pub async fn register(&self, sender: Arc<dyn ChannelSender>) {
        self.senders.write().await.insert(sender.channel(), sender);
    }

    /// Get the sender for a channel.
    pub async fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.read().await.get(&channel).cloned()
    }

    /// Remove a sender.
    pub async fn unregister(&self, channel: Channel) -> bool {
        self.senders.write().await.remove(&channel).is_some()
    }

    /// Channels with a registered sender.
    pub async fn channels(&self) -> Vec<Channel> {
        self.senders.read().await.keys().copied().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.senders.read().await.is_empty()
    }
}
