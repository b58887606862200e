//! Console sender.

use async_trait::async_trait;

use vigil_core::{Channel, Result};

use crate::channels::ChannelSender;
use crate::message::{DeliveryReceipt, OutboundMessage};

/// Sender that prints deliveries to stdout. Useful during development and
/// as an in-app stand-in on single-node deployments.
#[derive(Debug, Clone)]
pub struct ConsoleSender {
    channel: Channel,
    enabled: bool,
}

impl ConsoleSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Default for ConsoleSender {
    fn default() -> Self {
        Self::new(Channel::InApp)
    }
}

#[async_trait]
impl ChannelSender for ConsoleSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        println!("=== {} -> {} ===", self.channel.as_str(), message.address);
        println!("Incident: {}", message.incident_id);
        println!("Subject: {}", message.subject);
        println!("{}", message.content);
        println!("================");
        Ok(DeliveryReceipt::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vigil_core::IncidentId;

    #[tokio::test]
    async fn test_console_send() {
        let sender = ConsoleSender::new(Channel::InApp);
        assert!(sender.is_enabled());

        let message = OutboundMessage {
            incident_id: IncidentId::new(),
            recipient_id: "u-1".to_string(),
            address: "u-1".to_string(),
            channel: Channel::InApp,
            subject: "Test".to_string(),
            content: "Body".to_string(),
            metadata: HashMap::new(),
        };
        sender.send(&message).await.unwrap();
    }

    #[test]
    fn test_disabled() {
        assert!(!ConsoleSender::new(Channel::InApp).disabled().is_enabled());
    }
}
