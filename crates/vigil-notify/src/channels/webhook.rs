//! Webhook sender.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use vigil_core::{Channel, EngineError, Result};

use crate::channels::ChannelSender;
use crate::message::{DeliveryReceipt, OutboundMessage};

/// JSON body posted to webhook endpoints.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    incident_id: String,
    subject: &'a str,
    content: &'a str,
    metadata: &'a HashMap<String, String>,
}

/// Sender that POSTs the rendered message to the recipient's endpoint URL.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    enabled: bool,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            enabled: true,
            headers: HashMap::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        let mut request = self.client.post(&message.address);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let payload = WebhookPayload {
            incident_id: message.incident_id.to_string(),
            subject: &message.subject,
            content: &message.content,
            metadata: &message.metadata,
        };

        let response = request
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::ChannelDelivery(format!("Webhook request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::ChannelDelivery(format!(
                "Webhook returned error: {}",
                response.status()
            )));
        }

        Ok(DeliveryReceipt::default())
    }
}
