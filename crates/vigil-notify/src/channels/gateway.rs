//! HTTP gateway sender for SMS and push providers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use vigil_core::{Channel, EngineError, Result};

use crate::channels::ChannelSender;
use crate::message::{DeliveryReceipt, OutboundMessage};

/// JSON body posted to the provider gateway.
#[derive(Debug, Serialize)]
struct GatewayPayload<'a> {
    to: &'a str,
    subject: &'a str,
    content: &'a str,
    metadata: &'a HashMap<String, String>,
}

/// Sender that forwards messages to an external provider gateway over HTTP.
///
/// SMS and push deliveries go through provider APIs rather than a direct
/// transport; one gateway instance serves one channel.
#[derive(Debug, Clone)]
pub struct HttpGatewaySender {
    channel: Channel,
    enabled: bool,
    gateway_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpGatewaySender {
    pub fn new(channel: Channel, gateway_url: impl Into<String>) -> Self {
        Self {
            channel,
            enabled: true,
            gateway_url: gateway_url.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[async_trait]
impl ChannelSender for HttpGatewaySender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        let mut request = self.client.post(&self.gateway_url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let payload = GatewayPayload {
            to: &message.address,
            subject: &message.subject,
            content: &message.content,
            metadata: &message.metadata,
        };

        let response = request
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::ChannelDelivery(format!("Gateway request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::ChannelDelivery(format!(
                "Gateway returned error: {}",
                response.status()
            )));
        }

        // Providers typically echo a message id for delivery tracking.
        let provider_id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("message_id")
                    .and_then(|id| id.as_str())
                    .map(String::from)
            });

        Ok(DeliveryReceipt {
            provider_message_id: provider_id,
        })
    }
}
