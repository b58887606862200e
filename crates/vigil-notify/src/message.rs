//! Outbound message and delivery receipt types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use vigil_core::{Channel, IncidentId};

/// A rendered message bound for one recipient over one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Incident the message concerns.
    pub incident_id: IncidentId,
    /// Resolved recipient id.
    pub recipient_id: String,
    /// Channel-specific address (email address, phone number, device
    /// token, or endpoint URL).
    pub address: String,
    /// Delivery channel.
    pub channel: Channel,
    /// Rendered subject.
    pub subject: String,
    /// Rendered content.
    pub content: String,
    /// Extra transport metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// What a transport reports back for an accepted send.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    /// Provider-assigned message id, if the transport returns one.
    pub provider_message_id: Option<String>,
}

impl DeliveryReceipt {
    pub fn with_message_id(id: impl Into<String>) -> Self {
        Self {
            provider_message_id: Some(id.into()),
        }
    }
}
