//! Email sender over SMTP.

use async_trait::async_trait;

use vigil_core::{Channel, EngineError, Result};

use crate::channels::ChannelSender;
use crate::message::{DeliveryReceipt, OutboundMessage};

/// SMTP email sender.
///
/// The blocking lettre transport runs on the blocking pool so channel sends
/// stay independent of the async executor.
#[derive(Debug, Clone)]
pub struct EmailSender {
    enabled: bool,
    smtp_server: String,
    smtp_port: u16,
    username: String,
    password: String,
    from_address: String,
}

impl EmailSender {
    pub fn new(
        smtp_server: impl Into<String>,
        smtp_port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            enabled: true,
            smtp_server: smtp_server.into(),
            smtp_port,
            username: username.into(),
            password: password.into(),
            from_address: from_address.into(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn build_email(&self, message: &OutboundMessage) -> Result<lettre::Message> {
        let from_mailbox: lettre::message::Mailbox = self
            .from_address
            .parse()
            .map_err(|e| EngineError::Configuration(format!("Invalid from address: {e}")))?;

        let to_mailbox: lettre::message::Mailbox = message
            .address
            .parse()
            .map_err(|e| EngineError::ChannelDelivery(format!("Invalid email address: {e}")))?;

        lettre::Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&message.subject)
            .header(lettre::message::header::ContentType::TEXT_PLAIN)
            .body(message.content.clone())
            .map_err(|e| EngineError::ChannelDelivery(format!("Failed to build email: {e}")))
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        let email = self.build_email(message)?;

        let smtp_server = self.smtp_server.clone();
        let smtp_port = self.smtp_port;
        let username = self.username.clone();
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || {
            let creds =
                lettre::transport::smtp::authentication::Credentials::new(username, password);
            let relay = format!("{smtp_server}:{smtp_port}");
            let mailer = lettre::SmtpTransport::relay(&relay)
                .map_err(|e| EngineError::Configuration(format!("Invalid SMTP server: {e}")))?
                .credentials(creds)
                .build();

            lettre::Transport::send(&mailer, &email)
                .map_err(|e| EngineError::ChannelDelivery(format!("Failed to send email: {e}")))?;

            Ok::<(), EngineError>(())
        })
        .await
        .map_err(|e| EngineError::ChannelDelivery(format!("Task join error: {e}")))??;

        Ok(DeliveryReceipt::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vigil_core::IncidentId;

    fn message(address: &str) -> OutboundMessage {
        OutboundMessage {
            incident_id: IncidentId::new(),
            recipient_id: "u-1".to_string(),
            address: address.to_string(),
            channel: Channel::Email,
            subject: "Subject".to_string(),
            content: "Body".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_build_email() {
        let sender = EmailSender::new("smtp.example.com", 587, "user", "pass", "vigil@example.com");
        assert!(sender.build_email(&message("ada@example.com")).is_ok());
    }

    #[test]
    fn test_invalid_address_rejected() {
        let sender = EmailSender::new("smtp.example.com", 587, "user", "pass", "vigil@example.com");
        let err = sender.build_email(&message("not-an-address")).unwrap_err();
        assert!(matches!(err, EngineError::ChannelDelivery(_)));
    }
}
