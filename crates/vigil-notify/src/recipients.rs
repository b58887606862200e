//! Recipient resolution.
//!
//! The identity/role directory is an external collaborator; the engine
//! reaches it through `RecipientResolver`. The static implementation here
//! backs tests and single-node deployments configured from a file.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use vigil_core::{ActionTarget, Channel, EngineError, RecipientType, Result};

/// A resolved notification recipient with per-channel addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Stable identifier (user id, role name, or endpoint URL).
    pub id: String,
    /// What kind of recipient this is.
    pub recipient_type: RecipientType,
    /// Display name used in rendered content.
    pub display_name: String,
    /// Channel-specific addresses.
    #[serde(default)]
    pub addresses: HashMap<Channel, String>,
}

impl Recipient {
    /// Create a user recipient.
    pub fn user(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            recipient_type: RecipientType::User,
            display_name: display_name.into(),
            addresses: HashMap::new(),
        }
    }

    /// Create an endpoint recipient whose webhook address is the endpoint
    /// itself.
    pub fn endpoint(url: impl Into<String>) -> Self {
        let url = url.into();
        let mut addresses = HashMap::new();
        addresses.insert(Channel::Webhook, url.clone());
        Self {
            id: url.clone(),
            recipient_type: RecipientType::Endpoint,
            display_name: url,
            addresses,
        }
    }

    /// Add a channel address.
    pub fn with_address(mut self, channel: Channel, address: impl Into<String>) -> Self {
        self.addresses.insert(channel, address.into());
        self
    }

    /// Address for a channel, if the recipient has one.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        // In-app deliveries are keyed by user id, no separate address.
        if channel == Channel::InApp {
            return Some(&self.id);
        }
        self.addresses.get(&channel).map(String::as_str)
    }
}

/// Resolves action targets to concrete recipients.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    /// All members of a role group.
    async fn resolve_role(&self, role: &str) -> Result<Vec<Recipient>>;

    /// A single user by id.
    async fn resolve_user(&self, user_id: &str) -> Result<Recipient>;

    /// Expand an action target.
    async fn resolve_target(&self, target: &ActionTarget) -> Result<Vec<Recipient>> {
        match target {
            ActionTarget::Role(role) => self.resolve_role(role).await,
            ActionTarget::User(user_id) => Ok(vec![self.resolve_user(user_id).await?]),
            ActionTarget::Endpoint(url) => Ok(vec![Recipient::endpoint(url.clone())]),
        }
    }
}

/// In-memory directory resolver.
#[derive(Default)]
pub struct StaticDirectoryResolver {
    users: Arc<RwLock<HashMap<String, Recipient>>>,
    roles: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl StaticDirectoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub async fn add_user(&self, recipient: Recipient) {
        self.users
            .write()
            .await
            .insert(recipient.id.clone(), recipient);
    }

    /// Add a user to a role group.
    pub async fn assign_role(&self, role: impl Into<String>, user_id: impl Into<String>) {
        self.roles
            .write()
            .await
            .entry(role.into())
            .or_default()
            .push(user_id.into());
    }
}

#[async_trait]
impl RecipientResolver for StaticDirectoryResolver {
    async fn resolve_role(&self, role: &str) -> Result<Vec<Recipient>> {
        let member_ids = self
            .roles
            .read()
            .await
            .get(role)
            .cloned()
            .ok_or_else(|| EngineError::RecipientResolution(format!("Unknown role: {role}")))?;

        let users = self.users.read().await;
        let mut members = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            match users.get(&id) {
                Some(recipient) => members.push(recipient.clone()),
                None => {
                    return Err(EngineError::RecipientResolution(format!(
                        "Role '{role}' references unknown user: {id}"
                    )))
                }
            }
        }
        Ok(members)
    }

    async fn resolve_user(&self, user_id: &str) -> Result<Recipient> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| EngineError::RecipientResolution(format!("Unknown user: {user_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_role_resolution() {
        let resolver = StaticDirectoryResolver::new();
        resolver
            .add_user(Recipient::user("u-1", "Ada").with_address(Channel::Email, "ada@example.com"))
            .await;
        resolver
            .add_user(Recipient::user("u-2", "Grace").with_address(Channel::Sms, "+1555000"))
            .await;
        resolver.assign_role("safety_manager", "u-1").await;
        resolver.assign_role("safety_manager", "u-2").await;

        let members = resolver.resolve_role("safety_manager").await.unwrap();
        assert_eq!(members.len(), 2);

        let err = resolver.resolve_role("nobody").await.unwrap_err();
        assert!(matches!(err, EngineError::RecipientResolution(_)));
    }

    #[tokio::test]
    async fn test_target_expansion() {
        let resolver = StaticDirectoryResolver::new();
        resolver.add_user(Recipient::user("u-1", "Ada")).await;

        let single = resolver
            .resolve_target(&ActionTarget::User("u-1".into()))
            .await
            .unwrap();
        assert_eq!(single.len(), 1);

        let endpoint = resolver
            .resolve_target(&ActionTarget::Endpoint("https://hooks.example.com/x".into()))
            .await
            .unwrap();
        assert_eq!(endpoint.len(), 1);
        assert_eq!(endpoint[0].recipient_type, RecipientType::Endpoint);
        assert_eq!(
            endpoint[0].address_for(Channel::Webhook),
            Some("https://hooks.example.com/x")
        );
    }

    #[test]
    fn test_in_app_address_is_user_id() {
        let recipient = Recipient::user("u-9", "Lin");
        assert_eq!(recipient.address_for(Channel::InApp), Some("u-9"));
        assert_eq!(recipient.address_for(Channel::Email), None);
    }
}
