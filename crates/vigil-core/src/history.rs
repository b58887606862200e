//! Append-only audit trail rows.
//!
//! History rows are never mutated or deleted after creation. The only
//! exception is a delivery callback updating `status`/`error` on a
//! notification row. Rules are referenced by plain identifier so history
//! survives rule deletion.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::incident::IncidentId;
use crate::rule::{ActionType, Channel, RuleId};

/// Identity that executed an escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Executor {
    /// The engine itself (event trigger or overdue scan).
    System,
    /// The user who manually escalated.
    User(String),
}

impl std::fmt::Display for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// One escalation-history row per (incident, rule, action) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationHistory {
    /// Row identifier.
    pub id: String,
    /// Incident the action fired against.
    pub incident_id: IncidentId,
    /// Source rule; `None` for manual escalations and deleted rules.
    pub rule_id: Option<RuleId>,
    /// Rule name snapshot taken at write time.
    pub rule_name: String,
    /// Kind of action executed.
    pub action_type: ActionType,
    /// Rendered target description.
    pub action_target: String,
    /// Outcome summary, e.g. delivery counts or the manual reason.
    pub action_details: String,
    /// Aggregate success under the configured policy.
    pub is_successful: bool,
    /// Error summary if the action failed.
    pub error: Option<String>,
    /// When the action executed.
    pub executed_at: DateTime<Utc>,
    /// Who executed it.
    pub executed_by: Executor,
}

impl EscalationHistory {
    /// Create a row for a rule-driven action execution.
    pub fn for_action(
        incident_id: IncidentId,
        rule_id: RuleId,
        rule_name: impl Into<String>,
        action_type: ActionType,
        action_target: impl Into<String>,
        executed_by: Executor,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            incident_id,
            rule_id: Some(rule_id),
            rule_name: rule_name.into(),
            action_type,
            action_target: action_target.into(),
            action_details: String::new(),
            is_successful: false,
            error: None,
            executed_at: Utc::now(),
            executed_by,
        }
    }

    /// Create a row for a manual escalation.
    pub fn manual(incident_id: IncidentId, reason: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            incident_id,
            rule_id: None,
            rule_name: "Manual escalation".to_string(),
            action_type: ActionType::Manual,
            action_target: String::new(),
            action_details: reason.into(),
            is_successful: false,
            error: None,
            executed_at: Utc::now(),
            executed_by: Executor::User(user_id.into()),
        }
    }

    /// Record the outcome of the dispatch.
    pub fn with_outcome(mut self, is_successful: bool, details: impl Into<String>, error: Option<String>) -> Self {
        self.is_successful = is_successful;
        self.action_details = details.into();
        self.error = error;
        self
    }
}

/// Delivery lifecycle of a single notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum NotificationStatus {
    /// Created but not yet handed to a transport.
    #[default]
    Pending,
    /// Accepted by the transport.
    Sent,
    /// Confirmed delivered by an asynchronous callback.
    Delivered,
    /// The transport rejected or timed out.
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of recipient a notification row refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    User,
    Role,
    Endpoint,
}

impl RecipientType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Role => "role",
            Self::Endpoint => "endpoint",
        }
    }
}

/// One notification-history row per (action, recipient, channel) attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationHistory {
    /// Row identifier.
    pub id: String,
    /// Incident the notification concerns.
    pub incident_id: IncidentId,
    /// Resolved recipient id (user id, role name, or endpoint).
    pub recipient_id: String,
    /// Kind of recipient.
    pub recipient_type: RecipientType,
    /// Delivery channel.
    pub channel: Channel,
    /// Template that rendered the content.
    pub template_id: String,
    /// Priority of the matched rule (0 for manual escalations).
    pub priority: i32,
    /// Rendered subject.
    pub subject: String,
    /// Rendered content.
    pub content: String,
    /// Delivery status.
    pub status: NotificationStatus,
    /// Transport error text, if any.
    pub error: Option<String>,
    /// Provider message id returned by the transport.
    pub provider_message_id: Option<String>,
    /// Extra transport metadata.
    pub metadata: HashMap<String, String>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// Last status update.
    pub updated_at: DateTime<Utc>,
}

impl NotificationHistory {
    /// Create a pending row for an attempt about to be made.
    pub fn pending(
        incident_id: IncidentId,
        recipient_id: impl Into<String>,
        recipient_type: RecipientType,
        channel: Channel,
        template_id: impl Into<String>,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            incident_id,
            recipient_id: recipient_id.into(),
            recipient_type,
            channel,
            template_id: template_id.into(),
            priority,
            subject: String::new(),
            content: String::new(),
            status: NotificationStatus::Pending,
            error: None,
            provider_message_id: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach rendered content.
    pub fn with_content(mut self, subject: impl Into<String>, content: impl Into<String>) -> Self {
        self.subject = subject.into();
        self.content = content.into();
        self
    }

    /// Mark the attempt sent.
    pub fn sent(mut self, provider_message_id: Option<String>) -> Self {
        self.status = NotificationStatus::Sent;
        self.provider_message_id = provider_message_id;
        self.updated_at = Utc::now();
        self
    }

    /// Mark the attempt failed.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = NotificationStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        self
    }

    /// Whether the attempt was accepted by the transport.
    pub fn is_delivered(&self) -> bool {
        matches!(self.status, NotificationStatus::Sent | NotificationStatus::Delivered)
    }
}
