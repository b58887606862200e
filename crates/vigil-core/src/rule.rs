//! Escalation rule and action definitions.
//!
//! Rules own their actions by value; history rows reference rules by plain
//! identifier so the audit trail survives rule deletion.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Unique identifier for an escalation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| EngineError::Configuration(format!("Invalid rule id '{s}': {e}")))
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an escalation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery medium for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
    InApp,
    Webhook,
}

impl Channel {
    /// Get the channel as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
            Self::InApp => "in_app",
            Self::Webhook => "webhook",
        }
    }

    /// Get the channel from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "push" => Some(Self::Push),
            "in_app" | "inapp" => Some(Self::InApp),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of response step an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Notify the target over the configured channels.
    Notify,
    /// Reassign the incident to the target, then notify.
    Reassign,
    /// Call out to an external endpoint.
    Webhook,
    /// Human-triggered escalation (never part of a stored rule).
    Manual,
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Notify => "notify",
            Self::Reassign => "reassign",
            Self::Webhook => "webhook",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who or what an action is aimed at.
///
/// Typed variants instead of a free-form string so role names, user ids and
/// endpoints cannot be confused for one another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActionTarget {
    /// A role group; expands to every member.
    Role(String),
    /// A single user id.
    User(String),
    /// A webhook endpoint URL.
    Endpoint(String),
}

impl std::fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Role(r) => write!(f, "role:{r}"),
            Self::User(u) => write!(f, "user:{u}"),
            Self::Endpoint(e) => write!(f, "endpoint:{e}"),
        }
    }
}

/// A single notification/response step owned by a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationAction {
    /// Action identifier.
    #[serde(default)]
    pub id: ActionId,
    /// What the action does.
    pub action_type: ActionType,
    /// Who the action is aimed at.
    pub target: ActionTarget,
    /// Channels to deliver over. Must be non-empty.
    pub channels: Vec<Channel>,
    /// Template used to render subject and content.
    pub template_id: String,
    /// Free-form parameters passed to the template.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Offset applied before execution; `None` executes inline.
    #[serde(default)]
    pub delay_seconds: Option<u64>,
}

impl EscalationAction {
    /// Create a notify action.
    pub fn notify(target: ActionTarget, channels: Vec<Channel>, template_id: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            action_type: ActionType::Notify,
            target,
            channels,
            template_id: template_id.into(),
            parameters: HashMap::new(),
            delay_seconds: None,
        }
    }

    /// Create a webhook action against an endpoint.
    pub fn webhook(endpoint: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            action_type: ActionType::Webhook,
            target: ActionTarget::Endpoint(endpoint.into()),
            channels: vec![Channel::Webhook],
            template_id: template_id.into(),
            parameters: HashMap::new(),
            delay_seconds: None,
        }
    }

    /// Defer execution by the given number of seconds.
    pub fn with_delay(mut self, delay_seconds: u64) -> Self {
        self.delay_seconds = Some(delay_seconds);
        self
    }

    /// Add a template parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Check structural validity of the action.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(EngineError::Configuration(format!(
                "Action {} has no channels configured",
                self.id
            )));
        }
        if self.template_id.is_empty() {
            return Err(EngineError::Configuration(format!(
                "Action {} has no template",
                self.id
            )));
        }
        Ok(())
    }
}

/// A configured condition-to-action mapping for escalation.
///
/// Empty trigger sets are wildcards: they match any value for that
/// dimension. Non-empty sets require membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    /// Rule identifier.
    #[serde(default)]
    pub id: RuleId,
    /// Rule name, denormalized into history rows at write time.
    pub name: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Inactive rules never participate in matching.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Evaluation order; lower values are evaluated first.
    #[serde(default)]
    pub priority: i32,
    /// Severity tokens that trigger this rule (empty = wildcard).
    #[serde(default)]
    pub trigger_severities: BTreeSet<String>,
    /// Status tokens that trigger this rule (empty = wildcard).
    #[serde(default)]
    pub trigger_statuses: BTreeSet<String>,
    /// Departments that trigger this rule (empty = wildcard).
    #[serde(default)]
    pub trigger_departments: BTreeSet<String>,
    /// Locations that trigger this rule (empty = wildcard).
    #[serde(default)]
    pub trigger_locations: BTreeSet<String>,
    /// Elapsed-time threshold measured from the anchor timestamp.
    #[serde(default)]
    pub trigger_after_seconds: Option<u64>,
    /// Re-fire interval measured from the last escalation. When set, the
    /// rule is repeat-eligible and anchors on the last escalation time.
    #[serde(default)]
    pub repeat_interval_seconds: Option<u64>,
    /// Ordered actions; later actions may depend on earlier ones having
    /// already notified a first responder.
    #[serde(default)]
    pub actions: Vec<EscalationAction>,
    /// When the rule was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last admin edit.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl EscalationRule {
    /// Create an active rule with the given name and priority.
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: RuleId::new(),
            name: name.into(),
            description: String::new(),
            is_active: true,
            priority,
            trigger_severities: BTreeSet::new(),
            trigger_statuses: BTreeSet::new(),
            trigger_departments: BTreeSet::new(),
            trigger_locations: BTreeSet::new(),
            trigger_after_seconds: None,
            repeat_interval_seconds: None,
            actions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Restrict to the given severity tokens.
    pub fn with_severities<I, S>(mut self, severities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_severities = severities.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given status tokens.
    pub fn with_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given departments.
    pub fn with_departments<I, S>(mut self, departments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_departments = departments.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given locations.
    pub fn with_locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_locations = locations.into_iter().map(Into::into).collect();
        self
    }

    /// Require the given elapsed time since the anchor before triggering.
    pub fn with_trigger_after(mut self, seconds: u64) -> Self {
        self.trigger_after_seconds = Some(seconds);
        self
    }

    /// Make the rule repeat-eligible with the given re-fire interval.
    pub fn with_repeat_interval(mut self, seconds: u64) -> Self {
        self.repeat_interval_seconds = Some(seconds);
        self
    }

    /// Append an action. Stored order is execution order.
    pub fn with_action(mut self, action: EscalationAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Deactivate the rule.
    pub fn disabled(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether duration triggers anchor on the last escalation time.
    pub fn anchors_on_last_escalation(&self) -> bool {
        self.repeat_interval_seconds.is_some()
    }

    /// Effective re-arm window for this rule.
    pub fn rearm_seconds(&self, default_window: u64) -> u64 {
        self.repeat_interval_seconds.unwrap_or(default_window)
    }

    /// Check structural validity of the rule and every owned action.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EngineError::Configuration(format!(
                "Rule {} has no name",
                self.id
            )));
        }
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }
}
