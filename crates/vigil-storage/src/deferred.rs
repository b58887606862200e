//! Deferred action entries.
//!
//! An action with a delay is persisted here before the evaluation returns,
//! so the delay survives a process restart. The runner re-fetches the
//! incident before executing and cancels entries for closed incidents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::{EscalationAction, IncidentId, RuleId};

/// A persisted, delayed action execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredAction {
    /// Entry identifier.
    pub id: String,
    /// Incident the action will fire against.
    pub incident_id: IncidentId,
    /// Source rule.
    pub rule_id: RuleId,
    /// Rule name snapshot for history denormalization at execution time.
    pub rule_name: String,
    /// Priority of the source rule.
    pub priority: i32,
    /// The action to execute.
    pub action: EscalationAction,
    /// Execute at or after this time.
    pub due_at: DateTime<Utc>,
    /// When the entry was enqueued.
    pub created_at: DateTime<Utc>,
}

impl DeferredAction {
    /// Create an entry due at the given time.
    pub fn new(
        incident_id: IncidentId,
        rule_id: RuleId,
        rule_name: impl Into<String>,
        priority: i32,
        action: EscalationAction,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            incident_id,
            rule_id,
            rule_name: rule_name.into(),
            priority,
            action,
            due_at,
            created_at: Utc::now(),
        }
    }

    /// Whether the entry is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vigil_core::{ActionTarget, Channel, EscalationAction};

    #[test]
    fn test_due_check() {
        let action = EscalationAction::notify(
            ActionTarget::User("u-1".into()),
            vec![Channel::Email],
            "incident_escalation",
        );
        let now = Utc::now();
        let entry = DeferredAction::new(
            IncidentId::new(),
            RuleId::new(),
            "Rule",
            1,
            action,
            now + Duration::minutes(5),
        );

        assert!(!entry.is_due(now));
        assert!(entry.is_due(now + Duration::minutes(6)));
    }
}
