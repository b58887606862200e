//! Manual escalation.
//!
//! An operator escalates an incident directly, bypassing rule matching and
//! the firing guard. The configured recipient roles are notified over the
//! configured channels, and exactly one history row records the event with
//! the operator's identity and reason.

use std::sync::Arc;

use tracing::{info, warn};

use vigil_core::{
    EngineError, EscalationAction, EscalationHistory, IncidentId, NotificationHistory, Result,
};
use vigil_notify::ActionContext;

use crate::pipeline::EscalationEngine;

/// Handles operator-triggered escalations.
pub struct ManualEscalationHandler {
    engine: Arc<EscalationEngine>,
}

impl ManualEscalationHandler {
    pub fn new(engine: Arc<EscalationEngine>) -> Self {
        Self { engine }
    }

    /// Escalate an incident on an operator's authority.
    ///
    /// Notifies every configured role; delivery failures are captured in
    /// the notification rows and never abort the escalation. The history
    /// row is written even when every channel fails.
    pub async fn escalate(
        &self,
        incident_id: &IncidentId,
        reason: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<EscalationHistory> {
        let reason = reason.into();
        let user_id = user_id.into();

        let incident = self
            .engine
            .incidents
            .get(incident_id)
            .await?
            .ok_or_else(|| EngineError::IncidentNotFound(incident_id.to_string()))?;

        let config = &self.engine.config;
        let mut notifications: Vec<NotificationHistory> = Vec::new();
        let mut attempted = 0;
        let mut delivered = 0;

        for role in &config.manual_recipient_roles {
            let action = EscalationAction::notify(
                vigil_core::ActionTarget::Role(role.clone()),
                config.manual_channels.clone(),
                config.manual_template_id.clone(),
            );
            let ctx = ActionContext {
                incident: incident.clone(),
                rule_id: None,
                rule_name: "Manual escalation".to_string(),
                priority: 0,
                action,
                reason: Some(reason.clone()),
            };

            let outcome = self.engine.dispatcher.dispatch(&ctx).await;
            attempted += outcome.attempted;
            delivered += outcome.delivered;
            notifications.extend(outcome.notifications);
        }

        let is_successful = config.success_policy.is_successful(delivered, attempted);
        if !is_successful {
            warn!(
                incident_id = %incident_id,
                delivered,
                attempted,
                "Manual escalation notifications did not meet the success policy"
            );
        }

        let error = if is_successful {
            None
        } else {
            notifications.iter().find_map(|n| n.error.clone())
        };
        let mut history = EscalationHistory::manual(*incident_id, &reason, &user_id).with_outcome(
            is_successful,
            format!("{delivered}/{attempted} notifications delivered"),
            error,
        );
        history.action_target = config
            .manual_recipient_roles
            .iter()
            .map(|r| format!("role:{r}"))
            .collect::<Vec<_>>()
            .join(",");

        self.engine
            .record_with_retry(&history, &notifications)
            .await?;

        info!(
            incident_id = %incident_id,
            user_id = %user_id,
            delivered,
            attempted,
            "Manual escalation recorded"
        );
        Ok(history)
    }
}
