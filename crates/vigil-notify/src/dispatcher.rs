//! Action dispatch.
//!
//! Turns one escalation action into notification attempts: resolve the
//! target, render content per recipient, send over each configured channel.
//! Channel failures are isolated; a failed send produces a failed history
//! row and the remaining attempts proceed. Dispatch itself never errors,
//! so callers always get a full set of rows to persist.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use vigil_core::{
    Channel, EscalationAction, IncidentSnapshot, NotificationHistory, RecipientType, RuleId,
    SuccessPolicy,
};

use crate::channels::SenderRegistry;
use crate::message::OutboundMessage;
use crate::recipients::{Recipient, RecipientResolver};
use crate::template::TemplateStore;

/// Everything the dispatcher needs to execute one action.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Incident the action fires against.
    pub incident: IncidentSnapshot,
    /// Source rule; `None` for manual escalations.
    pub rule_id: Option<RuleId>,
    /// Rule name snapshot for rendering and history.
    pub rule_name: String,
    /// Priority recorded on notification rows.
    pub priority: i32,
    /// The action to execute.
    pub action: EscalationAction,
    /// Operator-supplied reason, set on manual escalations.
    pub reason: Option<String>,
}

/// Result of dispatching one action.
#[derive(Debug, Default)]
pub struct ActionDispatchOutcome {
    /// Channel attempts made, including ones that failed before a send.
    pub attempted: usize,
    /// Attempts the transport accepted.
    pub delivered: usize,
    /// Aggregate success under the configured policy.
    pub is_successful: bool,
    /// One row per (recipient, channel) attempt.
    pub notifications: Vec<NotificationHistory>,
}

impl ActionDispatchOutcome {
    /// Summary line for the escalation-history row.
    pub fn details(&self) -> String {
        format!("{}/{} notifications delivered", self.delivered, self.attempted)
    }

    /// First failure text, if any attempt failed.
    pub fn first_error(&self) -> Option<String> {
        self.notifications
            .iter()
            .find_map(|n| n.error.clone())
    }
}

/// Resolves, renders and sends notifications for escalation actions.
pub struct NotificationDispatcher {
    senders: Arc<SenderRegistry>,
    resolver: Arc<dyn RecipientResolver>,
    templates: Arc<TemplateStore>,
    success_policy: SuccessPolicy,
    channel_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        senders: Arc<SenderRegistry>,
        resolver: Arc<dyn RecipientResolver>,
        templates: Arc<TemplateStore>,
    ) -> Self {
        Self {
            senders,
            resolver,
            templates,
            success_policy: SuccessPolicy::AnyChannel,
            channel_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_success_policy(mut self, policy: SuccessPolicy) -> Self {
        self.success_policy = policy;
        self
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    /// Execute one action end to end.
    ///
    /// Always returns an outcome; failures show up as failed notification
    /// rows rather than an error.
    pub async fn dispatch(&self, ctx: &ActionContext) -> ActionDispatchOutcome {
        let recipients = match self.resolver.resolve_target(&ctx.action.target).await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(
                    target = %ctx.action.target,
                    error = %e,
                    "Recipient resolution failed"
                );
                return self.all_failed(ctx, &e.to_string());
            }
        };

        let mut notifications = Vec::new();
        for recipient in &recipients {
            self.dispatch_to_recipient(ctx, recipient, &mut notifications)
                .await;
        }

        self.finish(notifications)
    }

    async fn dispatch_to_recipient(
        &self,
        ctx: &ActionContext,
        recipient: &Recipient,
        notifications: &mut Vec<NotificationHistory>,
    ) {
        // Content is channel-independent, render once per recipient.
        let context = render_context(ctx, recipient);
        let rendered = self.templates.render(&ctx.action.template_id, &context);

        for &channel in &ctx.action.channels {
            let row = NotificationHistory::pending(
                ctx.incident.id,
                recipient.id.clone(),
                recipient.recipient_type,
                channel,
                ctx.action.template_id.clone(),
                ctx.priority,
            );

            let rendered = match &rendered {
                Ok(rendered) => rendered,
                Err(e) => {
                    notifications.push(row.failed(e.to_string()));
                    continue;
                }
            };
            let row = row.with_content(rendered.subject.clone(), rendered.content.clone());

            let Some(address) = recipient.address_for(channel) else {
                notifications.push(row.failed(format!(
                    "Recipient {} has no {} address",
                    recipient.id, channel
                )));
                continue;
            };

            let Some(sender) = self.senders.get(channel).await else {
                notifications.push(row.failed(format!("No sender registered for {channel}")));
                continue;
            };
            if !sender.is_enabled() {
                notifications.push(row.failed(format!("Sender for {channel} is disabled")));
                continue;
            }

            let message = OutboundMessage {
                incident_id: ctx.incident.id,
                recipient_id: recipient.id.clone(),
                address: address.to_string(),
                channel,
                subject: row.subject.clone(),
                content: row.content.clone(),
                metadata: ctx.action.parameters.clone(),
            };

            let row = match tokio::time::timeout(self.channel_timeout, sender.send(&message)).await
            {
                Ok(Ok(receipt)) => {
                    debug!(
                        incident_id = %ctx.incident.id,
                        recipient = %recipient.id,
                        channel = %channel,
                        "Notification sent"
                    );
                    row.sent(receipt.provider_message_id)
                }
                Ok(Err(e)) => {
                    warn!(
                        incident_id = %ctx.incident.id,
                        recipient = %recipient.id,
                        channel = %channel,
                        error = %e,
                        "Notification send failed"
                    );
                    row.failed(e.to_string())
                }
                Err(_) => {
                    warn!(
                        incident_id = %ctx.incident.id,
                        recipient = %recipient.id,
                        channel = %channel,
                        "Notification send timed out"
                    );
                    row.failed(format!(
                        "Send timed out after {}s",
                        self.channel_timeout.as_secs()
                    ))
                }
            };
            notifications.push(row);
        }
    }

    /// Outcome where every channel attempt failed before resolution, one
    /// failed row per configured channel keyed by the target descriptor.
    fn all_failed(&self, ctx: &ActionContext, error: &str) -> ActionDispatchOutcome {
        let recipient_type = match &ctx.action.target {
            vigil_core::ActionTarget::Role(_) => RecipientType::Role,
            vigil_core::ActionTarget::User(_) => RecipientType::User,
            vigil_core::ActionTarget::Endpoint(_) => RecipientType::Endpoint,
        };

        let notifications = ctx
            .action
            .channels
            .iter()
            .map(|&channel| {
                NotificationHistory::pending(
                    ctx.incident.id,
                    ctx.action.target.to_string(),
                    recipient_type,
                    channel,
                    ctx.action.template_id.clone(),
                    ctx.priority,
                )
                .failed(error)
            })
            .collect();

        self.finish(notifications)
    }

    fn finish(&self, notifications: Vec<NotificationHistory>) -> ActionDispatchOutcome {
        let attempted = notifications.len();
        let delivered = notifications.iter().filter(|n| n.is_delivered()).count();
        ActionDispatchOutcome {
            attempted,
            delivered,
            is_successful: self.success_policy.is_successful(delivered, attempted),
            notifications,
        }
    }
}

fn render_context(ctx: &ActionContext, recipient: &Recipient) -> serde_json::Value {
    let params: HashMap<&str, &str> = ctx
        .action
        .parameters
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    json!({
        "incident": {
            "id": ctx.incident.id.to_string(),
            "severity": ctx.incident.severity,
            "status": ctx.incident.status,
            "department": ctx.incident.department,
            "location": ctx.incident.location,
        },
        "recipient": recipient.display_name,
        "rule_name": ctx.rule_name,
        "reason": ctx.reason.clone().unwrap_or_default(),
        "params": params,
    })
}
