//! Evaluation pipeline.
//!
//! One evaluation takes an incident snapshot through match, firing guard,
//! scheduling and dispatch. Action failures are isolated: a failed action
//! produces an unsuccessful history row and the remaining actions still
//! run. History writes are retried with backoff because losing an audit
//! row is worse than a slow evaluation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, info, warn};

use vigil_core::{
    match_rules, EngineConfig, EngineError, EscalationHistory, Executor, IncidentProvider,
    IncidentSnapshot, NotificationHistory, Result, RuleId,
};
use vigil_notify::{ActionContext, NotificationDispatcher};
use vigil_storage::{DeferredAction, EscalationStore, RuleCache};

use crate::scheduler::{self, Execution};

/// Counters summarizing one evaluation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvaluationOutcome {
    /// Rules whose conditions matched.
    pub rules_matched: usize,
    /// Matched rules that claimed the firing guard.
    pub rules_fired: usize,
    /// Matched rules suppressed by the re-arm window.
    pub suppressed: usize,
    /// Structurally invalid rules encountered.
    pub invalid_rules: usize,
    /// Actions executed inline.
    pub actions_executed: usize,
    /// Inline actions whose dispatch did not meet the success policy.
    pub actions_failed: usize,
    /// Actions persisted to the deferred queue.
    pub actions_deferred: usize,
}

/// The escalation engine: evaluation pipeline plus the collaborators it
/// needs to run one.
pub struct EscalationEngine {
    pub(crate) store: Arc<EscalationStore>,
    pub(crate) rules: RuleCache,
    pub(crate) dispatcher: NotificationDispatcher,
    pub(crate) incidents: Arc<dyn IncidentProvider>,
    pub(crate) config: EngineConfig,
}

impl EscalationEngine {
    pub fn new(
        store: Arc<EscalationStore>,
        dispatcher: NotificationDispatcher,
        incidents: Arc<dyn IncidentProvider>,
        config: EngineConfig,
    ) -> Self {
        let rules = RuleCache::new(store.clone(), config.rule_cache_refresh_seconds);
        // The config owns the success policy and the send timeout; every
        // dispatch path (rule, deferred, manual) goes through this one
        // dispatcher, so they cannot drift apart.
        let dispatcher = dispatcher
            .with_success_policy(config.success_policy)
            .with_channel_timeout(Duration::from_secs(config.channel_timeout_seconds));
        Self {
            store,
            rules,
            dispatcher,
            incidents,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<EscalationStore> {
        &self.store
    }

    /// Drop the cached rule snapshot so the next evaluation reloads.
    pub async fn invalidate_rules(&self) {
        self.rules.invalidate().await;
    }

    /// Evaluate one incident against the active rule set.
    pub async fn evaluate(&self, incident: &IncidentSnapshot) -> Result<EvaluationOutcome> {
        let now = Utc::now();
        let snapshot = self.rules.snapshot().await?;
        let matched = match_rules(incident, snapshot.rules(), now);

        let mut outcome = EvaluationOutcome {
            rules_matched: matched.matched.len(),
            invalid_rules: matched.invalid.len(),
            ..Default::default()
        };

        for invalid in &matched.invalid {
            warn!(
                rule_id = %invalid.rule_id,
                rule_name = %invalid.rule_name,
                error = %invalid.error,
                "Skipping structurally invalid rule"
            );
        }

        for rule in matched.matched {
            let rearm = rule.rearm_seconds(self.config.rearm_window_seconds);
            let claimed = self
                .store
                .try_claim_firing(&incident.id, &rule.id, now, rearm)?;
            if !claimed {
                debug!(
                    incident_id = %incident.id,
                    rule_id = %rule.id,
                    "Rule suppressed by re-arm window"
                );
                outcome.suppressed += 1;
                continue;
            }
            outcome.rules_fired += 1;
            info!(
                incident_id = %incident.id,
                rule_id = %rule.id,
                rule_name = %rule.name,
                "Rule fired"
            );

            for planned in scheduler::plan(rule, now) {
                match planned.execution {
                    Execution::Immediate => {
                        let succeeded = self
                            .execute_action(
                                incident,
                                Some(rule.id),
                                &rule.name,
                                rule.priority,
                                planned.action,
                                None,
                                Executor::System,
                            )
                            .await?;
                        outcome.actions_executed += 1;
                        if !succeeded {
                            outcome.actions_failed += 1;
                        }
                    }
                    Execution::Deferred(due_at) => {
                        let entry = DeferredAction::new(
                            incident.id,
                            rule.id,
                            &rule.name,
                            rule.priority,
                            planned.action,
                            due_at,
                        );
                        self.store.enqueue_deferred(&entry)?;
                        debug!(
                            incident_id = %incident.id,
                            rule_id = %rule.id,
                            due_at = %due_at,
                            "Action deferred"
                        );
                        outcome.actions_deferred += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Execute one due deferred entry.
    ///
    /// The incident is re-fetched first; entries for missing or closed
    /// incidents are dropped without executing. Returns whether the action
    /// actually ran.
    pub async fn execute_deferred(&self, entry: &DeferredAction) -> Result<bool> {
        let incident = self.incidents.get(&entry.incident_id).await?;
        let incident = match incident {
            Some(incident) if self.config.is_open(&incident.status) => incident,
            _ => {
                debug!(
                    incident_id = %entry.incident_id,
                    deferred_id = %entry.id,
                    "Dropping deferred action for missing or closed incident"
                );
                self.store.remove_deferred(&entry.id)?;
                return Ok(false);
            }
        };

        self.execute_action(
            &incident,
            Some(entry.rule_id),
            &entry.rule_name,
            entry.priority,
            entry.action.clone(),
            None,
            Executor::System,
        )
        .await?;
        self.store.remove_deferred(&entry.id)?;
        Ok(true)
    }

    /// Dispatch one action and record its history rows.
    ///
    /// Dispatch itself never errors; the only error path here is a
    /// persistence failure after retries. Returns whether the dispatch met
    /// the success policy.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn execute_action(
        &self,
        incident: &IncidentSnapshot,
        rule_id: Option<RuleId>,
        rule_name: &str,
        priority: i32,
        action: vigil_core::EscalationAction,
        reason: Option<String>,
        executed_by: Executor,
    ) -> Result<bool> {
        let ctx = ActionContext {
            incident: incident.clone(),
            rule_id,
            rule_name: rule_name.to_string(),
            priority,
            action,
            reason,
        };

        let dispatch = self.dispatcher.dispatch(&ctx).await;
        if !dispatch.is_successful {
            warn!(
                incident_id = %incident.id,
                rule_name = %ctx.rule_name,
                target = %ctx.action.target,
                delivered = dispatch.delivered,
                attempted = dispatch.attempted,
                "Action did not meet the success policy"
            );
        }

        let history = match rule_id {
            Some(rule_id) => EscalationHistory::for_action(
                incident.id,
                rule_id,
                rule_name,
                ctx.action.action_type,
                ctx.action.target.to_string(),
                executed_by,
            ),
            None => {
                let mut history = EscalationHistory::manual(
                    incident.id,
                    ctx.reason.clone().unwrap_or_default(),
                    match &executed_by {
                        Executor::User(id) => id.clone(),
                        Executor::System => "system".to_string(),
                    },
                );
                history.action_target = ctx.action.target.to_string();
                history
            }
        };
        let error = if dispatch.is_successful {
            None
        } else {
            dispatch.first_error()
        };
        let history = history.with_outcome(dispatch.is_successful, dispatch.details(), error);

        self.record_with_retry(&history, &dispatch.notifications)
            .await?;
        Ok(dispatch.is_successful)
    }

    /// Persist history rows, retrying with exponential backoff and jitter.
    pub(crate) async fn record_with_retry(
        &self,
        escalation: &EscalationHistory,
        notifications: &[NotificationHistory],
    ) -> Result<()> {
        let retries = self.config.history_write_retries;
        let base_ms = self.config.history_retry_backoff_ms.max(1);

        let mut attempt = 0;
        loop {
            match self.store.record_action(escalation, notifications) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retries => {
                    let backoff_ms = retry_backoff_ms(base_ms, attempt);
                    let jitter_ms = {
                        let mut rng = rand::thread_rng();
                        rng.gen_range(0..base_ms)
                    };
                    warn!(
                        incident_id = %escalation.incident_id,
                        attempt = attempt + 1,
                        error = %e,
                        "History write failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
                    attempt += 1;
                }
                Err(e) => {
                    // An unrecorded escalation is an audit gap; make it loud.
                    error!(
                        incident_id = %escalation.incident_id,
                        rule_name = %escalation.rule_name,
                        error = %e,
                        "History write failed after retries, audit row lost"
                    );
                    return Err(EngineError::Persistence(format!(
                        "History write failed after {} retries: {e}",
                        retries
                    )));
                }
            }
        }
    }
}

/// Doubles the base delay per attempt, saturating instead of overflowing
/// when attempt counts exceed the shift width.
fn retry_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use vigil_core::{
        ActionTarget, Channel, EscalationAction, EscalationRule, InMemoryIncidentProvider,
        SuccessPolicy,
    };
    use vigil_notify::channels::MemorySender;
    use vigil_notify::{Recipient, SenderRegistry, StaticDirectoryResolver, TemplateStore};

    async fn directory() -> StaticDirectoryResolver {
        let resolver = StaticDirectoryResolver::new();
        resolver
            .add_user(
                Recipient::user("u-1", "Ada")
                    .with_address(Channel::Email, "ada@example.com")
                    .with_address(Channel::Sms, "+15550001"),
            )
            .await;
        resolver.assign_role("safety_manager", "u-1").await;
        resolver
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    async fn engine_with(
        rules: Vec<EscalationRule>,
        provider: Arc<InMemoryIncidentProvider>,
    ) -> EscalationEngine {
        engine_with_config(rules, provider, EngineConfig::default()).await
    }

    async fn engine_with_config(
        rules: Vec<EscalationRule>,
        provider: Arc<InMemoryIncidentProvider>,
        config: EngineConfig,
    ) -> EscalationEngine {
        init_tracing();
        let store = EscalationStore::memory().unwrap();
        for rule in &rules {
            store.save_rule(rule).unwrap();
        }

        let registry = Arc::new(SenderRegistry::new());
        registry
            .register(Arc::new(MemorySender::new(Channel::Email)))
            .await;
        registry
            .register(Arc::new(MemorySender::new(Channel::Sms)))
            .await;

        let dispatcher = vigil_notify::NotificationDispatcher::new(
            registry,
            Arc::new(directory().await),
            Arc::new(TemplateStore::with_defaults().unwrap()),
        );

        EscalationEngine::new(store, dispatcher, provider, config)
    }

    fn notify_rule(name: &str, priority: i32) -> EscalationRule {
        EscalationRule::new(name, priority)
            .with_severities(["critical"])
            .with_action(EscalationAction::notify(
                ActionTarget::Role("safety_manager".into()),
                vec![Channel::Email],
                "incident_escalation",
            ))
    }

    fn incident() -> IncidentSnapshot {
        IncidentSnapshot::new("critical", "open", "operations", "plant-a")
    }

    #[tokio::test]
    async fn test_evaluate_fires_and_records_history() {
        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine_with(vec![notify_rule("Critical paging", 1)], provider).await;
        let incident = incident();

        let outcome = engine.evaluate(&incident).await.unwrap();
        assert_eq!(outcome.rules_matched, 1);
        assert_eq!(outcome.rules_fired, 1);
        assert_eq!(outcome.actions_executed, 1);
        assert_eq!(outcome.actions_failed, 0);

        let escalations = engine.store.list_escalations(&incident.id, None).unwrap();
        assert_eq!(escalations.len(), 1);
        assert!(escalations[0].is_successful);
        assert_eq!(escalations[0].executed_by, Executor::System);

        let notifications = engine.store.list_notifications(&incident.id, None).unwrap();
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_rearm_window_suppresses_second_evaluation() {
        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine_with(vec![notify_rule("Critical paging", 1)], provider).await;
        let incident = incident();

        let first = engine.evaluate(&incident).await.unwrap();
        assert_eq!(first.rules_fired, 1);

        // Same incident, same rule, inside the 24h window.
        let second = engine.evaluate(&incident).await.unwrap();
        assert_eq!(second.rules_fired, 0);
        assert_eq!(second.suppressed, 1);

        let escalations = engine.store.list_escalations(&incident.id, None).unwrap();
        assert_eq!(escalations.len(), 1);
    }

    #[tokio::test]
    async fn test_action_failure_does_not_block_later_actions() {
        // First action targets an unknown role, second is deliverable.
        let rule = EscalationRule::new("Two step", 1)
            .with_severities(["critical"])
            .with_action(EscalationAction::notify(
                ActionTarget::Role("ghost_role".into()),
                vec![Channel::Email],
                "incident_escalation",
            ))
            .with_action(EscalationAction::notify(
                ActionTarget::User("u-1".into()),
                vec![Channel::Sms],
                "incident_escalation",
            ));

        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine_with(vec![rule], provider).await;
        let incident = incident();

        let outcome = engine.evaluate(&incident).await.unwrap();
        assert_eq!(outcome.actions_executed, 2);
        assert_eq!(outcome.actions_failed, 1);

        let escalations = engine.store.list_escalations(&incident.id, None).unwrap();
        assert_eq!(escalations.len(), 2);
        assert_eq!(
            escalations.iter().filter(|e| e.is_successful).count(),
            1
        );
        // The failed action still produced its failed notification row.
        let notifications = engine.store.list_notifications(&incident.id, None).unwrap();
        assert_eq!(notifications.len(), 2);
    }

    #[tokio::test]
    async fn test_delayed_action_goes_to_deferred_queue() {
        let rule = EscalationRule::new("Delayed", 1)
            .with_severities(["critical"])
            .with_action(
                EscalationAction::notify(
                    ActionTarget::User("u-1".into()),
                    vec![Channel::Email],
                    "incident_escalation",
                )
                .with_delay(600),
            );

        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine_with(vec![rule], provider.clone()).await;
        let incident = incident();
        provider.upsert(incident.clone()).await;

        let outcome = engine.evaluate(&incident).await.unwrap();
        assert_eq!(outcome.actions_executed, 0);
        assert_eq!(outcome.actions_deferred, 1);
        assert_eq!(engine.store.deferred_count().unwrap(), 1);
        // No history until the deferred action actually runs.
        assert!(engine
            .store
            .list_escalations(&incident.id, None)
            .unwrap()
            .is_empty());

        // Execute the entry once due.
        let due = engine
            .store
            .due_deferred(Utc::now() + Duration::seconds(601))
            .unwrap();
        assert_eq!(due.len(), 1);
        assert!(engine.execute_deferred(&due[0]).await.unwrap());

        assert_eq!(engine.store.deferred_count().unwrap(), 0);
        assert_eq!(
            engine.store.list_escalations(&incident.id, None).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_deferred_entry_dropped_when_incident_closed() {
        let rule = EscalationRule::new("Delayed", 1)
            .with_severities(["critical"])
            .with_action(
                EscalationAction::notify(
                    ActionTarget::User("u-1".into()),
                    vec![Channel::Email],
                    "incident_escalation",
                )
                .with_delay(60),
            );

        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine_with(vec![rule], provider.clone()).await;
        let incident = incident();
        let incident_id = incident.id;
        provider.upsert(incident.clone()).await;

        engine.evaluate(&incident).await.unwrap();
        provider.set_status(&incident_id, "closed").await;

        let due = engine
            .store
            .due_deferred(Utc::now() + Duration::seconds(61))
            .unwrap();
        assert!(!engine.execute_deferred(&due[0]).await.unwrap());

        // No-op: entry removed, nothing recorded.
        assert_eq!(engine.store.deferred_count().unwrap(), 0);
        assert!(engine
            .store
            .list_escalations(&incident_id, None)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_rule_counted_and_siblings_fire() {
        let mut bad = notify_rule("Bad", 1);
        bad.actions[0].channels.clear();
        let good = notify_rule("Good", 2);

        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine_with(vec![bad, good], provider).await;

        let outcome = engine.evaluate(&incident()).await.unwrap();
        assert_eq!(outcome.invalid_rules, 1);
        assert_eq!(outcome.rules_fired, 1);
    }

    #[tokio::test]
    async fn test_configured_policy_applies_to_rule_path() {
        let rule = EscalationRule::new("Both channels", 1)
            .with_severities(["critical"])
            .with_action(EscalationAction::notify(
                ActionTarget::User("u-1".into()),
                // u-1 has no push token, so this attempt always fails.
                vec![Channel::Email, Channel::Push],
                "incident_escalation",
            ));

        // AllChannels set only through the engine config; the dispatcher is
        // built stock and must pick the policy up from there.
        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine_with_config(
            vec![rule],
            provider,
            EngineConfig::default().with_success_policy(SuccessPolicy::AllChannels),
        )
        .await;

        let incident = incident();
        let outcome = engine.evaluate(&incident).await.unwrap();
        assert_eq!(outcome.actions_failed, 1);

        let escalations = engine.store.list_escalations(&incident.id, None).unwrap();
        assert!(!escalations[0].is_successful);
        assert!(escalations[0].error.is_some());
        // One delivered and one failed row: unsuccessful only because the
        // configured policy demands every channel.
        let notifications = engine.store.list_notifications(&incident.id, None).unwrap();
        assert_eq!(notifications.iter().filter(|n| n.is_delivered()).count(), 1);
        assert_eq!(notifications.len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_rule_rearms_from_last_escalation() {
        let rule = EscalationRule::new("Hourly reminder", 1)
            .with_severities(["critical"])
            .with_trigger_after(3600)
            .with_repeat_interval(3600)
            .with_action(EscalationAction::notify(
                ActionTarget::User("u-1".into()),
                vec![Channel::Email],
                "incident_escalation",
            ));

        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine_with(vec![rule], provider.clone()).await;

        let incident = incident().with_reported_at(Utc::now() - Duration::hours(2));
        let incident_id = incident.id;
        provider.upsert(incident.clone()).await;

        // Never escalated: the anchor falls back to the report time, two
        // hours past the one-hour threshold.
        let first = engine.evaluate(&incident).await.unwrap();
        assert_eq!(first.rules_fired, 1);

        // The incident module records the escalation; the fresh anchor
        // keeps the rule quiet until the repeat interval elapses.
        provider.mark_escalated(&incident_id).await;
        let refreshed = provider.get(&incident_id).await.unwrap().unwrap();
        let second = engine.evaluate(&refreshed).await.unwrap();
        assert_eq!(second.rules_matched, 0);
        assert_eq!(second.rules_fired, 0);

        assert_eq!(
            engine.store.list_escalations(&incident_id, None).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_retry_backoff_saturates_on_large_attempt_counts() {
        assert_eq!(retry_backoff_ms(200, 0), 200);
        assert_eq!(retry_backoff_ms(200, 3), 1600);
        // Shift widths at or past 64 bits must cap, not overflow.
        assert_eq!(retry_backoff_ms(200, 63), 200u64.saturating_mul(1 << 63));
        assert_eq!(retry_backoff_ms(200, 64), u64::MAX);
        assert_eq!(retry_backoff_ms(200, 1000), u64::MAX);
    }
}
