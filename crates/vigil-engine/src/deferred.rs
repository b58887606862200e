//! Deferred-action runner.
//!
//! Polls the persisted queue and executes entries that have come due. The
//! queue lives in the store, so pending delays survive a restart and are
//! picked up by the first poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error};

use vigil_core::Result;

use crate::pipeline::EscalationEngine;

/// Executes due deferred actions on a poll interval.
pub struct DeferredRunner {
    engine: Arc<EscalationEngine>,
}

impl DeferredRunner {
    pub fn new(engine: Arc<EscalationEngine>) -> Self {
        Self { engine }
    }

    /// Execute everything currently due. Returns how many entries ran.
    pub async fn poll_once(&self) -> Result<usize> {
        let due = self.engine.store.due_deferred(Utc::now())?;
        let mut executed = 0;

        for entry in due {
            match self.engine.execute_deferred(&entry).await {
                Ok(true) => executed += 1,
                Ok(false) => {}
                Err(e) => {
                    // Leave the entry in place; the next poll retries it.
                    error!(
                        deferred_id = %entry.id,
                        incident_id = %entry.incident_id,
                        error = %e,
                        "Deferred action execution failed"
                    );
                }
            }
        }

        Ok(executed)
    }

    /// Poll until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.engine.config.deferred_poll_seconds);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Executed deferred actions"),
                        Err(e) => error!(error = %e, "Deferred poll failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Deferred runner shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use vigil_core::{
        ActionTarget, Channel, EngineConfig, EscalationAction, InMemoryIncidentProvider,
        IncidentSnapshot, RuleId,
    };
    use vigil_notify::channels::MemorySender;
    use vigil_notify::{
        NotificationDispatcher, Recipient, SenderRegistry, StaticDirectoryResolver, TemplateStore,
    };
    use vigil_storage::{DeferredAction, EscalationStore};

    async fn engine(provider: Arc<InMemoryIncidentProvider>) -> Arc<EscalationEngine> {
        let registry = Arc::new(SenderRegistry::new());
        registry
            .register(Arc::new(MemorySender::new(Channel::Email)))
            .await;

        let resolver = StaticDirectoryResolver::new();
        resolver
            .add_user(Recipient::user("u-1", "Ada").with_address(Channel::Email, "ada@example.com"))
            .await;

        let dispatcher = NotificationDispatcher::new(
            registry,
            Arc::new(resolver),
            Arc::new(TemplateStore::with_defaults().unwrap()),
        );

        Arc::new(EscalationEngine::new(
            EscalationStore::memory().unwrap(),
            dispatcher,
            provider,
            EngineConfig::default(),
        ))
    }

    fn entry_due_in_past(incident_id: vigil_core::IncidentId) -> DeferredAction {
        DeferredAction::new(
            incident_id,
            RuleId::new(),
            "Delayed paging",
            1,
            EscalationAction::notify(
                ActionTarget::User("u-1".into()),
                vec![Channel::Email],
                "incident_escalation",
            ),
            Utc::now() - ChronoDuration::seconds(5),
        )
    }

    #[tokio::test]
    async fn test_poll_executes_due_entries() {
        let provider = Arc::new(InMemoryIncidentProvider::new());
        let incident = IncidentSnapshot::new("critical", "open", "ops", "hq");
        let incident_id = incident.id;
        provider.upsert(incident).await;

        let engine = engine(provider).await;
        engine
            .store
            .enqueue_deferred(&entry_due_in_past(incident_id))
            .unwrap();

        let runner = DeferredRunner::new(engine.clone());
        assert_eq!(runner.poll_once().await.unwrap(), 1);
        assert_eq!(engine.store.deferred_count().unwrap(), 0);
        assert_eq!(
            engine.store.list_escalations(&incident_id, None).unwrap().len(),
            1
        );

        // Nothing left to do.
        assert_eq!(runner.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_poll_drops_entry_for_missing_incident() {
        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine(provider).await;

        let orphan = entry_due_in_past(vigil_core::IncidentId::new());
        engine.store.enqueue_deferred(&orphan).unwrap();

        let runner = DeferredRunner::new(engine.clone());
        assert_eq!(runner.poll_once().await.unwrap(), 0);
        assert_eq!(engine.store.deferred_count().unwrap(), 0);
    }
}
