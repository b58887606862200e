//! Evaluation service.
//!
//! Event triggers, the overdue scanner and the deferred runner all feed
//! the same pipeline. Incident events arrive over an mpsc channel and are
//! evaluated by a single worker; the scanner and runner are spawned
//! alongside it and everything stops on a shared watch signal.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vigil_core::{EngineError, IncidentId, Result};

use crate::deferred::DeferredRunner;
use crate::pipeline::EscalationEngine;
use crate::scanner::OverdueScanner;

/// Work items accepted by the evaluation worker.
#[derive(Debug, Clone)]
pub enum EvaluationRequest {
    /// An incident was created or changed; evaluate it now.
    IncidentChanged(IncidentId),
    /// Run an overdue sweep outside the regular schedule.
    ScanOverdue,
}

/// Cheap cloneable handle for submitting work to a running service.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EvaluationRequest>,
}

impl EngineHandle {
    /// Queue an incident for evaluation.
    pub async fn incident_changed(&self, id: IncidentId) -> Result<()> {
        self.tx
            .send(EvaluationRequest::IncidentChanged(id))
            .await
            .map_err(|_| EngineError::Unavailable("Evaluation worker stopped".to_string()))
    }

    /// Queue an out-of-schedule overdue sweep.
    pub async fn request_scan(&self) -> Result<()> {
        self.tx
            .send(EvaluationRequest::ScanOverdue)
            .await
            .map_err(|_| EngineError::Unavailable("Evaluation worker stopped".to_string()))
    }
}

/// Spawns and owns the engine's background tasks.
pub struct EscalationService;

impl EscalationService {
    /// Start the worker, the overdue scanner and the deferred runner.
    pub fn start(engine: Arc<EscalationEngine>) -> RunningService {
        let (tx, rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scanner = Arc::new(OverdueScanner::new(engine.clone()));
        let runner = Arc::new(DeferredRunner::new(engine.clone()));

        let worker = tokio::spawn(Self::worker_loop(
            engine.clone(),
            scanner.clone(),
            rx,
            shutdown_rx.clone(),
        ));
        let scan_task = tokio::spawn(scanner.run(shutdown_rx.clone()));
        let deferred_task = tokio::spawn(runner.run(shutdown_rx));

        info!(
            scan_interval = engine.config.scan_interval_seconds,
            deferred_poll = engine.config.deferred_poll_seconds,
            "Escalation service started"
        );

        RunningService {
            handle: EngineHandle { tx },
            shutdown: shutdown_tx,
            tasks: vec![worker, scan_task, deferred_task],
        }
    }

    async fn worker_loop(
        engine: Arc<EscalationEngine>,
        scanner: Arc<OverdueScanner>,
        mut rx: mpsc::Receiver<EvaluationRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(EvaluationRequest::IncidentChanged(id)) => {
                            Self::evaluate_incident(&engine, &id).await;
                        }
                        Some(EvaluationRequest::ScanOverdue) => {
                            if let Err(e) = scanner.scan_once().await {
                                error!(error = %e, "Requested scan failed");
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Evaluation worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn evaluate_incident(engine: &EscalationEngine, id: &IncidentId) {
        let incident = match engine.incidents.get(id).await {
            Ok(Some(incident)) => incident,
            Ok(None) => {
                warn!(incident_id = %id, "Evaluation requested for unknown incident");
                return;
            }
            Err(e) => {
                error!(incident_id = %id, error = %e, "Incident fetch failed");
                return;
            }
        };

        match engine.evaluate(&incident).await {
            Ok(outcome) => {
                debug!(
                    incident_id = %id,
                    rules_fired = outcome.rules_fired,
                    suppressed = outcome.suppressed,
                    "Event evaluation complete"
                );
            }
            Err(e) => error!(incident_id = %id, error = %e, "Event evaluation failed"),
        }
    }
}

/// A started service: handle plus the means to stop it.
pub struct RunningService {
    handle: EngineHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningService {
    /// Handle for submitting work.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Signal shutdown and wait for every task to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Escalation service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use vigil_core::{
        ActionTarget, Channel, EngineConfig, EscalationAction, EscalationRule,
        InMemoryIncidentProvider, IncidentSnapshot,
    };
    use vigil_notify::channels::MemorySender;
    use vigil_notify::{
        NotificationDispatcher, Recipient, SenderRegistry, StaticDirectoryResolver, TemplateStore,
    };
    use vigil_storage::EscalationStore;

    async fn engine(provider: Arc<InMemoryIncidentProvider>) -> Arc<EscalationEngine> {
        let store = EscalationStore::memory().unwrap();
        store
            .save_rule(
                &EscalationRule::new("Critical paging", 1)
                    .with_severities(["critical"])
                    .with_action(EscalationAction::notify(
                        ActionTarget::Role("safety_manager".into()),
                        vec![Channel::Email],
                        "incident_escalation",
                    )),
            )
            .unwrap();

        let registry = Arc::new(SenderRegistry::new());
        registry
            .register(Arc::new(MemorySender::new(Channel::Email)))
            .await;

        let resolver = StaticDirectoryResolver::new();
        resolver
            .add_user(Recipient::user("u-1", "Ada").with_address(Channel::Email, "ada@example.com"))
            .await;
        resolver.assign_role("safety_manager", "u-1").await;

        let dispatcher = NotificationDispatcher::new(
            registry,
            Arc::new(resolver),
            Arc::new(TemplateStore::with_defaults().unwrap()),
        );

        Arc::new(EscalationEngine::new(
            store,
            dispatcher,
            provider,
            EngineConfig::default(),
        ))
    }

    async fn wait_for_history(
        engine: &EscalationEngine,
        incident_id: &vigil_core::IncidentId,
    ) -> usize {
        for _ in 0..50 {
            let count = engine.store().list_escalations(incident_id, None).unwrap().len();
            if count > 0 {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        0
    }

    #[tokio::test]
    async fn test_incident_event_evaluated_through_handle() {
        let provider = Arc::new(InMemoryIncidentProvider::new());
        let incident = IncidentSnapshot::new("critical", "open", "ops", "hq");
        let incident_id = incident.id;
        provider.upsert(incident).await;

        let engine = engine(provider).await;
        let service = EscalationService::start(engine.clone());

        service.handle().incident_changed(incident_id).await.unwrap();
        assert_eq!(wait_for_history(&engine, &incident_id).await, 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_requested_scan_and_event_trigger_share_guard() {
        let provider = Arc::new(InMemoryIncidentProvider::new());
        let incident = IncidentSnapshot::new("critical", "open", "ops", "hq");
        let incident_id = incident.id;
        provider.upsert(incident).await;

        let engine = engine(provider).await;
        let service = EscalationService::start(engine.clone());
        let handle = service.handle();

        // Event trigger and two requested scans race on the same incident;
        // the firing guard keeps the history to a single row.
        handle.incident_changed(incident_id).await.unwrap();
        handle.request_scan().await.unwrap();
        handle.request_scan().await.unwrap();

        assert_eq!(wait_for_history(&engine, &incident_id).await, 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            engine.store().list_escalations(&incident_id, None).unwrap().len(),
            1
        );

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_handle_fails_after_shutdown() {
        let provider = Arc::new(InMemoryIncidentProvider::new());
        let engine = engine(provider).await;
        let service = EscalationService::start(engine);

        let handle = service.handle();
        service.shutdown().await;

        let err = handle.incident_changed(vigil_core::IncidentId::new()).await;
        assert!(matches!(err, Err(EngineError::Unavailable(_))));
    }
}
