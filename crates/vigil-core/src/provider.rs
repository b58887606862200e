//! Incident provider collaborator.
//!
//! The incident module owns incident records; the engine only reads
//! snapshots through this trait.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::incident::{IncidentId, IncidentSnapshot};

/// Read access to incident state.
#[async_trait]
pub trait IncidentProvider: Send + Sync {
    /// Fetch a fresh snapshot of one incident.
    async fn get(&self, id: &IncidentId) -> Result<Option<IncidentSnapshot>>;

    /// List incidents whose status is in the given open set.
    async fn list_open(&self, open_statuses: &BTreeSet<String>) -> Result<Vec<IncidentSnapshot>>;
}

/// In-memory incident provider for tests.
#[derive(Default)]
pub struct InMemoryIncidentProvider {
    incidents: Arc<RwLock<HashMap<IncidentId, IncidentSnapshot>>>,
}

impl InMemoryIncidentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an incident.
    pub async fn upsert(&self, incident: IncidentSnapshot) {
        self.incidents.write().await.insert(incident.id, incident);
    }

    /// Change an incident's status token.
    pub async fn set_status(&self, id: &IncidentId, status: impl Into<String>) {
        if let Some(incident) = self.incidents.write().await.get_mut(id) {
            incident.status = status.into();
            incident.updated_at = chrono::Utc::now();
        }
    }

    /// Record that an incident was escalated now.
    pub async fn mark_escalated(&self, id: &IncidentId) {
        if let Some(incident) = self.incidents.write().await.get_mut(id) {
            incident.last_escalated_at = Some(chrono::Utc::now());
        }
    }
}

#[async_trait]
impl IncidentProvider for InMemoryIncidentProvider {
    async fn get(&self, id: &IncidentId) -> Result<Option<IncidentSnapshot>> {
        Ok(self.incidents.read().await.get(id).cloned())
    }

    async fn list_open(&self, open_statuses: &BTreeSet<String>) -> Result<Vec<IncidentSnapshot>> {
        Ok(self
            .incidents
            .read()
            .await
            .values()
            .filter(|i| open_statuses.contains(&i.status))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_provider() {
        let provider = InMemoryIncidentProvider::new();
        let incident = IncidentSnapshot::new("critical", "open", "ops", "hq");
        let id = incident.id;
        provider.upsert(incident).await;

        assert!(provider.get(&id).await.unwrap().is_some());

        let open: BTreeSet<String> = ["open".to_string()].into_iter().collect();
        assert_eq!(provider.list_open(&open).await.unwrap().len(), 1);

        provider.set_status(&id, "closed").await;
        assert!(provider.list_open(&open).await.unwrap().is_empty());
        assert_eq!(provider.get(&id).await.unwrap().unwrap().status, "closed");
    }
}
