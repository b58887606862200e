//! Rule snapshot cache.
//!
//! Each evaluation runs against an immutable snapshot of the active rule
//! set. Admin edits become visible only on the next refresh, so an
//! evaluation in flight never sees a half-edited rule.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use vigil_core::EscalationRule;

use crate::error::Result;
use crate::store::EscalationStore;

/// Immutable view of the active rule set at a point in time.
#[derive(Clone)]
pub struct RuleSnapshot {
    rules: Arc<[EscalationRule]>,
    loaded_at: Instant,
}

impl RuleSnapshot {
    fn new(rules: Vec<EscalationRule>) -> Self {
        Self {
            rules: rules.into(),
            loaded_at: Instant::now(),
        }
    }

    /// The rules in this snapshot.
    pub fn rules(&self) -> &[EscalationRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    /// Smallest duration threshold among duration-triggered rules, used as
    /// a cheap pre-filter by the overdue scanner.
    pub fn min_trigger_after_seconds(&self) -> Option<u64> {
        self.rules
            .iter()
            .filter_map(|r| r.trigger_after_seconds)
            .min()
    }
}

/// Bounded-refresh cache over the stored active rules.
pub struct RuleCache {
    store: Arc<EscalationStore>,
    refresh_interval: Duration,
    current: RwLock<Option<RuleSnapshot>>,
}

impl RuleCache {
    /// Create a cache refreshing at most every `refresh_seconds`.
    pub fn new(store: Arc<EscalationStore>, refresh_seconds: u64) -> Self {
        Self {
            store,
            refresh_interval: Duration::from_secs(refresh_seconds),
            current: RwLock::new(None),
        }
    }

    /// Get the current snapshot, reloading from the store if stale.
    ///
    /// Callers keep the returned snapshot for the whole evaluation; a
    /// concurrent refresh replaces the cached copy without touching
    /// snapshots already handed out.
    pub async fn snapshot(&self) -> Result<RuleSnapshot> {
        {
            let current = self.current.read().await;
            if let Some(snapshot) = current.as_ref() {
                if snapshot.age() < self.refresh_interval {
                    return Ok(snapshot.clone());
                }
            }
        }

        let mut current = self.current.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(snapshot) = current.as_ref() {
            if snapshot.age() < self.refresh_interval {
                return Ok(snapshot.clone());
            }
        }

        let rules = self.store.list_active_rules()?;
        let snapshot = RuleSnapshot::new(rules);
        *current = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next read reloads.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{ActionTarget, Channel, EscalationAction};

    fn rule(name: &str, trigger_after: Option<u64>) -> EscalationRule {
        let mut rule = EscalationRule::new(name, 1).with_action(EscalationAction::notify(
            ActionTarget::Role("safety_manager".into()),
            vec![Channel::Email],
            "incident_escalation",
        ));
        rule.trigger_after_seconds = trigger_after;
        rule
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_edits() {
        let store = EscalationStore::memory().unwrap();
        store.save_rule(&rule("First", None)).unwrap();

        let cache = RuleCache::new(store.clone(), 3600);
        let snapshot = cache.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        // Admin adds a rule mid-evaluation; the held snapshot is unchanged.
        store.save_rule(&rule("Second", None)).unwrap();
        assert_eq!(snapshot.len(), 1);

        // After invalidation the new rule is visible.
        cache.invalidate().await;
        let refreshed = cache.snapshot().await.unwrap();
        assert_eq!(refreshed.len(), 2);
    }

    #[tokio::test]
    async fn test_min_trigger_after() {
        let store = EscalationStore::memory().unwrap();
        store.save_rule(&rule("Fast", Some(600))).unwrap();
        store.save_rule(&rule("Slow", Some(7200))).unwrap();
        store.save_rule(&rule("Immediate", None)).unwrap();

        let cache = RuleCache::new(store, 3600);
        let snapshot = cache.snapshot().await.unwrap();
        assert_eq!(snapshot.min_trigger_after_seconds(), Some(600));
    }

    #[tokio::test]
    async fn test_empty_store_yields_empty_snapshot() {
        let store = EscalationStore::memory().unwrap();
        let cache = RuleCache::new(store, 60);
        let snapshot = cache.snapshot().await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.min_trigger_after_seconds(), None);
    }
}
