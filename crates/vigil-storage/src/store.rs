//! Escalation persistence using redb.
//!
//! One database file holds rules, history, firings, and the deferred
//! queue, so an action's escalation row and its notification rows commit
//! in a single write transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use vigil_core::{
    EscalationHistory, EscalationRule, IncidentId, NotificationHistory, NotificationStatus, RuleId,
};

use crate::deferred::DeferredAction;
use crate::error::{Result, StoreError};

// Table definitions
const RULES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("escalation_rules");
const ESCALATION_HISTORY_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("escalation_history");
const NOTIFICATION_HISTORY_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("notification_history");
const FIRINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rule_firings");
const DEFERRED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("deferred_actions");

/// Configuration for the escalation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationStoreConfig {
    /// Path to the database file.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

fn default_create_dirs() -> bool {
    true
}

impl EscalationStoreConfig {
    /// Create a new config with the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }

    /// Create a config for in-memory use (backed by a temp file).
    pub fn memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            create_dirs: false,
        }
    }
}

/// Persistent storage for rules, history, firings and deferred actions.
pub struct EscalationStore {
    db: Database,
    /// Temp file path for cleanup (if using memory mode).
    temp_path: Option<PathBuf>,
}

impl EscalationStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let (db, temp_path) = Self::open_db(&path_str, true)?;
        Ok(Arc::new(Self { db, temp_path }))
    }

    /// Open a store from configuration.
    pub fn from_config(config: &EscalationStoreConfig) -> Result<Arc<Self>> {
        let (db, temp_path) = Self::open_db(&config.path, config.create_dirs)?;
        Ok(Arc::new(Self { db, temp_path }))
    }

    /// Create an in-memory store backed by a unique temp file.
    pub fn memory() -> Result<Arc<Self>> {
        Self::open(":memory:")
    }

    fn open_db(path_str: &str, create_dirs: bool) -> Result<(Database, Option<PathBuf>)> {
        if path_str == ":memory:" {
            let temp_path =
                std::env::temp_dir().join(format!("vigil_store_{}.redb", uuid::Uuid::new_v4()));
            let db = Database::create(&temp_path)?;
            return Ok((db, Some(temp_path)));
        }

        let path_ref = Path::new(path_str);
        if create_dirs {
            if let Some(parent) = path_ref.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };
        Ok((db, None))
    }

    // ---- Rules ----

    /// Save a rule, replacing any previous version.
    pub fn save_rule(&self, rule: &EscalationRule) -> Result<()> {
        let key = format!("rule:{}", rule.id);
        let value = serde_json::to_vec(rule)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RULES_TABLE)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a rule by id.
    pub fn load_rule(&self, id: &RuleId) -> Result<Option<EscalationRule>> {
        let key = format!("rule:{}", id);

        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(RULES_TABLE) {
            Ok(t) => t,
            Err(_) => return Ok(None),
        };

        match table.get(key.as_str())? {
            Some(value) => {
                let rule = serde_json::from_slice(value.value())?;
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    /// Delete a rule. Its actions go with it; its history rows do not.
    pub fn delete_rule(&self, id: &RuleId) -> Result<bool> {
        let key = format!("rule:{}", id);

        let write_txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = write_txn.open_table(RULES_TABLE)?;
            existed = table.remove(key.as_str())?.is_some();
        }
        write_txn.commit()?;
        Ok(existed)
    }

    /// List all rules.
    pub fn list_rules(&self) -> Result<Vec<EscalationRule>> {
        let mut rules = Vec::new();

        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(RULES_TABLE) {
            Ok(t) => t,
            Err(_) => return Ok(rules), // Table doesn't exist yet
        };

        for result in table.iter()? {
            let (_, value) = result?;
            let rule: EscalationRule = serde_json::from_slice(value.value())?;
            rules.push(rule);
        }

        Ok(rules)
    }

    /// List active rules only.
    pub fn list_active_rules(&self) -> Result<Vec<EscalationRule>> {
        Ok(self.list_rules()?.into_iter().filter(|r| r.is_active).collect())
    }

    /// Count stored rules.
    pub fn rule_count(&self) -> Result<usize> {
        Ok(self.list_rules()?.len())
    }

    // ---- History ----

    /// Record one action execution: the escalation row plus every
    /// notification row, committed together.
    pub fn record_action(
        &self,
        escalation: &EscalationHistory,
        notifications: &[NotificationHistory],
    ) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut esc_table = write_txn.open_table(ESCALATION_HISTORY_TABLE)?;
            let key = format!("esc:{}:{}", escalation.incident_id, escalation.id);
            let value = serde_json::to_vec(escalation)?;
            esc_table.insert(key.as_str(), value.as_slice())?;

            let mut notif_table = write_txn.open_table(NOTIFICATION_HISTORY_TABLE)?;
            for notification in notifications {
                let key = format!("notif:{}", notification.id);
                let value = serde_json::to_vec(notification)?;
                notif_table.insert(key.as_str(), value.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List escalation history for an incident, newest first.
    pub fn list_escalations(
        &self,
        incident_id: &IncidentId,
        limit: Option<usize>,
    ) -> Result<Vec<EscalationHistory>> {
        let mut entries = Vec::new();

        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(ESCALATION_HISTORY_TABLE) {
            Ok(t) => t,
            Err(_) => return Ok(entries),
        };

        let prefix = format!("esc:{}:", incident_id);
        for result in table.iter()? {
            let (key, value) = result?;
            if key.value().starts_with(&prefix) {
                let entry: EscalationHistory = serde_json::from_slice(value.value())?;
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }

        Ok(entries)
    }

    /// List escalation history for one (incident, rule) pair.
    pub fn list_escalations_for_rule(
        &self,
        incident_id: &IncidentId,
        rule_id: &RuleId,
    ) -> Result<Vec<EscalationHistory>> {
        Ok(self
            .list_escalations(incident_id, None)?
            .into_iter()
            .filter(|e| e.rule_id.as_ref() == Some(rule_id))
            .collect())
    }

    /// List notification history for an incident, newest first.
    pub fn list_notifications(
        &self,
        incident_id: &IncidentId,
        limit: Option<usize>,
    ) -> Result<Vec<NotificationHistory>> {
        let mut entries = Vec::new();

        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(NOTIFICATION_HISTORY_TABLE) {
            Ok(t) => t,
            Err(_) => return Ok(entries),
        };

        for result in table.iter()? {
            let (_, value) = result?;
            let entry: NotificationHistory = serde_json::from_slice(value.value())?;
            if &entry.incident_id == incident_id {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }

        Ok(entries)
    }

    /// Apply a delivery callback: only `status`, `error` and `updated_at`
    /// may change on a notification row.
    pub fn update_notification_status(
        &self,
        notification_id: &str,
        status: NotificationStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let key = format!("notif:{}", notification_id);

        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(NOTIFICATION_HISTORY_TABLE)?;
            let existing = match table.get(key.as_str())? {
                Some(value) => {
                    let entry: NotificationHistory = serde_json::from_slice(value.value())?;
                    Some(entry)
                }
                None => None,
            };

            match existing {
                Some(mut entry) => {
                    entry.status = status;
                    entry.error = error;
                    entry.updated_at = Utc::now();
                    let value = serde_json::to_vec(&entry)?;
                    table.insert(key.as_str(), value.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    // ---- Firing guard ----

    /// Atomically claim the right to fire `rule_id` against `incident_id`.
    ///
    /// The check and the insert happen inside one write transaction; redb
    /// serializes writers, so concurrent scanner, event and manual paths
    /// cannot both claim the same pair within the re-arm window. Returns
    /// `false` when the pair fired within the window (duplicate prevented).
    pub fn try_claim_firing(
        &self,
        incident_id: &IncidentId,
        rule_id: &RuleId,
        now: DateTime<Utc>,
        rearm_seconds: u64,
    ) -> Result<bool> {
        let key = format!("firing:{}:{}", incident_id, rule_id);

        let write_txn = self.db.begin_write()?;
        let claimed = {
            let mut table = write_txn.open_table(FIRINGS_TABLE)?;

            let last_fired: Option<i64> = match table.get(key.as_str())? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };

            let within_window = last_fired.is_some_and(|ts| {
                let last = DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or(now);
                now - last < Duration::seconds(rearm_seconds as i64)
            });

            if within_window {
                false
            } else {
                let value = serde_json::to_vec(&now.timestamp())?;
                table.insert(key.as_str(), value.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(claimed)
    }

    /// Last time a rule fired against an incident.
    pub fn last_firing(
        &self,
        incident_id: &IncidentId,
        rule_id: &RuleId,
    ) -> Result<Option<DateTime<Utc>>> {
        let key = format!("firing:{}:{}", incident_id, rule_id);

        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(FIRINGS_TABLE) {
            Ok(t) => t,
            Err(_) => return Ok(None),
        };

        match table.get(key.as_str())? {
            Some(value) => {
                let ts: i64 = serde_json::from_slice(value.value())?;
                Ok(DateTime::<Utc>::from_timestamp(ts, 0))
            }
            None => Ok(None),
        }
    }

    /// Re-arm every rule for an incident. Called by the incident module
    /// when the incident's underlying state changes.
    pub fn reset_firings(&self, incident_id: &IncidentId) -> Result<usize> {
        let prefix = format!("firing:{}:", incident_id);
        let mut removed = 0;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FIRINGS_TABLE)?;
            let mut keys_to_remove = Vec::new();

            for result in table.iter()? {
                let (key, _) = result?;
                if key.value().starts_with(&prefix) {
                    keys_to_remove.push(key.value().to_string());
                }
            }

            for key in keys_to_remove {
                if table.remove(key.as_str())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit()?;

        Ok(removed)
    }

    // ---- Deferred queue ----

    /// Persist a deferred action before the evaluation returns.
    pub fn enqueue_deferred(&self, entry: &DeferredAction) -> Result<()> {
        let key = format!("deferred:{}", entry.id);
        let value = serde_json::to_vec(entry)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DEFERRED_TABLE)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Entries due at or before `now`, oldest first.
    pub fn due_deferred(&self, now: DateTime<Utc>) -> Result<Vec<DeferredAction>> {
        let mut due = Vec::new();

        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(DEFERRED_TABLE) {
            Ok(t) => t,
            Err(_) => return Ok(due),
        };

        for result in table.iter()? {
            let (_, value) = result?;
            let entry: DeferredAction = serde_json::from_slice(value.value())?;
            if entry.is_due(now) {
                due.push(entry);
            }
        }

        due.sort_by(|a, b| a.due_at.cmp(&b.due_at));
        Ok(due)
    }

    /// Remove one deferred entry.
    pub fn remove_deferred(&self, id: &str) -> Result<bool> {
        let key = format!("deferred:{}", id);

        let write_txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = write_txn.open_table(DEFERRED_TABLE)?;
            existed = table.remove(key.as_str())?.is_some();
        }
        write_txn.commit()?;
        Ok(existed)
    }

    /// Cancel all deferred entries for an incident (e.g. it was closed).
    pub fn cancel_deferred_for_incident(&self, incident_id: &IncidentId) -> Result<usize> {
        let mut removed = 0;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DEFERRED_TABLE)?;
            let mut keys_to_remove = Vec::new();

            for result in table.iter()? {
                let (key, value) = result?;
                let entry: DeferredAction = serde_json::from_slice(value.value())?;
                if &entry.incident_id == incident_id {
                    keys_to_remove.push(key.value().to_string());
                }
            }

            for key in keys_to_remove {
                if table.remove(key.as_str())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit()?;

        Ok(removed)
    }

    /// Count pending deferred entries.
    pub fn deferred_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(DEFERRED_TABLE) {
            Ok(t) => t,
            Err(_) => return Ok(0),
        };

        let mut count = 0;
        let mut iter = table.iter()?;
        while iter.next().is_some() {
            count += 1;
        }
        Ok(count)
    }
}

impl Drop for EscalationStore {
    fn drop(&mut self) {
        // Clean up temp file if using memory mode
        if let Some(ref temp_path) = self.temp_path {
            let _ = std::fs::remove_file(temp_path);
        }
    }
}
