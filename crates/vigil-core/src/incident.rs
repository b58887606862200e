//! Incident snapshot consumed by the matcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncidentId(pub Uuid);

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of an incident used for rule evaluation.
///
/// Snapshots are immutable values; the deferred runner and the overdue
/// scanner re-fetch a fresh snapshot through `IncidentProvider` rather than
/// holding on to a stale one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSnapshot {
    /// Incident identifier.
    pub id: IncidentId,
    /// Severity token (opaque to the engine).
    pub severity: String,
    /// Status token (opaque to the engine).
    pub status: String,
    /// Owning department.
    pub department: String,
    /// Site or location name.
    pub location: String,
    /// When the incident was reported.
    pub reported_at: DateTime<Utc>,
    /// When the engine last escalated this incident, if ever.
    pub last_escalated_at: Option<DateTime<Utc>>,
    /// Last modification of the underlying incident record.
    pub updated_at: DateTime<Utc>,
}

impl IncidentSnapshot {
    /// Create a snapshot reported now.
    pub fn new(
        severity: impl Into<String>,
        status: impl Into<String>,
        department: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: IncidentId::new(),
            severity: severity.into(),
            status: status.into(),
            department: department.into(),
            location: location.into(),
            reported_at: now,
            last_escalated_at: None,
            updated_at: now,
        }
    }

    /// Set the report timestamp.
    pub fn with_reported_at(mut self, reported_at: DateTime<Utc>) -> Self {
        self.reported_at = reported_at;
        self
    }

    /// Set the last-escalation timestamp.
    pub fn with_last_escalated_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_escalated_at = Some(at);
        self
    }

    /// Anchor timestamp for duration-based triggers.
    ///
    /// Repeat-eligible rules measure from the last escalation; everything
    /// else measures from the report time.
    pub fn anchor(&self, from_last_escalation: bool) -> DateTime<Utc> {
        if from_last_escalation {
            self.last_escalated_at.unwrap_or(self.reported_at)
        } else {
            self.reported_at
        }
    }

    /// Elapsed seconds since the anchor, saturating at zero.
    pub fn elapsed_seconds(&self, from_last_escalation: bool, now: DateTime<Utc>) -> u64 {
        (now - self.anchor(from_last_escalation))
            .num_seconds()
            .max(0) as u64
    }
}
