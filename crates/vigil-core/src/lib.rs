//! Core types for the Vigil escalation engine.
//!
//! This crate defines the data model shared by the rest of the platform:
//! incident snapshots, escalation rules and their actions, the append-only
//! history rows, the pure rule matcher, the engine configuration surface,
//! and the collaborator traits the engine depends on.
//!
//! Severity, status and department values are opaque tokens owned by the
//! surrounding compliance platform; the engine only compares them for set
//! membership and never interprets them.

pub mod config;
pub mod error;
pub mod history;
pub mod incident;
pub mod matcher;
pub mod provider;
pub mod rule;

pub use config::{EngineConfig, SuccessPolicy};
pub use error::{EngineError, Result};
pub use history::{
    EscalationHistory, Executor, NotificationHistory, NotificationStatus, RecipientType,
};
pub use incident::{IncidentId, IncidentSnapshot};
pub use matcher::{match_rules, InvalidRule, MatchOutcome};
pub use provider::{IncidentProvider, InMemoryIncidentProvider};
pub use rule::{ActionId, ActionTarget, ActionType, Channel, EscalationAction, EscalationRule, RuleId};
