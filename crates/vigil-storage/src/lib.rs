//! Persistence for the Vigil escalation engine.
//!
//! Backed by redb: rule definitions, the append-only escalation and
//! notification history, the atomic (incident, rule) firing guard, and the
//! deferred-action queue all live in one database file so an action's
//! history rows commit together.

pub mod deferred;
pub mod error;
pub mod snapshot;
pub mod store;

pub use deferred::DeferredAction;
pub use error::{Result, StoreError};
pub use snapshot::{RuleCache, RuleSnapshot};
pub use store::{EscalationStore, EscalationStoreConfig};
