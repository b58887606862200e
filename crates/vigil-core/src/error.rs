//! Error types for the escalation engine.

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy.
///
/// Per-action and per-channel failures are isolated and recorded in history
/// rather than propagated; variants here surface where a caller can actually
/// react to them.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed rule or action. Surfaced to administrators; evaluation of
    /// the offending rule is skipped while sibling rules proceed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A role or user target could not be resolved to recipients.
    #[error("Recipient resolution failed: {0}")]
    RecipientResolution(String),

    /// A channel transport failed to deliver.
    #[error("Channel delivery failed: {0}")]
    ChannelDelivery(String),

    /// History or notification write failure. Losing an audit row is a
    /// compliance failure, so these are retried before surfacing.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Template missing or failed to render.
    #[error("Template error: {0}")]
    Template(String),

    /// The referenced incident does not exist.
    #[error("Incident not found: {0}")]
    IncidentNotFound(String),

    /// The evaluation service is not running.
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}
