//! Notification dispatch for the Vigil escalation engine.
//!
//! This crate turns an escalation action into concrete deliveries:
//! recipient resolution, per-channel template rendering, and independent
//! channel sends with partial-failure isolation.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `webhook` | ✅ | Webhook and HTTP gateway senders via reqwest |
//! | `email` | ✅ | Email sender via SMTP (lettre) |

pub mod channels;
pub mod dispatcher;
pub mod message;
pub mod recipients;
pub mod template;

pub use channels::{ChannelSender, SenderRegistry};
pub use dispatcher::{ActionContext, ActionDispatchOutcome, NotificationDispatcher};
pub use message::{DeliveryReceipt, OutboundMessage};
pub use recipients::{Recipient, RecipientResolver, StaticDirectoryResolver};
pub use template::{RenderedContent, TemplateDefinition, TemplateStore};
