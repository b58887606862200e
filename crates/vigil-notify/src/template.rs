//! Notification template rendering.
//!
//! Templates are registered per template id with a subject line and a body,
//! both minijinja sources. Rendering context carries the incident fields,
//! the action parameters, and the recipient display name.

use std::sync::RwLock;

use minijinja::Environment;
use serde::{Deserialize, Serialize};

use vigil_core::{EngineError, Result};

/// A registered notification template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDefinition {
    /// Template id referenced by actions.
    pub id: String,
    /// Subject-line template source.
    pub subject: String,
    /// Body template source.
    pub body: String,
}

impl TemplateDefinition {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Rendered subject and content for one (recipient, channel) pair.
#[derive(Debug, Clone)]
pub struct RenderedContent {
    pub subject: String,
    pub content: String,
}

/// Template registry and renderer.
pub struct TemplateStore {
    env: RwLock<Environment<'static>>,
}

impl TemplateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            env: RwLock::new(Environment::new()),
        }
    }

    /// Create a store pre-loaded with the built-in escalation templates.
    pub fn with_defaults() -> Result<Self> {
        let store = Self::new();
        store.register(TemplateDefinition::new(
            "incident_escalation",
            "[{{ incident.severity | upper }}] Incident in {{ incident.department }} requires attention",
            "Hello {{ recipient }},\n\n\
             An incident reported at {{ incident.location }} ({{ incident.department }}) \
             has status '{{ incident.status }}' and severity '{{ incident.severity }}'. \
             It was escalated by rule '{{ rule_name }}'.\n\n\
             Incident id: {{ incident.id }}",
        ))?;
        store.register(TemplateDefinition::new(
            "manual_escalation",
            "Incident {{ incident.id }} escalated by an operator",
            "Hello {{ recipient }},\n\n\
             An operator escalated the incident at {{ incident.location }} \
             ({{ incident.department }}).\n\nReason: {{ reason }}\n\n\
             Incident id: {{ incident.id }}",
        ))?;
        Ok(store)
    }

    /// Register or replace a template.
    pub fn register(&self, definition: TemplateDefinition) -> Result<()> {
        let mut env = self
            .env
            .write()
            .map_err(|_| EngineError::Template("Template store lock poisoned".into()))?;
        env.add_template_owned(format!("{}.subject", definition.id), definition.subject)
            .map_err(|e| EngineError::Template(format!("Invalid subject template '{}': {e}", definition.id)))?;
        env.add_template_owned(format!("{}.body", definition.id), definition.body)
            .map_err(|e| EngineError::Template(format!("Invalid body template '{}': {e}", definition.id)))?;
        Ok(())
    }

    /// Render subject and body for a template id against a context value.
    pub fn render(&self, template_id: &str, context: &serde_json::Value) -> Result<RenderedContent> {
        let env = self
            .env
            .read()
            .map_err(|_| EngineError::Template("Template store lock poisoned".into()))?;

        let subject = Self::render_one(&env, &format!("{template_id}.subject"), context)?;
        let content = Self::render_one(&env, &format!("{template_id}.body"), context)?;
        Ok(RenderedContent { subject, content })
    }

    fn render_one(
        env: &Environment<'static>,
        name: &str,
        context: &serde_json::Value,
    ) -> Result<String> {
        let template = env
            .get_template(name)
            .map_err(|_| EngineError::Template(format!("Unknown template: {name}")))?;
        template
            .render(minijinja::Value::from_serialize(context))
            .map_err(|e| EngineError::Template(format!("Render failed for '{name}': {e}")))
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}
