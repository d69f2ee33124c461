//! Audit policy
//!
//! Decides which classes and fields are audited, how audit tables are
//! named and who the current actor is.

use std::fmt;

use crate::config::AuditSettings;

/// Predicates and naming rules consulted while collecting and writing
pub trait AuditPolicy {
    fn is_audited(&self, class_name: &str) -> bool;

    fn is_audited_field(&self, class_name: &str, field: &str) -> bool;

    /// Who is making the change, if known
    fn current_actor(&self) -> Option<String>;

    fn table_prefix(&self) -> &str;

    fn table_suffix(&self) -> &str;
}

/// Resolves the current actor on demand
pub type ActorProvider = Box<dyn Fn() -> Option<String>>;

/// Policy backed by `AuditSettings`
pub struct ConfiguredPolicy {
    settings: AuditSettings,
    actor: Option<ActorProvider>,
}

impl ConfiguredPolicy {
    pub fn new(settings: AuditSettings) -> Self {
        Self {
            settings,
            actor: None,
        }
    }

    pub fn with_actor<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<String> + 'static,
    {
        self.actor = Some(Box::new(provider));
        self
    }

    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }
}

impl fmt::Debug for ConfiguredPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredPolicy")
            .field("settings", &self.settings)
            .field("actor", &self.actor.as_ref().map(|_| ".."))
            .finish()
    }
}

impl AuditPolicy for ConfiguredPolicy {
    fn is_audited(&self, class_name: &str) -> bool {
        self.settings.is_audited(class_name)
    }

    fn is_audited_field(&self, class_name: &str, field: &str) -> bool {
        self.settings.is_audited_field(class_name, field)
    }

    fn current_actor(&self) -> Option<String> {
        self.actor.as_ref().and_then(|provider| provider())
    }

    fn table_prefix(&self) -> &str {
        &self.settings.table_prefix
    }

    fn table_suffix(&self) -> &str {
        &self.settings.table_suffix
    }
}
