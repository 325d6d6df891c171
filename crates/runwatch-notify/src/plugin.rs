use serde_json::Value;
use std::collections::HashMap;

use crate::error::{NotifyError, Result};
use crate::NotificationDispatcher;

/// Factory for [`NotificationDispatcher`]s configured from JSON.
pub trait DispatcherPlugin: Send + Sync {
    /// Dispatcher kind name as used in configuration (e.g. `"webhook"`).
    fn name(&self) -> &str;

    fn validate_config(&self, config: &Value) -> Result<()>;

    fn create_dispatcher(&self, config: &Value) -> Result<Box<dyn NotificationDispatcher>>;

    /// Returns a copy of `config` with secrets redacted, for logs.
    fn redact_config(&self, config: &Value) -> Value {
        config.clone()
    }
}

/// Registry of available [`DispatcherPlugin`]s.
///
/// # Examples
///
/// ```
/// use runwatch_notify::plugin::DispatcherRegistry;
///
/// let registry = DispatcherRegistry::default();
/// assert!(registry.has_plugin("log"));
/// assert!(registry.has_plugin("webhook"));
/// assert!(!registry.has_plugin("carrier-pigeon"));
/// ```
pub struct DispatcherRegistry {
    plugins: HashMap<String, Box<dyn DispatcherPlugin>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn DispatcherPlugin>) {
        let name = plugin.name().to_string();
        self.plugins.insert(name, plugin);
    }

    pub fn create_dispatcher(
        &self,
        kind: &str,
        config: &Value,
    ) -> Result<Box<dyn NotificationDispatcher>> {
        let plugin = self
            .plugins
            .get(kind)
            .ok_or_else(|| NotifyError::UnknownDispatcher(kind.to_string()))?;
        plugin.validate_config(config)?;
        tracing::info!(kind, config = %plugin.redact_config(config), "Creating notification dispatcher");
        plugin.create_dispatcher(config)
    }

    pub fn has_plugin(&self, kind: &str) -> bool {
        self.plugins.contains_key(kind)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for DispatcherRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::dispatchers::log::LogPlugin));
        registry.register(Box::new(crate::dispatchers::webhook::WebhookPlugin));
        registry
    }
}
