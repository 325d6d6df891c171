use runwatch_common::types::AlertDefinition;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::AlertStore;

/// In-memory copy of the alert definitions for offline reads.
///
/// Loaded lazily from the store. Writers call [`put`](Self::put) or
/// [`evict`](Self::evict) with the row they just persisted; the store is
/// authoritative, so [`refresh`](Self::refresh) discards local state.
pub struct DefinitionCache {
    store: Arc<AlertStore>,
    entries: RwLock<Option<Vec<AlertDefinition>>>,
}

impl DefinitionCache {
    pub fn new(store: Arc<AlertStore>) -> Self {
        Self {
            store,
            entries: RwLock::new(None),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Vec<AlertDefinition>>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Vec<AlertDefinition>>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All definitions ordered by threshold, loading them on a miss.
    pub fn all(&self) -> Result<Vec<AlertDefinition>> {
        if let Some(defs) = self.read().as_ref() {
            return Ok(defs.clone());
        }
        self.refresh()
    }

    /// Enabled definitions covering `region`.
    pub fn for_region(&self, region: &str) -> Result<Vec<AlertDefinition>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|d| d.enabled && d.applies_to(region))
            .collect())
    }

    /// Replaces the whole cache with the store's current contents.
    pub fn refresh(&self) -> Result<Vec<AlertDefinition>> {
        let defs = self.store.list_definitions()?;
        *self.write() = Some(defs.clone());
        tracing::debug!(count = defs.len(), "Refreshed alert definition cache");
        Ok(defs)
    }

    /// Inserts or replaces one entry. No-op while the cache is unloaded.
    pub fn put(&self, def: &AlertDefinition) {
        if let Some(defs) = self.write().as_mut() {
            defs.retain(|d| d.id != def.id);
            defs.push(def.clone());
            defs.sort_by(|a, b| {
                (a.threshold_minutes, a.created_at, &a.id).cmp(&(b.threshold_minutes, b.created_at, &b.id))
            });
        }
    }

    pub fn evict(&self, id: &str) {
        if let Some(defs) = self.write().as_mut() {
            defs.retain(|d| d.id != id);
        }
    }
}
