use chrono::Utc;
use runwatch_common::region::validate_region;
use runwatch_common::types::{
    AlertDefinition, DefinitionUpdate, HistoryRecord, MAX_THRESHOLD_MINUTES,
};
use runwatch_storage::{AlertStore, DefinitionCache};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::coverage::{cancellation_for, lost_scope, scope_of};
use crate::error::{AlertError, Result};

const EVENT_CAPACITY: usize = 256;

/// Change notification consumed by the materialization client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionEvent {
    Added(AlertDefinition),
    Updated {
        before: AlertDefinition,
        after: AlertDefinition,
    },
    Removed(AlertDefinition),
}

/// Outcome of [`DefinitionService::detach_region`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detached {
    /// The definition only covered that region and was removed.
    Removed { cancelled: Vec<HistoryRecord> },
    /// The region was dropped from a multi-region definition.
    Narrowed {
        definition: AlertDefinition,
        cancelled: Vec<HistoryRecord>,
    },
}

/// Durable, validating CRUD for alert definitions.
pub struct DefinitionService {
    store: Arc<AlertStore>,
    cache: Arc<DefinitionCache>,
    events: broadcast::Sender<DefinitionEvent>,
}

impl DefinitionService {
    pub fn new(store: Arc<AlertStore>, cache: Arc<DefinitionCache>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            cache,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DefinitionEvent> {
        self.events.subscribe()
    }

    pub fn list(&self) -> Result<Vec<AlertDefinition>> {
        Ok(self.cache.all()?)
    }

    pub fn get(&self, id: &str) -> Result<AlertDefinition> {
        self.store
            .get_definition(id)?
            .ok_or_else(|| not_found(id))
    }

    /// Creates a definition.
    ///
    /// Rejected when an enabled definition with the same threshold already
    /// covers one of `regions` (an empty set covers every region).
    pub fn add(
        &self,
        threshold_minutes: i64,
        regions: BTreeSet<String>,
        enabled: bool,
    ) -> Result<AlertDefinition> {
        validate_threshold(threshold_minutes)?;
        validate_regions(&regions)?;

        let existing = self.store.list_definitions()?;
        if let Some(conflict) = existing
            .iter()
            .find(|d| d.enabled && d.threshold_minutes == threshold_minutes && d.overlaps(&regions))
        {
            return Err(AlertError::Validation(format!(
                "an alert for {}h {}m already exists for an overlapping region (definition {})",
                conflict.hours(),
                conflict.minutes(),
                conflict.id
            )));
        }

        let now = Utc::now();
        let def = AlertDefinition {
            id: runwatch_common::id::definition_id(),
            enabled,
            threshold_minutes,
            regions,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_definition(&def)?;
        self.cache.put(&def);
        tracing::info!(
            definition_id = %def.id,
            threshold_minutes,
            regions = ?def.regions,
            "Alert definition added"
        );
        self.publish(DefinitionEvent::Added(def.clone()));
        Ok(def)
    }

    /// Deletes a definition together with the live alerts only it was
    /// backing, as one atomic batch.
    pub fn remove(&self, id: &str) -> Result<Vec<HistoryRecord>> {
        let def = self.get(id)?;
        let others = self.store.list_definitions()?;
        let cascade = cancellation_for(def.threshold_minutes, scope_of(&def), &others, &def.id);

        let cancelled = self
            .store
            .delete_definition(id, cascade.as_ref(), Utc::now())?
            .ok_or_else(|| not_found(id))?;
        self.cache.evict(id);
        tracing::info!(
            definition_id = %id,
            cancelled = cancelled.len(),
            "Alert definition removed"
        );
        self.publish(DefinitionEvent::Removed(def));
        Ok(cancelled)
    }

    /// Applies a partial update and broadcasts the change. Overlap with other
    /// definitions is only enforced at creation.
    pub fn update(&self, id: &str, update: DefinitionUpdate) -> Result<AlertDefinition> {
        if update.is_empty() {
            return Err(AlertError::Validation("update contains no fields".into()));
        }
        if let Some(threshold) = update.threshold_minutes {
            validate_threshold(threshold)?;
        }
        if let Some(regions) = &update.regions {
            validate_regions(regions)?;
        }

        let before = self.get(id)?;
        let mut after = before.clone();
        if let Some(enabled) = update.enabled {
            after.enabled = enabled;
        }
        if let Some(threshold) = update.threshold_minutes {
            after.threshold_minutes = threshold;
        }
        if let Some(regions) = update.regions {
            after.regions = regions;
        }
        after.updated_at = Utc::now();

        if !self.store.replace_definition(&after)? {
            return Err(not_found(id));
        }
        self.cache.put(&after);
        tracing::info!(definition_id = %id, "Alert definition updated");
        self.publish(DefinitionEvent::Updated {
            before,
            after: after.clone(),
        });
        Ok(after)
    }

    /// Takes `region` out of a definition's scope.
    ///
    /// A definition scoped to that region alone is removed; a multi-region
    /// definition keeps living for its remaining regions and its alerts in
    /// `region` are cancelled unless another definition still covers them.
    pub fn detach_region(&self, id: &str, region: &str) -> Result<Detached> {
        validate_region(region).map_err(AlertError::Validation)?;
        let def = self.get(id)?;
        if def.is_global() {
            return Err(AlertError::Validation(format!(
                "definition {id} applies to every region; update its regions instead"
            )));
        }
        if !def.regions.contains(region) {
            return Err(AlertError::Validation(format!(
                "definition {id} does not cover region {region}"
            )));
        }

        if def.regions.len() == 1 {
            let cancelled = self.remove(id)?;
            return Ok(Detached::Removed { cancelled });
        }

        let mut after = def.clone();
        after.regions.remove(region);
        after.updated_at = Utc::now();

        let others = self.store.list_definitions()?;
        let cascade = lost_scope(&def, &after)
            .and_then(|lost| cancellation_for(def.threshold_minutes, lost, &others, id));
        let cancelled = self
            .store
            .narrow_definition(
                &after,
                cascade.as_ref(),
                "region detached from alert definition",
                Utc::now(),
            )?
            .ok_or_else(|| not_found(id))?;
        self.cache.put(&after);

        tracing::info!(
            definition_id = %id,
            region,
            cancelled = cancelled.len(),
            "Region detached from alert definition"
        );
        self.publish(DefinitionEvent::Updated {
            before: def,
            after: after.clone(),
        });
        Ok(Detached::Narrowed {
            definition: after,
            cancelled,
        })
    }

    fn publish(&self, event: DefinitionEvent) {
        // No subscribers is fine; the client may not be running.
        if self.events.send(event).is_err() {
            tracing::debug!("No subscribers for definition event");
        }
    }
}

fn not_found(id: &str) -> AlertError {
    AlertError::NotFound {
        entity: "alert_definition",
        id: id.to_string(),
    }
}

fn validate_threshold(threshold_minutes: i64) -> Result<()> {
    if threshold_minutes <= 0 {
        return Err(AlertError::Validation(format!(
            "threshold must be positive, got {threshold_minutes} minutes"
        )));
    }
    if threshold_minutes > MAX_THRESHOLD_MINUTES {
        return Err(AlertError::Validation(format!(
            "threshold must be at most {MAX_THRESHOLD_MINUTES} minutes (366 days), got {threshold_minutes}"
        )));
    }
    Ok(())
}

fn validate_regions(regions: &BTreeSet<String>) -> Result<()> {
    for region in regions {
        validate_region(region).map_err(AlertError::Validation)?;
    }
    Ok(())
}
