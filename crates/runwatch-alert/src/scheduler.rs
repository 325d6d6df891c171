use chrono::{DateTime, Utc};
use runwatch_common::region::validate_region;
use runwatch_common::types::{
    AlertKey, HistoryRecord, InstanceState, RegionAlerts, ScheduledAlert, TrackedInstance,
};
use runwatch_storage::{AlertStore, DefinitionCache, UpsertOutcome};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::coverage::{cancellation_for, lost_scope};
use crate::definitions::DefinitionEvent;
use crate::error::{AlertError, Result};

/// An instance state change reported by the owning application.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStateChange {
    pub instance_id: String,
    #[serde(default)]
    pub instance_name: String,
    pub region: String,
    pub state: InstanceState,
    #[serde(default, with = "runwatch_common::wire::timestamp::option")]
    pub launch_time: Option<DateTime<Utc>>,
}

/// Why materialization wrote nothing for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RegionDisabled,
    NoDeliveryToken,
    NoDefinitions,
}

/// What materializing one running instance did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Materialized {
    pub written: Vec<String>,
    pub unchanged: usize,
    pub already_delivered: usize,
    /// Dropped because the region or definition went away mid-write.
    pub not_covered: usize,
    pub skipped: Option<SkipReason>,
}

impl Materialized {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: Materialized) {
        self.written.extend(other.written);
        self.unchanged += other.unchanged;
        self.already_delivered += other.already_delivered;
        self.not_covered += other.not_covered;
    }
}

/// Result of [`AlertSchedulerClient::on_instance_state_changed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Materialized(Materialized),
    Cancelled(Vec<HistoryRecord>),
}

/// Result of [`AlertSchedulerClient::set_region_enabled`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionChange {
    Enabled(Materialized),
    Disabled(Vec<HistoryRecord>),
}

/// Turns alert definitions into per-instance scheduled alerts and cancels
/// them when instances stop, regions are disabled or definitions change.
///
/// Every write goes through the deterministic alert key, so repeated and
/// concurrent calls collapse to the same record.
pub struct AlertSchedulerClient {
    store: Arc<AlertStore>,
    definitions: Arc<DefinitionCache>,
}

impl AlertSchedulerClient {
    pub fn new(store: Arc<AlertStore>, definitions: Arc<DefinitionCache>) -> Self {
        Self { store, definitions }
    }

    /// Records the new state of an instance and applies the matching
    /// transition: `running` materializes, anything else cancels.
    pub fn on_instance_state_changed(&self, change: InstanceStateChange) -> Result<Transition> {
        validate_region(&change.region).map_err(AlertError::Validation)?;
        if change.instance_id.is_empty() {
            return Err(AlertError::Validation("instance id must not be empty".into()));
        }
        let now = Utc::now();
        if change.state.is_running() && change.launch_time.is_none() {
            return Err(AlertError::Validation(format!(
                "running instance {} needs a launch time",
                change.instance_id
            )));
        }
        let instance = TrackedInstance {
            instance_name: if change.instance_name.is_empty() {
                change.instance_id.clone()
            } else {
                change.instance_name
            },
            instance_id: change.instance_id,
            region: change.region,
            state: change.state,
            launch_time: change.launch_time,
            updated_at: now,
        };

        if instance.state.is_running() {
            self.store.upsert_instance(&instance)?;
            let report = self.materialize_instance(&instance, None, now)?;
            tracing::debug!(
                instance_id = %instance.instance_id,
                region = %instance.region,
                written = report.written.len(),
                skipped = ?report.skipped,
                "Instance running"
            );
            Ok(Transition::Materialized(report))
        } else {
            let cancelled = self.store.record_instance_stopped(&instance, now)?;
            if !cancelled.is_empty() {
                tracing::info!(
                    instance_id = %instance.instance_id,
                    region = %instance.region,
                    state = %instance.state,
                    cancelled = cancelled.len(),
                    "Cancelled scheduled alerts for stopped instance"
                );
            }
            Ok(Transition::Cancelled(cancelled))
        }
    }

    /// Turns alerting for a region on or off.
    ///
    /// Enabling requires at least one running tracked instance in the
    /// region at the time of the call.
    pub fn set_region_enabled(&self, region: &str, enabled: bool) -> Result<RegionChange> {
        validate_region(region).map_err(AlertError::Validation)?;
        let now = Utc::now();
        if !enabled {
            let cancelled = self.store.disable_region(region, now)?;
            tracing::info!(region, cancelled = cancelled.len(), "Region alerts disabled");
            return Ok(RegionChange::Disabled(cancelled));
        }

        let running = self.store.running_instances(region)?;
        if running.is_empty() {
            return Err(AlertError::Precondition(format!(
                "region {region} has no running instances"
            )));
        }
        self.store.enable_region(region, now)?;
        let mut report = Materialized::default();
        for instance in &running {
            report.absorb(self.materialize_instance(instance, None, now)?);
        }
        tracing::info!(
            region,
            instances = running.len(),
            written = report.written.len(),
            "Region alerts enabled"
        );
        Ok(RegionChange::Enabled(report))
    }

    /// Region switch, applicable definitions and live alerts for `region`.
    pub fn get_alerts_for_region(&self, region: &str) -> Result<RegionAlerts> {
        validate_region(region).map_err(AlertError::Validation)?;
        Ok(RegionAlerts {
            region: region.to_string(),
            enabled: self.store.is_region_enabled(region)?,
            definitions: self.definitions.for_region(region)?,
            scheduled: self.store.list_alerts_for_region(region)?,
        })
    }

    /// Stores the device token future alerts are addressed to and refreshes
    /// the alerts of every running instance with it.
    pub fn register_delivery_token(&self, token: &str) -> Result<Materialized> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AlertError::Validation("delivery token must not be empty".into()));
        }
        let now = Utc::now();
        self.store.set_delivery_token(token, now)?;
        let report = self.materialize_everywhere(None, now)?;
        tracing::info!(written = report.written.len(), "Delivery token registered");
        Ok(report)
    }

    /// Reconciles live alerts with a definition change.
    pub fn handle_definition_event(&self, event: &DefinitionEvent) -> Result<Materialized> {
        let now = Utc::now();
        match event {
            DefinitionEvent::Added(def) if def.enabled => {
                self.materialize_everywhere(Some(def.threshold_minutes), now)
            }
            DefinitionEvent::Added(_) | DefinitionEvent::Removed(_) => Ok(Materialized::default()),
            DefinitionEvent::Updated { before, after } => {
                if let Some(lost) = lost_scope(before, after) {
                    let others = self.definitions.all()?;
                    if let Some(selector) =
                        cancellation_for(before.threshold_minutes, lost, &others, &after.id)
                    {
                        let cancelled = self.store.cancel_alerts(
                            &selector,
                            "alert definition no longer covers this alert",
                            now,
                        )?;
                        tracing::info!(
                            definition_id = %after.id,
                            cancelled = cancelled.len(),
                            "Cancelled alerts after definition update"
                        );
                    }
                }
                if after.enabled {
                    self.materialize_everywhere(Some(after.threshold_minutes), now)
                } else {
                    Ok(Materialized::default())
                }
            }
        }
    }

    /// Re-derives the live alert set from scratch: cancels alerts no enabled
    /// definition covers any more and materializes everything missing.
    pub fn reconcile_all(&self) -> Result<Materialized> {
        let now = Utc::now();
        let definitions = self.definitions.refresh()?;
        let mut orphaned: Vec<HistoryRecord> = Vec::new();
        for alert in self.store.list_alerts()? {
            let covered = definitions
                .iter()
                .any(|d| d.enabled && d.threshold_minutes == alert.threshold_minutes && d.applies_to(&alert.region));
            if !covered {
                orphaned.push(HistoryRecord::retire(
                    alert,
                    runwatch_common::types::AlertStatus::Cancelled,
                    Some("no alert definition covers this alert".into()),
                    None,
                    now,
                ));
            }
        }
        if !orphaned.is_empty() {
            let summary = self.store.commit_retirements(&orphaned)?;
            tracing::info!(cancelled = summary.removed, "Cancelled orphaned scheduled alerts");
        }
        self.materialize_everywhere(None, now)
    }

    /// Consumes definition events until the sender is dropped.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<DefinitionEvent>) {
        tracing::info!("Alert scheduler client started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle_definition_event(&event) {
                        tracing::error!(error = %e, "Failed to apply definition change");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Definition events lagged, reconciling all alerts");
                    if let Err(e) = self.reconcile_all() {
                        tracing::error!(error = %e, "Full alert reconciliation failed");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::info!("Alert scheduler client stopped");
    }

    /// Materializes every running instance in every enabled region,
    /// optionally limited to one threshold.
    fn materialize_everywhere(
        &self,
        only_threshold: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Materialized> {
        let mut report = Materialized::default();
        for region in self.store.regions_with_running_instances()? {
            if !self.store.is_region_enabled(&region)? {
                continue;
            }
            for instance in self.store.running_instances(&region)? {
                report.absorb(self.materialize_instance(&instance, only_threshold, now)?);
            }
        }
        Ok(report)
    }

    fn materialize_instance(
        &self,
        instance: &TrackedInstance,
        only_threshold: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Materialized> {
        let Some(launch_time) = instance.launch_time else {
            return Ok(Materialized::default());
        };
        if !self.store.is_region_enabled(&instance.region)? {
            return Ok(Materialized::skipped(SkipReason::RegionDisabled));
        }

        // Two definitions resolving to the same threshold yield one alert.
        let thresholds: BTreeSet<i64> = self
            .definitions
            .for_region(&instance.region)?
            .into_iter()
            .map(|d| d.threshold_minutes)
            .filter(|t| only_threshold.map_or(true, |only| only == *t))
            .collect();
        if thresholds.is_empty() {
            return Ok(Materialized::skipped(SkipReason::NoDefinitions));
        }

        let Some(token) = self.store.delivery_token()? else {
            tracing::warn!(
                instance_id = %instance.instance_id,
                region = %instance.region,
                "No delivery token registered, not scheduling alerts"
            );
            return Ok(Materialized::skipped(SkipReason::NoDeliveryToken));
        };

        let alerts: Vec<ScheduledAlert> = thresholds
            .iter()
            .filter_map(|&threshold| {
                let key = AlertKey::new(&instance.region, &instance.instance_id, threshold);
                match ScheduledAlert::materialize(
                    &key,
                    &instance.instance_name,
                    launch_time,
                    &token,
                    now,
                ) {
                    Ok(alert) => Some(alert),
                    Err(reason) => {
                        tracing::warn!(alert_id = %key, reason = %reason, "Not scheduling alert");
                        None
                    }
                }
            })
            .collect();
        if alerts.is_empty() {
            return Ok(Materialized::default());
        }
        let outcomes = self.store.materialize_covered(&alerts)?;

        let mut report = Materialized::default();
        for (alert, outcome) in alerts.iter().zip(outcomes) {
            match outcome {
                UpsertOutcome::AlreadyDelivered => report.already_delivered += 1,
                UpsertOutcome::Unchanged => report.unchanged += 1,
                UpsertOutcome::NotCovered => {
                    tracing::debug!(alert_id = %alert.id, "Coverage changed before write, alert skipped");
                    report.not_covered += 1;
                }
                UpsertOutcome::Inserted | UpsertOutcome::Refreshed | UpsertOutcome::Replaced => {
                    report.written.push(alert.id.clone())
                }
            }
        }
        Ok(report)
    }
}
