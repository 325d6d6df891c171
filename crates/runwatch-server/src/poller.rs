//! Periodic reconciliation of due scheduled alerts.
//!
//! Each tick selects due alerts, asks the instance-state oracle about their
//! instances, dispatches notifications for the ones still running and
//! retires every decided alert in a single store transaction. A tick that
//! misses its deadline commits nothing; every send attempt is journaled as
//! it happens so the next tick retires it without sending again.

use anyhow::Context;
use chrono::{DateTime, Utc};
use runwatch_cloud::InstanceStateOracle;
use runwatch_common::types::{AlertStatus, HistoryRecord, ObservedState, ScheduledAlert};
use runwatch_notify::payload::runtime_alert;
use runwatch_notify::plugin::DispatcherRegistry;
use runwatch_notify::NotificationDispatcher;
use runwatch_storage::{AlertStore, DispatchRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::{PollerConfig, ServerConfig};

pub const LEASE_NAME: &str = "alert-delivery-poller";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub deferred: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Committed(TickSummary),
    /// Another worker holds the poller lease.
    LeaseHeld,
    /// The tick missed its deadline and was abandoned.
    TimedOut,
}

pub struct AlertDeliveryPoller {
    store: Arc<AlertStore>,
    oracle: Arc<dyn InstanceStateOracle>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    worker_id: String,
    tick_secs: u64,
    tick_timeout: Duration,
    lease_ttl: chrono::Duration,
    batch_limit: usize,
}

impl AlertDeliveryPoller {
    pub fn new(
        store: Arc<AlertStore>,
        oracle: Arc<dyn InstanceStateOracle>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        worker_id: String,
        config: &PollerConfig,
    ) -> Self {
        Self {
            store,
            oracle,
            dispatcher,
            worker_id,
            tick_secs: config.tick_secs.max(1),
            tick_timeout: Duration::from_secs(config.tick_timeout_secs.max(1)),
            lease_ttl: chrono::Duration::seconds(config.lease_ttl_secs as i64),
            batch_limit: config.batch_limit.max(1),
        }
    }

    /// Builds the oracle and dispatcher named in `config`.
    pub fn from_config(store: Arc<AlertStore>, config: &ServerConfig) -> anyhow::Result<Self> {
        let oracle = runwatch_cloud::build_oracle(&config.oracle, store.clone())
            .context("building instance state oracle")?;
        let dispatcher = DispatcherRegistry::default()
            .create_dispatcher(&config.dispatcher.kind, &config.dispatcher.config)
            .context("building notification dispatcher")?;
        Ok(Self::new(
            store,
            oracle,
            Arc::from(dispatcher),
            config.worker_id(),
            &config.poller,
        ))
    }

    /// Ticks forever on the configured interval. Ticks never overlap.
    pub async fn run(&self) {
        tracing::info!(
            tick_secs = self.tick_secs,
            tick_timeout_secs = self.tick_timeout.as_secs(),
            worker_id = %self.worker_id,
            oracle = self.oracle.name(),
            dispatcher = self.dispatcher.dispatcher_name(),
            "Alert delivery poller started"
        );

        let mut tick = interval(Duration::from_secs(self.tick_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(e) = self.tick_at(Utc::now()).await {
                tracing::error!(error = %e, "Alert delivery tick failed");
            }
        }
    }

    /// Runs one tick as of `now` under the poller lease.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> anyhow::Result<TickOutcome> {
        if !self
            .store
            .try_acquire_lease(LEASE_NAME, &self.worker_id, self.lease_ttl, now)?
        {
            tracing::debug!(worker_id = %self.worker_id, "Poller lease held elsewhere, skipping tick");
            return Ok(TickOutcome::LeaseHeld);
        }

        let outcome = self.tick_leased(now).await;
        if let Err(e) = self.store.release_lease(LEASE_NAME, &self.worker_id) {
            tracing::warn!(error = %e, "Failed to release poller lease");
        }
        outcome
    }

    async fn tick_leased(&self, now: DateTime<Utc>) -> anyhow::Result<TickOutcome> {
        let (records, summary) =
            match tokio::time::timeout(self.tick_timeout, self.reconcile(now)).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.tick_timeout.as_secs(),
                        "Alert delivery tick deadline expired, nothing committed"
                    );
                    return Ok(TickOutcome::TimedOut);
                }
            };

        if !records.is_empty() {
            let committed = self
                .store
                .commit_retirements(&records)
                .context("committing alert retirements")?;
            tracing::debug!(
                removed = committed.removed,
                recorded = committed.recorded,
                "Retirements committed"
            );
        }

        tracing::info!(
            due = summary.due,
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            deferred = summary.deferred,
            "Alert delivery tick finished"
        );
        Ok(TickOutcome::Committed(summary))
    }

    /// Decides every due alert without committing anything.
    async fn reconcile(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(Vec<HistoryRecord>, TickSummary)> {
        let due = self.store.due_alerts(now, self.batch_limit)?;
        let mut summary = TickSummary {
            due: due.len(),
            ..TickSummary::default()
        };
        let mut records = Vec::new();

        let mut groups: BTreeMap<(String, String), Vec<ScheduledAlert>> = BTreeMap::new();
        for alert in due {
            if let Some(problem) = invalid_reason(&alert) {
                tracing::warn!(alert_id = %alert.id, problem = %problem, "Retiring invalid scheduled alert");
                summary.failed += 1;
                records.push(HistoryRecord::retire(
                    alert,
                    AlertStatus::Failed,
                    Some(problem),
                    None,
                    now,
                ));
                continue;
            }
            groups
                .entry((alert.region.clone(), alert.instance_id.clone()))
                .or_default()
                .push(alert);
        }

        let mut by_region: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (region, instance_id) in groups.keys() {
            by_region
                .entry(region.clone())
                .or_default()
                .push(instance_id.clone());
        }

        let mut states: HashMap<(String, String), ObservedState> = HashMap::new();
        for (region, instance_ids) in by_region {
            match self.oracle.query(&region, &instance_ids).await {
                Ok(found) => {
                    for (instance_id, state) in found {
                        states.insert((region.clone(), instance_id), state);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        region = %region,
                        oracle = self.oracle.name(),
                        error = %e,
                        "Instance state lookup failed, deferring region"
                    );
                }
            }
        }

        for (key, alerts) in groups {
            let state = states.get(&key).copied().unwrap_or(ObservedState::Unknown);
            match state {
                ObservedState::Unknown => {
                    tracing::debug!(region = %key.0, instance_id = %key.1, "Instance state unknown, deferring");
                    summary.deferred += alerts.len();
                }
                ObservedState::Stopped => {
                    for alert in alerts {
                        summary.cancelled += 1;
                        records.push(HistoryRecord::retire(
                            alert,
                            AlertStatus::Cancelled,
                            Some("instance no longer running".to_string()),
                            None,
                            now,
                        ));
                    }
                }
                ObservedState::Running => {
                    for alert in alerts {
                        let record = self.deliver(alert, now).await?;
                        match record.status {
                            AlertStatus::Completed => summary.completed += 1,
                            AlertStatus::Failed => summary.failed += 1,
                            _ => summary.cancelled += 1,
                        }
                        records.push(record);
                    }
                }
            }
        }

        Ok((records, summary))
    }

    /// Sends one alert at most once per launch.
    async fn deliver(
        &self,
        alert: ScheduledAlert,
        now: DateTime<Utc>,
    ) -> anyhow::Result<HistoryRecord> {
        if self.store.delivery_attempted(&alert.id, alert.launch_time)? {
            return Ok(HistoryRecord::retire(
                alert,
                AlertStatus::Cancelled,
                Some("launch already delivered".to_string()),
                None,
                now,
            ));
        }
        match self.store.find_dispatch(&alert.id, alert.launch_time)? {
            Some(DispatchRecord::Delivered { delivery_id }) => {
                tracing::debug!(alert_id = %alert.id, delivery_id = %delivery_id, "Alert was sent by an abandoned tick");
                return Ok(HistoryRecord::retire(
                    alert,
                    AlertStatus::Completed,
                    None,
                    Some(delivery_id),
                    now,
                ));
            }
            Some(DispatchRecord::Failed { detail }) => {
                tracing::debug!(alert_id = %alert.id, detail = %detail, "Alert send already failed in an abandoned tick");
                return Ok(HistoryRecord::retire(
                    alert,
                    AlertStatus::Failed,
                    Some(detail),
                    None,
                    now,
                ));
            }
            None => {}
        }

        let payload = runtime_alert(&alert, now);
        let (record, status, detail, delivery_id) =
            match self.dispatcher.send(&alert.delivery_token, &payload).await {
                Ok(delivery_id) => {
                    tracing::info!(
                        alert_id = %alert.id,
                        delivery_id = %delivery_id,
                        "Runtime alert delivered"
                    );
                    (
                        DispatchRecord::Delivered {
                            delivery_id: delivery_id.clone(),
                        },
                        AlertStatus::Completed,
                        None,
                        Some(delivery_id),
                    )
                }
                Err(e) => {
                    tracing::warn!(alert_id = %alert.id, error = %e, "Runtime alert delivery failed");
                    let detail = e.to_string();
                    (
                        DispatchRecord::Failed {
                            detail: detail.clone(),
                        },
                        AlertStatus::Failed,
                        Some(detail),
                        None,
                    )
                }
            };
        if let Err(e) = self
            .store
            .record_dispatch(&alert.id, alert.launch_time, &record, now)
        {
            tracing::error!(alert_id = %alert.id, error = %e, "Failed to journal dispatch attempt");
        }
        Ok(HistoryRecord::retire(alert, status, detail, delivery_id, now))
    }
}

fn invalid_reason(alert: &ScheduledAlert) -> Option<String> {
    if alert.delivery_token.trim().is_empty() {
        Some("invalid alert: empty delivery token".to_string())
    } else if alert.threshold_minutes <= 0 {
        Some(format!(
            "invalid alert: threshold of {} minutes",
            alert.threshold_minutes
        ))
    } else {
        None
    }
}
