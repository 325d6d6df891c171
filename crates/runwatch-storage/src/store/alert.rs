use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use runwatch_common::types::{AlertStatus, HistoryRecord, ScheduledAlert};
use runwatch_common::wire;
use std::collections::BTreeSet;

use super::{to_ms, AlertStore};
use crate::error::{Result, StorageError};

/// Which live alerts a cancellation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertSelector {
    /// Every alert of one instance in one region.
    Instance { region: String, instance_id: String },
    /// Every alert in a region.
    Region(String),
    /// Alerts of one threshold, limited to a set of regions.
    Threshold {
        threshold_minutes: i64,
        scope: RegionScope,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionScope {
    Only(BTreeSet<String>),
    AllExcept(BTreeSet<String>),
}

impl RegionScope {
    pub fn contains(&self, region: &str) -> bool {
        match self {
            Self::Only(regions) => regions.contains(region),
            Self::AllExcept(regions) => !regions.contains(region),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(regions) if regions.is_empty())
    }
}

impl AlertSelector {
    pub fn matches(&self, alert: &ScheduledAlert) -> bool {
        match self {
            Self::Instance {
                region,
                instance_id,
            } => alert.region == *region && alert.instance_id == *instance_id,
            Self::Region(region) => alert.region == *region,
            Self::Threshold {
                threshold_minutes,
                scope,
            } => alert.threshold_minutes == *threshold_minutes && scope.contains(&alert.region),
        }
    }
}

/// Result of writing one materialized alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No live record existed; one was created.
    Inserted,
    /// A record for the same launch existed; name or token were refreshed.
    Refreshed,
    /// An identical record for the same launch already existed.
    Unchanged,
    /// A record for an older launch was replaced.
    Replaced,
    /// This launch was already delivered (or permanently failed); nothing written.
    AlreadyDelivered,
    /// The region is disabled or no enabled definition covers the threshold
    /// there any more; nothing written.
    NotCovered,
}

impl UpsertOutcome {
    pub fn wrote(self) -> bool {
        matches!(self, Self::Inserted | Self::Refreshed | Self::Replaced)
    }
}

/// Counts from committing a batch of retirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetireSummary {
    /// Live records deleted.
    pub removed: usize,
    /// History rows written.
    pub recorded: usize,
}

impl AlertStore {
    /// Writes `alerts` in one transaction, keyed by their deterministic id.
    ///
    /// Re-materializing the same launch never creates a second record and
    /// never resurrects a launch that already has a completed or failed
    /// history row. Region switches and definitions are not consulted.
    pub fn materialize_alerts(&self, alerts: &[ScheduledAlert]) -> Result<Vec<UpsertOutcome>> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let mut outcomes = Vec::with_capacity(alerts.len());
        for alert in alerts {
            outcomes.push(upsert_in(&tx, alert)?);
        }
        tx.commit()?;
        Ok(outcomes)
    }

    /// Like [`materialize_alerts`](Self::materialize_alerts), but an alert is
    /// only written when, inside the same transaction, its region is enabled
    /// and an enabled definition still covers its region and threshold.
    ///
    /// A region disable or definition removal that commits between the
    /// caller's own checks and this write therefore never leaves an orphan.
    pub fn materialize_covered(&self, alerts: &[ScheduledAlert]) -> Result<Vec<UpsertOutcome>> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let mut outcomes = Vec::with_capacity(alerts.len());
        for alert in alerts {
            let outcome = if covered_in(&tx, &alert.region, alert.threshold_minutes)? {
                upsert_in(&tx, alert)?
            } else {
                UpsertOutcome::NotCovered
            };
            outcomes.push(outcome);
        }
        tx.commit()?;
        Ok(outcomes)
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<ScheduledAlert>> {
        let conn = self.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM scheduled_alerts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| wire::decode_alert(&d).map_err(StorageError::from))
            .transpose()
    }

    pub fn list_alerts(&self) -> Result<Vec<ScheduledAlert>> {
        let conn = self.lock();
        select_docs(
            &conn,
            "SELECT doc FROM scheduled_alerts ORDER BY region ASC, instance_id ASC, threshold_minutes ASC",
            [],
        )
    }

    pub fn list_alerts_for_region(&self, region: &str) -> Result<Vec<ScheduledAlert>> {
        let conn = self.lock();
        select_docs(
            &conn,
            "SELECT doc FROM scheduled_alerts WHERE region = ?1
             ORDER BY instance_id ASC, threshold_minutes ASC",
            params![region],
        )
    }

    pub fn list_alerts_for_instance(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<Vec<ScheduledAlert>> {
        let conn = self.lock();
        select_docs(
            &conn,
            "SELECT doc FROM scheduled_alerts WHERE region = ?1 AND instance_id = ?2
             ORDER BY threshold_minutes ASC",
            params![region, instance_id],
        )
    }

    pub fn count_alerts(&self) -> Result<u64> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM scheduled_alerts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Pending alerts whose scheduled time is at or before `now`, oldest first.
    ///
    /// Rows whose document no longer decodes are skipped with a warning.
    pub fn due_alerts(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledAlert>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, doc FROM scheduled_alerts
             WHERE status = 'pending' AND scheduled_time <= ?1
             ORDER BY scheduled_time ASC, id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![to_ms(now), limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut due = Vec::new();
        for row in rows {
            let (id, doc) = row?;
            match wire::decode_alert(&doc) {
                // Column precision is milliseconds; the document decides.
                Ok(alert) if alert.is_due(now) => due.push(alert),
                Ok(_) => {}
                Err(e) => tracing::warn!(alert_id = %id, error = %e, "Skipping undecodable scheduled alert"),
            }
        }
        Ok(due)
    }

    /// Cancels every live alert matched by `selector`, writing a cancelled
    /// history row for each, in one transaction.
    pub fn cancel_alerts(
        &self,
        selector: &AlertSelector,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let cancelled = cancel_in(&tx, selector, reason, now)?;
        tx.commit()?;
        Ok(cancelled)
    }

    /// Applies a batch of terminal outcomes in one transaction: history rows
    /// are inserted, the matching live records and journal entries deleted.
    ///
    /// A live record is only deleted when it still belongs to the same
    /// launch. Cancelled outcomes whose live record is already gone are
    /// dropped; completed and failed outcomes are always recorded.
    pub fn commit_retirements(&self, records: &[HistoryRecord]) -> Result<RetireSummary> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let mut summary = RetireSummary::default();
        for record in records {
            let (removed, recorded) = retire_in(&tx, record)?;
            summary.removed += usize::from(removed);
            summary.recorded += usize::from(recorded);
        }
        tx.commit()?;
        Ok(summary)
    }
}

fn select_docs<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ScheduledAlert>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(wire::decode_alert(&row?)?);
    }
    Ok(alerts)
}

fn covered_in(conn: &Connection, region: &str, threshold_minutes: i64) -> Result<bool> {
    let enabled: Option<bool> = conn
        .prepare_cached("SELECT enabled FROM region_alert_status WHERE region = ?1")?
        .query_row(params![region], |row| row.get(0))
        .optional()?;
    if enabled != Some(true) {
        return Ok(false);
    }

    let mut stmt = conn.prepare_cached(
        "SELECT regions FROM alert_definitions WHERE enabled = 1 AND threshold_minutes = ?1",
    )?;
    let rows = stmt.query_map(params![threshold_minutes], |row| row.get::<_, String>(0))?;
    for row in rows {
        let regions: BTreeSet<String> = serde_json::from_str(&row?)?;
        if regions.is_empty() || regions.contains(region) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn upsert_in(conn: &Connection, alert: &ScheduledAlert) -> Result<UpsertOutcome> {
    let launch_ms = to_ms(alert.launch_time);
    let delivered: bool = conn
        .prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM alert_history
             WHERE alert_id = ?1 AND launch_time = ?2 AND status IN ('completed', 'failed'))",
        )?
        .query_row(params![alert.id, launch_ms], |row| row.get(0))?;
    if delivered {
        return Ok(UpsertOutcome::AlreadyDelivered);
    }

    let existing: Option<String> = conn
        .prepare_cached("SELECT doc FROM scheduled_alerts WHERE id = ?1")?
        .query_row(params![alert.id], |row| row.get(0))
        .optional()?;

    let (record, outcome) = match existing.map(|doc| wire::decode_alert(&doc)).transpose() {
        Ok(Some(current)) if current.launch_time == alert.launch_time => {
            if current.instance_name == alert.instance_name
                && current.delivery_token == alert.delivery_token
            {
                return Ok(UpsertOutcome::Unchanged);
            }
            let mut refreshed = current;
            refreshed.instance_name = alert.instance_name.clone();
            refreshed.delivery_token = alert.delivery_token.clone();
            (refreshed, UpsertOutcome::Refreshed)
        }
        Ok(Some(_)) => (alert.clone(), UpsertOutcome::Replaced),
        Ok(None) => (alert.clone(), UpsertOutcome::Inserted),
        Err(e) => {
            tracing::warn!(alert_id = %alert.id, error = %e, "Replacing undecodable scheduled alert");
            (alert.clone(), UpsertOutcome::Replaced)
        }
    };

    conn.prepare_cached(
        "INSERT INTO scheduled_alerts
             (id, region, instance_id, threshold_minutes, launch_time, scheduled_time, status, doc)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             region = excluded.region,
             instance_id = excluded.instance_id,
             threshold_minutes = excluded.threshold_minutes,
             launch_time = excluded.launch_time,
             scheduled_time = excluded.scheduled_time,
             status = excluded.status,
             doc = excluded.doc",
    )?
    .execute(params![
        record.id,
        record.region,
        record.instance_id,
        record.threshold_minutes,
        to_ms(record.launch_time),
        to_ms(record.scheduled_time),
        record.status.as_str(),
        wire::encode_alert(&record)?,
    ])?;
    Ok(outcome)
}

pub(super) fn cancel_in(
    conn: &Connection,
    selector: &AlertSelector,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Vec<HistoryRecord>> {
    let candidates = match selector {
        AlertSelector::Instance {
            region,
            instance_id,
        } => select_docs(
            conn,
            "SELECT doc FROM scheduled_alerts WHERE region = ?1 AND instance_id = ?2",
            params![region, instance_id],
        )?,
        AlertSelector::Region(region) => select_docs(
            conn,
            "SELECT doc FROM scheduled_alerts WHERE region = ?1",
            params![region],
        )?,
        AlertSelector::Threshold {
            threshold_minutes, ..
        } => select_docs(
            conn,
            "SELECT doc FROM scheduled_alerts WHERE threshold_minutes = ?1",
            params![threshold_minutes],
        )?,
    };

    let mut cancelled = Vec::new();
    for alert in candidates.into_iter().filter(|a| selector.matches(a)) {
        let record = HistoryRecord::retire(
            alert,
            AlertStatus::Cancelled,
            Some(reason.to_string()),
            None,
            now,
        );
        if retire_in(conn, &record)?.0 {
            cancelled.push(record);
        }
    }
    Ok(cancelled)
}

/// Returns `(removed_live_record, wrote_history)`.
fn retire_in(conn: &Connection, record: &HistoryRecord) -> Result<(bool, bool)> {
    let launch_ms = to_ms(record.alert.launch_time);
    let removed = conn
        .prepare_cached("DELETE FROM scheduled_alerts WHERE id = ?1 AND launch_time = ?2")?
        .execute(params![record.alert.id, launch_ms])?
        > 0;

    let recorded = removed || record.status != AlertStatus::Cancelled;
    if recorded {
        conn.prepare_cached(
            "INSERT INTO alert_history
                 (id, alert_id, region, instance_id, launch_time, status, processed_at, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?
        .execute(params![
            record.id,
            record.alert.id,
            record.alert.region,
            record.alert.instance_id,
            launch_ms,
            record.status.as_str(),
            to_ms(record.processed_at),
            wire::encode_history(record)?,
        ])?;
    }

    conn.prepare_cached("DELETE FROM dispatch_journal WHERE alert_id = ?1 AND launch_time = ?2")?
        .execute(params![record.alert.id, launch_ms])?;
    Ok((removed, recorded))
}
