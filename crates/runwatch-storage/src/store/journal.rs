use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{to_ms, AlertStore};
use crate::error::{Result, StorageError};

/// Result of one send attempt, journaled as soon as the dispatcher returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchRecord {
    Delivered { delivery_id: String },
    Failed { detail: String },
}

impl AlertStore {
    /// Records a send attempt immediately, outside any tick batch, so an
    /// interrupted tick never attempts the same launch twice.
    pub fn record_dispatch(
        &self,
        alert_id: &str,
        launch_time: DateTime<Utc>,
        record: &DispatchRecord,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (outcome, delivery_id, detail) = match record {
            DispatchRecord::Delivered { delivery_id } => ("delivered", Some(delivery_id.as_str()), None),
            DispatchRecord::Failed { detail } => ("failed", None, Some(detail.as_str())),
        };
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO dispatch_journal
                 (alert_id, launch_time, outcome, delivery_id, detail, dispatched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![alert_id, to_ms(launch_time), outcome, delivery_id, detail, to_ms(now)],
        )?;
        Ok(())
    }

    /// An earlier attempt at this launch, if one was journaled.
    pub fn find_dispatch(
        &self,
        alert_id: &str,
        launch_time: DateTime<Utc>,
    ) -> Result<Option<DispatchRecord>> {
        let conn = self.lock();
        let row: Option<(String, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT outcome, delivery_id, detail FROM dispatch_journal
                 WHERE alert_id = ?1 AND launch_time = ?2",
                params![alert_id, to_ms(launch_time)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(|(outcome, delivery_id, detail)| match outcome.as_str() {
            "delivered" => Ok(DispatchRecord::Delivered {
                delivery_id: delivery_id.unwrap_or_default(),
            }),
            "failed" => Ok(DispatchRecord::Failed {
                detail: detail.unwrap_or_default(),
            }),
            other => Err(StorageError::InvalidColumn {
                column: "dispatch_journal.outcome",
                detail: format!("unknown outcome '{other}'"),
            }),
        })
        .transpose()
    }

    /// Drops journal entries whose live alert no longer exists and that were
    /// written before `before`.
    pub fn purge_journal(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM dispatch_journal
             WHERE dispatched_at < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM scheduled_alerts s
                   WHERE s.id = dispatch_journal.alert_id
                     AND s.launch_time = dispatch_journal.launch_time)",
            params![to_ms(before)],
        )?;
        Ok(removed)
    }
}
