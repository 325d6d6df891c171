use chrono::{DateTime, Utc};
use rusqlite::params;
use runwatch_common::types::HistoryRecord;
use runwatch_common::wire;

use super::{to_ms, AlertStore};
use crate::error::Result;

impl AlertStore {
    /// History rows, newest first, optionally limited to one region.
    pub fn list_history(
        &self,
        region: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT doc FROM alert_history
             WHERE (?1 IS NULL OR region = ?1)
             ORDER BY processed_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![region, limit as i64, offset as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(wire::decode_history(&row?)?);
        }
        Ok(records)
    }

    pub fn count_history(&self, region: Option<&str>) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alert_history WHERE (?1 IS NULL OR region = ?1)",
            params![region],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Whether this launch of `alert_id` already reached completed or failed.
    pub fn delivery_attempted(&self, alert_id: &str, launch_time: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock();
        let found = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM alert_history
             WHERE alert_id = ?1 AND launch_time = ?2 AND status IN ('completed', 'failed'))",
            params![alert_id, to_ms(launch_time)],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Deletes history processed before `before`.
    ///
    /// Rows that still guard a running launch (same instance and launch time
    /// as a tracked running instance) are kept so a repeated running event
    /// cannot notify twice.
    pub fn purge_history(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM alert_history
             WHERE processed_at < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM tracked_instances t
                   WHERE t.region = alert_history.region
                     AND t.instance_id = alert_history.instance_id
                     AND t.state = 'running'
                     AND t.launch_time = alert_history.launch_time)",
            params![to_ms(before)],
        )?;
        Ok(removed)
    }
}
