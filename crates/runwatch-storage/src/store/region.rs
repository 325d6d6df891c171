use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use runwatch_common::types::{HistoryRecord, RegionAlertStatus};

use super::alert::{cancel_in, AlertSelector};
use super::{from_ms, to_ms, AlertStore};
use crate::error::Result;

impl AlertStore {
    pub fn get_region_status(&self, region: &str) -> Result<Option<RegionAlertStatus>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT region, enabled, updated_at FROM region_alert_status WHERE region = ?1",
                params![region],
                |row| {
                    Ok(RegionAlertStatus {
                        region: row.get(0)?,
                        enabled: row.get(1)?,
                        updated_at: from_ms(row.get(2)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// A region without a status row is disabled.
    pub fn is_region_enabled(&self, region: &str) -> Result<bool> {
        Ok(self
            .get_region_status(region)?
            .map(|s| s.enabled)
            .unwrap_or(false))
    }

    pub fn list_region_statuses(&self) -> Result<Vec<RegionAlertStatus>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT region, enabled, updated_at FROM region_alert_status ORDER BY region ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RegionAlertStatus {
                region: row.get(0)?,
                enabled: row.get(1)?,
                updated_at: from_ms(row.get(2)?),
            })
        })?;
        let mut statuses = Vec::new();
        for row in rows {
            statuses.push(row?);
        }
        Ok(statuses)
    }

    pub fn enable_region(&self, region: &str, now: DateTime<Utc>) -> Result<RegionAlertStatus> {
        let conn = self.lock();
        upsert_status(&conn, region, true, now)?;
        Ok(RegionAlertStatus {
            region: region.to_string(),
            enabled: true,
            updated_at: now,
        })
    }

    /// Switches a region off and cancels all of its live alerts atomically.
    pub fn disable_region(&self, region: &str, now: DateTime<Utc>) -> Result<Vec<HistoryRecord>> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        upsert_status(&tx, region, false, now)?;
        let cancelled = cancel_in(
            &tx,
            &AlertSelector::Region(region.to_string()),
            "region alerts disabled",
            now,
        )?;
        tx.commit()?;
        Ok(cancelled)
    }
}

fn upsert_status(
    conn: &rusqlite::Connection,
    region: &str,
    enabled: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO region_alert_status (region, enabled, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(region) DO UPDATE SET enabled = excluded.enabled, updated_at = excluded.updated_at",
        params![region, enabled, to_ms(now)],
    )?;
    Ok(())
}
