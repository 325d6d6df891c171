use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use runwatch_common::types::{HistoryRecord, InstanceState, TrackedInstance};

use super::alert::{cancel_in, AlertSelector};
use super::{from_ms, to_ms, AlertStore};
use crate::error::{Result, StorageError};

const INSTANCE_COLUMNS: &str = "region, instance_id, instance_name, state, launch_time, updated_at";

type InstanceRow = (String, String, String, String, Option<i64>, i64);

fn read_row(row: &Row<'_>) -> rusqlite::Result<InstanceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_instance(
    (region, instance_id, instance_name, state, launch_time, updated_at): InstanceRow,
) -> Result<TrackedInstance> {
    let state = state
        .parse::<InstanceState>()
        .map_err(|detail| StorageError::InvalidColumn {
            column: "state",
            detail,
        })?;
    Ok(TrackedInstance {
        instance_id,
        instance_name,
        region,
        state,
        launch_time: launch_time.map(from_ms),
        updated_at: from_ms(updated_at),
    })
}

impl AlertStore {
    pub fn upsert_instance(&self, instance: &TrackedInstance) -> Result<()> {
        let conn = self.lock();
        upsert_in(&conn, instance)
    }

    /// Records a non-running state and cancels every live alert of the
    /// instance in the same transaction.
    pub fn record_instance_stopped(
        &self,
        instance: &TrackedInstance,
        now: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        upsert_in(&tx, instance)?;
        let cancelled = cancel_in(
            &tx,
            &AlertSelector::Instance {
                region: instance.region.clone(),
                instance_id: instance.instance_id.clone(),
            },
            &format!("instance {}", instance.state),
            now,
        )?;
        tx.commit()?;
        Ok(cancelled)
    }

    pub fn get_instance(&self, region: &str, instance_id: &str) -> Result<Option<TrackedInstance>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {INSTANCE_COLUMNS} FROM tracked_instances WHERE region = ?1 AND instance_id = ?2"
                ),
                params![region, instance_id],
                read_row,
            )
            .optional()?;
        row.map(into_instance).transpose()
    }

    /// Tracked instances, optionally limited to one region.
    pub fn list_instances(&self, region: Option<&str>) -> Result<Vec<TrackedInstance>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM tracked_instances
             WHERE (?1 IS NULL OR region = ?1)
             ORDER BY region ASC, instance_id ASC"
        ))?;
        let rows = stmt.query_map(params![region], read_row)?;
        let mut instances = Vec::new();
        for row in rows {
            instances.push(into_instance(row?)?);
        }
        Ok(instances)
    }

    /// Instances last reported running in `region` with a known launch time.
    pub fn running_instances(&self, region: &str) -> Result<Vec<TrackedInstance>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM tracked_instances
             WHERE region = ?1 AND state = 'running' AND launch_time IS NOT NULL
             ORDER BY instance_id ASC"
        ))?;
        let rows = stmt.query_map(params![region], read_row)?;
        let mut instances = Vec::new();
        for row in rows {
            instances.push(into_instance(row?)?);
        }
        Ok(instances)
    }

    /// Regions that have at least one running tracked instance.
    pub fn regions_with_running_instances(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT region FROM tracked_instances
             WHERE state = 'running' AND launch_time IS NOT NULL
             ORDER BY region ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut regions = Vec::new();
        for row in rows {
            regions.push(row?);
        }
        Ok(regions)
    }
}

fn upsert_in(conn: &Connection, instance: &TrackedInstance) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO tracked_instances (region, instance_id, instance_name, state, launch_time, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(region, instance_id) DO UPDATE SET
             instance_name = excluded.instance_name,
             state = excluded.state,
             launch_time = excluded.launch_time,
             updated_at = excluded.updated_at",
    )?
    .execute(params![
        instance.region,
        instance.instance_id,
        instance.instance_name,
        instance.state.as_str(),
        instance.launch_time.map(to_ms),
        to_ms(instance.updated_at),
    ])?;
    Ok(())
}
