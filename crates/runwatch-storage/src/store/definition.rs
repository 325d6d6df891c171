use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use runwatch_common::types::{AlertDefinition, HistoryRecord};
use std::collections::BTreeSet;

use super::alert::{cancel_in, AlertSelector};
use super::{from_ms, to_ms, AlertStore};
use crate::error::{Result, StorageError};

const DEFINITION_COLUMNS: &str =
    "id, enabled, threshold_minutes, regions, created_at, updated_at";

type DefinitionRow = (String, bool, i64, String, i64, i64);

fn read_row(row: &Row<'_>) -> rusqlite::Result<DefinitionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_definition(
    (id, enabled, threshold_minutes, regions, created_at, updated_at): DefinitionRow,
) -> Result<AlertDefinition> {
    let regions: BTreeSet<String> =
        serde_json::from_str(&regions).map_err(|e| StorageError::InvalidColumn {
            column: "regions",
            detail: e.to_string(),
        })?;
    Ok(AlertDefinition {
        id,
        enabled,
        threshold_minutes,
        regions,
        created_at: from_ms(created_at),
        updated_at: from_ms(updated_at),
    })
}

impl AlertStore {
    pub fn insert_definition(&self, def: &AlertDefinition) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO alert_definitions (id, enabled, threshold_minutes, regions, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                def.id,
                def.enabled,
                def.threshold_minutes,
                serde_json::to_string(&def.regions)?,
                to_ms(def.created_at),
                to_ms(def.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_definition(&self, id: &str) -> Result<Option<AlertDefinition>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {DEFINITION_COLUMNS} FROM alert_definitions WHERE id = ?1"),
                params![id],
                read_row,
            )
            .optional()?;
        row.map(into_definition).transpose()
    }

    /// All definitions, ordered by threshold then creation time.
    pub fn list_definitions(&self) -> Result<Vec<AlertDefinition>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM alert_definitions
             ORDER BY threshold_minutes ASC, created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], read_row)?;
        let mut defs = Vec::new();
        for row in rows {
            defs.push(into_definition(row?)?);
        }
        Ok(defs)
    }

    /// Overwrites an existing definition. Returns false when `def.id` is unknown.
    pub fn replace_definition(&self, def: &AlertDefinition) -> Result<bool> {
        let conn = self.lock();
        replace_in(&conn, def)
    }

    /// Overwrites a definition and, in the same transaction, cancels the
    /// live alerts matched by `cascade`.
    ///
    /// Returns `None` when the definition does not exist.
    pub fn narrow_definition(
        &self,
        def: &AlertDefinition,
        cascade: Option<&AlertSelector>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<HistoryRecord>>> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        if !replace_in(&tx, def)? {
            return Ok(None);
        }
        let cancelled = match cascade {
            Some(selector) => cancel_in(&tx, selector, reason, now)?,
            None => Vec::new(),
        };
        tx.commit()?;
        Ok(Some(cancelled))
    }

    /// Deletes a definition and, in the same transaction, cancels the live
    /// alerts matched by `cascade`.
    ///
    /// Returns `None` when the definition does not exist.
    pub fn delete_definition(
        &self,
        id: &str,
        cascade: Option<&AlertSelector>,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<HistoryRecord>>> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let deleted = tx.execute("DELETE FROM alert_definitions WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Ok(None);
        }
        let cancelled = match cascade {
            Some(selector) => cancel_in(&tx, selector, "alert definition removed", now)?,
            None => Vec::new(),
        };
        tx.commit()?;
        Ok(Some(cancelled))
    }
}

fn replace_in(conn: &Connection, def: &AlertDefinition) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE alert_definitions
         SET enabled = ?2, threshold_minutes = ?3, regions = ?4, updated_at = ?5
         WHERE id = ?1",
        params![
            def.id,
            def.enabled,
            def.threshold_minutes,
            serde_json::to_string(&def.regions)?,
            to_ms(def.updated_at),
        ],
    )?;
    Ok(changed > 0)
}
