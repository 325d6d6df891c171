mod alert;
mod definition;
mod history;
mod instance;
mod journal;
mod lease;
mod region;
mod settings;

pub use alert::{AlertSelector, RegionScope, RetireSummary, UpsertOutcome};
pub use journal::DispatchRecord;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::schema;

/// SQLite-backed store for definitions, region switches, tracked instances,
/// live scheduled alerts, their history, the dispatch journal and poller
/// leases.
///
/// A single connection is shared behind a mutex; operations that touch
/// several tables run inside one transaction so they apply all-or-nothing.
pub struct AlertStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl AlertStore {
    /// Opens (or creates) `data_dir/file_name` and applies the schema.
    pub fn open(data_dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(file_name);
        let conn = Connection::open(&path)?;
        schema::migrate(&conn)?;
        tracing::info!(path = %path.display(), "Initialized alert store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
