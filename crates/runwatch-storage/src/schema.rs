//! Table layout of the alert database.
//!
//! All timestamps are stored as epoch milliseconds. Live and historical
//! alerts additionally keep their full canonical document in `doc`; the
//! other columns exist only to be queried.

use rusqlite::Connection;

use crate::error::Result;

const DEFINITIONS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_definitions (
    id TEXT PRIMARY KEY,
    enabled INTEGER NOT NULL DEFAULT 1,
    threshold_minutes INTEGER NOT NULL,
    regions TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_definitions_threshold ON alert_definitions(threshold_minutes);
";

const REGION_STATUS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS region_alert_status (
    region TEXT PRIMARY KEY,
    enabled INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

const INSTANCES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tracked_instances (
    region TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    instance_name TEXT NOT NULL,
    state TEXT NOT NULL,
    launch_time INTEGER,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (region, instance_id)
);
CREATE INDEX IF NOT EXISTS idx_instances_region_state ON tracked_instances(region, state);
";

const SCHEDULED_ALERTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS scheduled_alerts (
    id TEXT PRIMARY KEY,
    region TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    threshold_minutes INTEGER NOT NULL,
    launch_time INTEGER NOT NULL,
    scheduled_time INTEGER NOT NULL,
    status TEXT NOT NULL,
    doc TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scheduled_due ON scheduled_alerts(status, scheduled_time);
CREATE INDEX IF NOT EXISTS idx_scheduled_instance ON scheduled_alerts(region, instance_id);
CREATE INDEX IF NOT EXISTS idx_scheduled_threshold ON scheduled_alerts(threshold_minutes);
";

const HISTORY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_history (
    id TEXT PRIMARY KEY,
    alert_id TEXT NOT NULL,
    region TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    launch_time INTEGER NOT NULL,
    status TEXT NOT NULL,
    processed_at INTEGER NOT NULL,
    doc TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_alert_launch ON alert_history(alert_id, launch_time);
CREATE INDEX IF NOT EXISTS idx_history_region_time ON alert_history(region, processed_at);
CREATE INDEX IF NOT EXISTS idx_history_processed ON alert_history(processed_at);
";

const JOURNAL_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dispatch_journal (
    alert_id TEXT NOT NULL,
    launch_time INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    delivery_id TEXT,
    detail TEXT,
    dispatched_at INTEGER NOT NULL,
    PRIMARY KEY (alert_id, launch_time)
);
";

const LEASES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS poller_leases (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";

const SETTINGS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    for schema in [
        DEFINITIONS_SCHEMA,
        REGION_STATUS_SCHEMA,
        INSTANCES_SCHEMA,
        SCHEDULED_ALERTS_SCHEMA,
        HISTORY_SCHEMA,
        JOURNAL_SCHEMA,
        LEASES_SCHEMA,
        SETTINGS_SCHEMA,
    ] {
        conn.execute_batch(schema)?;
    }
    Ok(())
}
