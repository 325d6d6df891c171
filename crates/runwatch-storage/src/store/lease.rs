use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use super::{to_ms, AlertStore};
use crate::error::Result;

impl AlertStore {
    /// Takes or renews the named lease for `holder` until `now + ttl`.
    ///
    /// Succeeds when the lease is free, expired, or already held by `holder`.
    pub fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "INSERT INTO poller_leases (name, holder, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
             WHERE poller_leases.expires_at <= ?4 OR poller_leases.holder = excluded.holder",
            params![name, holder, to_ms(now + ttl), to_ms(now)],
        )?;
        Ok(changed > 0)
    }

    /// Releases the lease if `holder` still owns it.
    pub fn release_lease(&self, name: &str, holder: &str) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "DELETE FROM poller_leases WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(changed > 0)
    }

    /// Current unexpired holder of the lease.
    pub fn lease_holder(&self, name: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let conn = self.lock();
        let holder = conn
            .query_row(
                "SELECT holder FROM poller_leases WHERE name = ?1 AND expires_at > ?2",
                params![name, to_ms(now)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(holder)
    }

    pub fn purge_expired_leases(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM poller_leases WHERE expires_at <= ?1",
            params![to_ms(now)],
        )?;
        Ok(removed)
    }
}
