use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{to_ms, AlertStore};
use crate::error::Result;

const DELIVERY_TOKEN_KEY: &str = "delivery_token";

impl AlertStore {
    /// Registers the device token new alerts are addressed to.
    pub fn set_delivery_token(&self, token: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![DELIVERY_TOKEN_KEY, token, to_ms(now)],
        )?;
        Ok(())
    }

    pub fn delivery_token(&self) -> Result<Option<String>> {
        let conn = self.lock();
        let token: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![DELIVERY_TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token.filter(|t| !t.is_empty()))
    }
}
