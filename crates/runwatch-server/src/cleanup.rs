use chrono::{DateTime, Duration as ChronoDuration, Utc};
use runwatch_storage::AlertStore;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::config::CleanupConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub history: usize,
    pub journal: usize,
    pub leases: usize,
}

/// Purges old history, stale journal entries and expired poller leases.
pub struct CleanupTask {
    store: Arc<AlertStore>,
    interval_secs: u64,
    history_retention: ChronoDuration,
    journal_retention: ChronoDuration,
}

impl CleanupTask {
    pub fn new(store: Arc<AlertStore>, config: &CleanupConfig) -> Self {
        Self {
            store,
            interval_secs: config.interval_secs.max(1),
            history_retention: ChronoDuration::days(i64::from(config.history_retention_days)),
            journal_retention: ChronoDuration::days(i64::from(config.journal_retention_days)),
        }
    }

    pub async fn run(&self) {
        tracing::info!(interval_secs = self.interval_secs, "Cleanup task started");
        let mut tick = interval(Duration::from_secs(self.interval_secs));
        loop {
            tick.tick().await;
            if let Err(e) = self.run_once(Utc::now()) {
                tracing::error!(error = %e, "Cleanup failed");
            }
        }
    }

    pub fn run_once(&self, now: DateTime<Utc>) -> runwatch_storage::Result<CleanupReport> {
        let report = CleanupReport {
            history: self.store.purge_history(now - self.history_retention)?,
            journal: self.store.purge_journal(now - self.journal_retention)?,
            leases: self.store.purge_expired_leases(now)?,
        };
        if report != CleanupReport::default() {
            tracing::info!(
                history = report.history,
                journal = report.journal,
                leases = report.leases,
                "Cleaned up expired records"
            );
        }
        Ok(report)
    }
}
