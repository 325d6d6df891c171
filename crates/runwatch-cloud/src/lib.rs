//! Instance state lookups for the delivery poller.
//!
//! The poller never talks to a cloud provider directly; it asks an
//! [`InstanceStateOracle`] which of a region's instances are running.

pub mod error;
pub mod http;
pub mod snapshot;

use async_trait::async_trait;
use runwatch_common::types::ObservedState;
use runwatch_storage::AlertStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Answers "which of these instances in this region are running?".
///
/// Instances missing from the returned map are unknown. An `Err` means the
/// whole region is unknown for this round.
#[async_trait]
pub trait InstanceStateOracle: Send + Sync {
    /// Oracle name for logs (e.g. `"snapshot"`, `"http"`).
    fn name(&self) -> &str;

    async fn query(
        &self,
        region: &str,
        instance_ids: &[String],
    ) -> error::Result<HashMap<String, ObservedState>>;
}

/// `[oracle]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_kind")]
    pub kind: String,
    /// State endpoint for the `http` oracle.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Snapshot entries older than this are reported as unknown.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            endpoint: None,
            stale_after_secs: default_stale_after_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_kind() -> String {
    "snapshot".to_string()
}

fn default_stale_after_secs() -> u64 {
    900
}

fn default_timeout_secs() -> u64 {
    10
}

/// Maps a provider status string onto [`ObservedState`].
///
/// Provider spellings differ (`RUNNING`, `Running`, `running`,
/// `shutting-down`, `STOPPED`, `Deleted`, ...); anything transitional or
/// unrecognised is unknown.
///
/// # Examples
///
/// ```
/// use runwatch_cloud::normalize_state;
/// use runwatch_common::types::ObservedState;
///
/// assert_eq!(normalize_state("RUNNING"), ObservedState::Running);
/// assert_eq!(normalize_state("Stopped"), ObservedState::Stopped);
/// assert_eq!(normalize_state("PENDING"), ObservedState::Unknown);
/// ```
pub fn normalize_state(raw: &str) -> ObservedState {
    match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "running" => ObservedState::Running,
        "stopped" | "stopping" | "shutting-down" | "shutdown" | "terminated" | "terminating"
        | "deleted" | "released" => ObservedState::Stopped,
        _ => ObservedState::Unknown,
    }
}

/// Build an oracle from configuration.
///
/// # Errors
///
/// Returns [`error::OracleError::UnsupportedOracle`] if `config.kind` is not
/// `"snapshot"` or `"http"`, and [`error::OracleError::ConfigError`] when the
/// `http` oracle has no endpoint.
pub fn build_oracle(
    config: &OracleConfig,
    store: Arc<AlertStore>,
) -> error::Result<Arc<dyn InstanceStateOracle>> {
    match config.kind.as_str() {
        "snapshot" => Ok(Arc::new(snapshot::SnapshotOracle::new(
            store,
            chrono::Duration::seconds(config.stale_after_secs as i64),
        ))),
        "http" => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                error::OracleError::ConfigError("oracle.endpoint is required for kind \"http\"".into())
            })?;
            Ok(Arc::new(http::HttpOracle::new(
                endpoint,
                std::time::Duration::from_secs(config.timeout_secs),
            )?))
        }
        other => Err(error::OracleError::UnsupportedOracle(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_state_accepts_provider_spellings() {
        for raw in ["running", "RUNNING", "Running", " running "] {
            assert_eq!(normalize_state(raw), ObservedState::Running, "{raw}");
        }
        for raw in ["STOPPED", "Stopped", "shutting-down", "SHUTTING_DOWN", "terminated", "Deleted"] {
            assert_eq!(normalize_state(raw), ObservedState::Stopped, "{raw}");
        }
        for raw in ["pending", "STARTING", "REBOOTING", ""] {
            assert_eq!(normalize_state(raw), ObservedState::Unknown, "{raw}");
        }
    }

    #[test]
    fn build_oracle_validates_kind_and_endpoint() {
        let store = Arc::new(AlertStore::open_in_memory().unwrap());
        let snapshot = build_oracle(&OracleConfig::default(), Arc::clone(&store)).unwrap();
        assert_eq!(snapshot.name(), "snapshot");

        let http = OracleConfig {
            kind: "http".into(),
            ..OracleConfig::default()
        };
        assert!(matches!(
            build_oracle(&http, Arc::clone(&store)),
            Err(error::OracleError::ConfigError(_))
        ));

        let unknown = OracleConfig {
            kind: "aws".into(),
            ..OracleConfig::default()
        };
        assert!(matches!(
            build_oracle(&unknown, store),
            Err(error::OracleError::UnsupportedOracle(_))
        ));
    }
}
