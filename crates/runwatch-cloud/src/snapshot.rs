use async_trait::async_trait;
use chrono::{Duration, Utc};
use runwatch_common::types::ObservedState;
use runwatch_storage::AlertStore;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::InstanceStateOracle;

/// Answers from the tracked-instance registry fed by state-change events.
///
/// An entry not refreshed within `stale_after` is left out of the answer,
/// so the poller treats it as unknown rather than trusting an old report.
pub struct SnapshotOracle {
    store: Arc<AlertStore>,
    stale_after: Duration,
}

impl SnapshotOracle {
    pub fn new(store: Arc<AlertStore>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }
}

#[async_trait]
impl InstanceStateOracle for SnapshotOracle {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn query(
        &self,
        region: &str,
        instance_ids: &[String],
    ) -> Result<HashMap<String, ObservedState>> {
        let now = Utc::now();
        let mut states = HashMap::with_capacity(instance_ids.len());
        for id in instance_ids {
            let Some(instance) = self.store.get_instance(region, id)? else {
                continue;
            };
            if now - instance.updated_at > self.stale_after {
                tracing::debug!(
                    region,
                    instance_id = %id,
                    updated_at = %instance.updated_at,
                    "Instance snapshot is stale"
                );
                continue;
            }
            match ObservedState::from(instance.state) {
                ObservedState::Unknown => {}
                state => {
                    states.insert(id.clone(), state);
                }
            }
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runwatch_common::types::{InstanceState, TrackedInstance};

    fn track(store: &AlertStore, id: &str, state: InstanceState, age: Duration) {
        let now = Utc::now();
        store
            .upsert_instance(&TrackedInstance {
                instance_id: id.into(),
                instance_name: id.into(),
                region: "r1".into(),
                state,
                launch_time: Some(now - Duration::hours(1)),
                updated_at: now - age,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn reports_fresh_states_and_omits_stale_or_unknown() {
        let store = Arc::new(AlertStore::open_in_memory().unwrap());
        track(&store, "i-run", InstanceState::Running, Duration::seconds(5));
        track(&store, "i-stop", InstanceState::Terminated, Duration::seconds(5));
        track(&store, "i-old", InstanceState::Running, Duration::hours(2));
        track(&store, "i-pend", InstanceState::Pending, Duration::seconds(5));

        let oracle = SnapshotOracle::new(Arc::clone(&store), Duration::minutes(15));
        let ids: Vec<String> = ["i-run", "i-stop", "i-old", "i-pend", "i-none"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let states = oracle.query("r1", &ids).await.unwrap();

        assert_eq!(states.len(), 2);
        assert_eq!(states["i-run"], ObservedState::Running);
        assert_eq!(states["i-stop"], ObservedState::Stopped);
        assert!(!states.contains_key("i-old"));
        assert!(oracle.query("r2", &ids).await.unwrap().is_empty());
    }
}
