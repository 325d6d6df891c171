use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard};

type Generator = Option<((i32, i32), SnowflakeIdBucket)>;

static ID_GENERATOR: Mutex<Generator> = Mutex::new(None);

fn generator() -> MutexGuard<'static, Generator> {
    ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Initialize the Snowflake generator for this worker.
///
/// `machine_id` and `node_id` must each be in `0..32`. Two poller workers
/// sharing a database should use distinct pairs. Re-initializing with the
/// pair already in use keeps the running sequence.
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = generator();
    if matches!(gen.as_ref(), Some((ids, _)) if *ids == (machine_id, node_id)) {
        return;
    }
    *gen = Some(((machine_id, node_id), SnowflakeIdBucket::new(machine_id, node_id)));
}

/// Next raw Snowflake id as a decimal string.
pub fn next_id() -> String {
    let mut gen = generator();
    let (_, bucket) = gen.get_or_insert_with(|| ((1, 1), SnowflakeIdBucket::new(1, 1)));
    bucket.get_id().to_string()
}

/// Id for a new alert definition (`def-<snowflake>`).
pub fn definition_id() -> String {
    format!("def-{}", next_id())
}

/// Id for a terminal history row (`hist-<snowflake>`).
pub fn history_id() -> String {
    format!("hist-{}", next_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn next_id_is_unique_across_prefixes() {
        init(1, 1);
        let mut ids = HashSet::new();
        for _ in 0..500 {
            let def = definition_id();
            let hist = history_id();
            assert!(def.starts_with("def-"));
            assert!(hist.starts_with("hist-"));
            assert!(ids.insert(def.trim_start_matches("def-").to_string()));
            assert!(ids.insert(hist.trim_start_matches("hist-").to_string()));
        }
    }

    #[test]
    fn raw_id_is_numeric() {
        init(1, 1);
        let id = next_id();
        assert!(id.parse::<i64>().is_ok(), "id should be a valid i64: {id}");
    }
}
