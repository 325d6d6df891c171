use runwatch_alert::{AlertError, DefinitionService};
use runwatch_common::types::threshold_minutes;
use std::collections::BTreeSet;

use crate::config::DefinitionsSeedFile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub created: u32,
    pub skipped: u32,
    pub failed: u32,
}

pub fn load_seed_file(path: &str) -> anyhow::Result<DefinitionsSeedFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", path, e))
}

/// Adds every seeded definition through the validating path. Entries that
/// collide with an existing definition or are malformed are skipped.
pub fn apply_definition_seed(service: &DefinitionService, seed: &DefinitionsSeedFile) -> SeedReport {
    let mut report = SeedReport::default();
    for entry in &seed.definitions {
        let threshold = match threshold_minutes(entry.hours, entry.minutes) {
            Ok(threshold) => threshold,
            Err(reason) => {
                tracing::warn!(hours = entry.hours, minutes = entry.minutes, reason = %reason, "Skipping seeded alert definition");
                report.skipped += 1;
                continue;
            }
        };
        let regions: BTreeSet<String> = entry.regions.iter().cloned().collect();
        match service.add(threshold, regions, entry.enabled) {
            Ok(def) => {
                tracing::info!(id = %def.id, threshold_minutes = threshold, "Alert definition seeded");
                report.created += 1;
            }
            Err(AlertError::Validation(reason)) => {
                tracing::warn!(threshold_minutes = threshold, reason = %reason, "Skipping seeded alert definition");
                report.skipped += 1;
            }
            Err(e) => {
                tracing::error!(threshold_minutes = threshold, error = %e, "Failed to seed alert definition");
                report.failed += 1;
            }
        }
    }
    tracing::info!(
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "init-definitions completed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AlertCore;
    use runwatch_storage::AlertStore;
    use std::io::Write;
    use std::sync::Arc;

    #[test]
    fn seed_creates_and_skips_duplicates() {
        runwatch_common::id::init(1, 1);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"definitions": [
                {{"hours": 2, "minutes": 0}},
                {{"hours": 0, "minutes": 45, "regions": ["us-east-1"]}},
                {{"hours": 2, "minutes": 0, "regions": ["eu-west-1"]}},
                {{"hours": 0, "minutes": 0}},
                {{"hours": 1, "minutes": 0, "regions": ["Not A Region"]}},
                {{"hours": 9223372036854775807, "minutes": 0}}
            ]}}"#
        )
        .unwrap();

        let seed = load_seed_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(seed.definitions.len(), 6);
        assert!(seed.definitions.iter().all(|d| d.enabled));

        let core = AlertCore::new(Arc::new(AlertStore::open_in_memory().unwrap()));
        let report = apply_definition_seed(&core.definitions, &seed);
        assert_eq!(
            report,
            SeedReport {
                created: 2,
                skipped: 4,
                failed: 0
            }
        );
        assert_eq!(core.definitions.list().unwrap().len(), 2);

        // Re-running the same seed adds nothing.
        let again = apply_definition_seed(&core.definitions, &seed);
        assert_eq!(again.created, 0);
        assert_eq!(again.skipped, 6);
    }

    #[test]
    fn missing_seed_file_is_an_error() {
        let err = load_seed_file("/nonexistent/runwatch-seed.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read seed file"));
    }
}
