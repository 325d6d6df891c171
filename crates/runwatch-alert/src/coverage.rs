//! Region coverage arithmetic for definition changes.
//!
//! When a definition stops covering some regions for a threshold, only the
//! alerts no other enabled definition still covers may be cancelled.

use runwatch_common::types::AlertDefinition;
use runwatch_storage::{AlertSelector, RegionScope};
use std::collections::BTreeSet;

/// Scope a definition covers, as a [`RegionScope`].
pub fn scope_of(def: &AlertDefinition) -> RegionScope {
    if def.is_global() {
        RegionScope::AllExcept(BTreeSet::new())
    } else {
        RegionScope::Only(def.regions.clone())
    }
}

/// Regions `before` covered that `after` no longer covers for the same
/// threshold. `None` when nothing was lost.
pub fn lost_scope(before: &AlertDefinition, after: &AlertDefinition) -> Option<RegionScope> {
    if !before.enabled {
        return None;
    }
    if !after.enabled || after.threshold_minutes != before.threshold_minutes {
        return Some(scope_of(before));
    }
    match (before.is_global(), after.is_global()) {
        (_, true) => None,
        (true, false) => Some(RegionScope::AllExcept(after.regions.clone())),
        (false, false) => {
            let lost: BTreeSet<String> = before.regions.difference(&after.regions).cloned().collect();
            (!lost.is_empty()).then_some(RegionScope::Only(lost))
        }
    }
}

/// Narrows `lost` for `threshold_minutes` by whatever the other enabled
/// definitions (everything in `definitions` except `exclude_id`) still cover,
/// and turns the remainder into a cancellation selector.
pub fn cancellation_for(
    threshold_minutes: i64,
    lost: RegionScope,
    definitions: &[AlertDefinition],
    exclude_id: &str,
) -> Option<AlertSelector> {
    let mut covered = BTreeSet::new();
    for def in definitions
        .iter()
        .filter(|d| d.id != exclude_id && d.enabled && d.threshold_minutes == threshold_minutes)
    {
        if def.is_global() {
            return None;
        }
        covered.extend(def.regions.iter().cloned());
    }

    let scope = match lost {
        RegionScope::Only(regions) => {
            RegionScope::Only(regions.difference(&covered).cloned().collect())
        }
        RegionScope::AllExcept(mut kept) => {
            kept.extend(covered);
            RegionScope::AllExcept(kept)
        }
    };
    (!scope.is_empty()).then_some(AlertSelector::Threshold {
        threshold_minutes,
        scope,
    })
}
