//! Alert definitions and their materialization into scheduled alerts.
//!
//! [`definitions::DefinitionService`] owns the user-authored rules and
//! broadcasts every change. [`scheduler::AlertSchedulerClient`] consumes
//! instance state changes and those broadcasts, creating and cancelling
//! per-instance [`ScheduledAlert`](runwatch_common::types::ScheduledAlert)
//! records keyed by `{region}_{instanceId}_{thresholdMinutes}`.

pub mod coverage;
pub mod definitions;
pub mod error;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use definitions::{DefinitionEvent, DefinitionService, Detached};
pub use error::{AlertError, Result};
pub use scheduler::{
    AlertSchedulerClient, InstanceStateChange, Materialized, RegionChange, SkipReason, Transition,
};
