//! SQLite persistence for the runtime-alert lifecycle.
//!
//! [`AlertStore`] owns one database file holding alert definitions, region
//! switches, tracked instances, live scheduled alerts with their terminal
//! history, the dispatch journal and poller leases.

pub mod cache;
pub mod error;
mod schema;
pub mod store;


pub use cache::DefinitionCache;
pub use error::{Result, StorageError};
pub use store::{
    AlertSelector, AlertStore, DispatchRecord, RegionScope, RetireSummary, UpsertOutcome,
};
