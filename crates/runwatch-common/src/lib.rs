//! Shared schema for the runtime-alert lifecycle.
//!
//! Both the client-side materializer and the delivery poller read and write
//! the same [`types::ScheduledAlert`] records through the codec in [`wire`],
//! so there is exactly one document shape for a scheduled alert.

pub mod id;
pub mod region;
pub mod types;
pub mod wire;
