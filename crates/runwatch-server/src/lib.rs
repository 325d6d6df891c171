//! HTTP surface, background tasks and process wiring for runwatch.

pub mod api;
pub mod app;
pub mod cleanup;
pub mod config;
pub mod logging;
pub mod poller;
pub mod seed;
pub mod state;
