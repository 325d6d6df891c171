//! Notification delivery for due runtime alerts.
//!
//! The poller hands a rendered [`NotificationPayload`] and the alert's device
//! token to a [`NotificationDispatcher`]. Dispatchers are built from
//! configuration through the [`plugin::DispatcherRegistry`].

pub mod dispatchers;
pub mod error;
pub mod payload;
pub mod plugin;
pub mod utils;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

pub use error::{DispatchError, DispatchErrorKind};

/// Rendered notification content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

/// Delivers a notification to one device token.
///
/// Returns a delivery id assigned by the transport on success.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> std::result::Result<String, DispatchError>;

    /// Dispatcher kind name (e.g. `"webhook"`, `"log"`).
    fn dispatcher_name(&self) -> &str;
}
