use async_trait::async_trait;
use serde_json::Value;

use crate::error::{DispatchError, NotifyError, Result};
use crate::plugin::DispatcherPlugin;
use crate::{NotificationDispatcher, NotificationPayload};

/// Writes notifications to the log instead of sending them.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> std::result::Result<String, DispatchError> {
        let delivery_id = format!("log-{}", runwatch_common::id::next_id());
        tracing::info!(
            delivery_id = %delivery_id,
            token_len = token.len(),
            title = %payload.title,
            body = %payload.body,
            alert_id = payload.data.get("alertId").map(String::as_str).unwrap_or(""),
            "Notification logged"
        );
        Ok(delivery_id)
    }

    fn dispatcher_name(&self) -> &str {
        "log"
    }
}

pub struct LogPlugin;

impl DispatcherPlugin for LogPlugin {
    fn name(&self) -> &str {
        "log"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        match config {
            Value::Null | Value::Object(_) => Ok(()),
            other => Err(NotifyError::InvalidConfig(format!(
                "log dispatcher takes no configuration, got {other}"
            ))),
        }
    }

    fn create_dispatcher(&self, _config: &Value) -> Result<Box<dyn NotificationDispatcher>> {
        Ok(Box::new(LogDispatcher))
    }
}
