use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{DispatchError, NotifyError, Result};
use crate::plugin::DispatcherPlugin;
use crate::utils::{redact_sensitive_json, truncate_string, MAX_BODY_LENGTH};
use crate::{NotificationDispatcher, NotificationPayload};

/// Posts notifications to a push gateway as
/// `{"message": {"token", "notification": {"title", "body"}, "data", "apns"}}`.
///
/// The delivery id is read from the response's `name`, `id` or `messageId`
/// field. 5xx, 408, 429 and transport failures are transient; any other
/// non-success status is permanent. Nothing is retried here.
pub struct WebhookDispatcher {
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(url: &str, headers: BTreeMap<String, String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            headers,
            client,
        })
    }

    fn render_body(token: &str, payload: &NotificationPayload) -> Value {
        json!({
            "message": {
                "token": token,
                "notification": {
                    "title": payload.title,
                    "body": payload.body,
                },
                "data": payload.data,
                "apns": {
                    "headers": {
                        "apns-priority": "10",
                        "apns-push-type": "alert",
                    },
                    "payload": {
                        "aps": {
                            "alert": {"title": payload.title, "body": payload.body},
                            "sound": "default",
                            "badge": 1,
                        }
                    }
                }
            }
        })
    }
}

fn classify(status: StatusCode, detail: String) -> DispatchError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        DispatchError::transient(detail)
    } else {
        DispatchError::permanent(detail)
    }
}

fn delivery_id_from(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["name", "id", "messageId"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> std::result::Result<String, DispatchError> {
        let mut request = self
            .client
            .post(self.url.as_str())
            .json(&Self::render_body(token, payload));
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::warn!(status = %status, "Push gateway rejected notification");
            return Err(classify(
                status,
                format!("HTTP {status}: {}", truncate_string(&body, MAX_BODY_LENGTH)),
            ));
        }

        Ok(delivery_id_from(&body)
            .unwrap_or_else(|| format!("webhook-{}", runwatch_common::id::next_id())))
    }

    fn dispatcher_name(&self) -> &str {
        "webhook"
    }
}

#[derive(Deserialize)]
struct WebhookConfig {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

pub struct WebhookPlugin;

impl WebhookPlugin {
    fn parse(config: &Value) -> Result<WebhookConfig> {
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("Invalid webhook config: {e}")))?;
        if !(cfg.url.starts_with("http://") || cfg.url.starts_with("https://")) {
            return Err(NotifyError::InvalidConfig(format!(
                "webhook url must be http(s): {}",
                cfg.url
            )));
        }
        Ok(cfg)
    }
}

impl DispatcherPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        Self::parse(config).map(|_| ())
    }

    fn create_dispatcher(&self, config: &Value) -> Result<Box<dyn NotificationDispatcher>> {
        let cfg = Self::parse(config)?;
        Ok(Box::new(WebhookDispatcher::new(
            &cfg.url,
            cfg.headers,
            Duration::from_secs(cfg.timeout_secs),
        )?))
    }

    fn redact_config(&self, config: &Value) -> Value {
        redact_sensitive_json(config)
    }
}
