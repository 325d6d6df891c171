use async_trait::async_trait;
use reqwest::Client;
use runwatch_common::types::ObservedState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{OracleError, Result};
use crate::{normalize_state, InstanceStateOracle};

const MAX_ERROR_BODY: usize = 2000;

/// Asks an external state endpoint owned by the surrounding application.
///
/// Request: `POST {endpoint}` with `{"region": "...", "instanceIds": [...]}`.
/// Response: either `{"states": {"<id>": "<provider status>"}}` or
/// `{"instances": [{"instanceId": "...", "state": "..."}]}`.
pub struct HttpOracle {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateRequest<'a> {
    region: &'a str,
    instance_ids: &'a [String],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StateResponse {
    Map {
        states: HashMap<String, String>,
    },
    List {
        instances: Vec<InstanceEntry>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceEntry {
    #[serde(alias = "instanceID", alias = "InstanceId")]
    instance_id: String,
    #[serde(alias = "status", alias = "InstanceState")]
    state: String,
}

impl HttpOracle {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl InstanceStateOracle for HttpOracle {
    fn name(&self) -> &str {
        "http"
    }

    async fn query(
        &self,
        region: &str,
        instance_ids: &[String],
    ) -> Result<HashMap<String, ObservedState>> {
        if instance_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let response = self
            .client
            .post(&self.endpoint)
            .json(&StateRequest {
                region,
                instance_ids,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(OracleError::HttpError {
                oracle: "http".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let raw: Vec<(String, String)> = match serde_json::from_str::<StateResponse>(&body)? {
            StateResponse::Map { states } => states.into_iter().collect(),
            StateResponse::List { instances } => instances
                .into_iter()
                .map(|e| (e.instance_id, e.state))
                .collect(),
        };

        let mut states = HashMap::with_capacity(raw.len());
        for (id, state) in raw {
            if !instance_ids.contains(&id) {
                continue;
            }
            match normalize_state(&state) {
                ObservedState::Unknown => {
                    tracing::debug!(region, instance_id = %id, state = %state, "Unrecognised instance state");
                }
                observed => {
                    states.insert(id, observed);
                }
            }
        }
        Ok(states)
    }
}
