//! Tailscale auth key generation.

use std::sync::Arc;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{Config, TailscaleConfig};
use crate::error::{FlockError, Result};
use crate::orchestrator::{
    ActionInvoker, InvocationError, InvokeResult, Outcome, RunRecord, Target,
};

use super::{http_client, json_body, parse_payload, transport_error};

pub const GENERATE_AUTH_KEY: &str = "generate-auth-key";

const SECONDS_PER_DAY: u64 = 24 * 3600;

#[derive(Debug)]
pub struct TailscaleClient {
    http: Client,
    api_url: String,
    tailnet: String,
    api_key: String,
}

impl TailscaleClient {
    pub fn new(
        api_url: impl Into<String>,
        tailnet: impl Into<String>,
        api_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            tailnet: tailnet.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.tailscale.api_url,
            &config.tailscale.tailnet,
            config.tailscale.api_key()?,
            config.http.timeout(),
        )
    }

    fn keys_url(&self) -> String {
        format!("{}/tailnet/{}/keys", self.api_url, self.tailnet)
    }

    /// Number of keys visible to the API key. Used as a connectivity check.
    pub fn count_keys(&self) -> std::result::Result<usize, InvocationError> {
        let response = self
            .http
            .get(self.keys_url())
            .bearer_auth(&self.api_key)
            .send()
            .map_err(transport_error)?;
        let body = json_body(response)?;
        Ok(body["keys"].as_array().map(Vec::len).unwrap_or(0))
    }

    pub fn create_key(&self, description: &str, request: &KeyRequest) -> InvokeResult {
        let mut create = json!({
            "reusable": request.reusable,
            "ephemeral": request.ephemeral,
            "preauthorized": request.preauthorized,
        });
        if !request.tags.is_empty() {
            create["tags"] = json!(request.tags);
        }
        let body = json!({
            "capabilities": { "devices": { "create": create } },
            "expirySeconds": u64::from(request.expiry_days) * SECONDS_PER_DAY,
            "description": description,
        });

        let response = self
            .http
            .post(self.keys_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(transport_error)?;
        let body = json_body(response)?;
        if body["key"].as_str().unwrap_or_default().is_empty() {
            return Err(InvocationError::rejected("response did not contain a key"));
        }
        Ok(json!({
            "id": body["id"],
            "key": body["key"],
            "expires": body["expires"],
        }))
    }
}

/// Per-target payload for `generate-auth-key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRequest {
    pub expiry_days: u32,
    pub reusable: bool,
    pub ephemeral: bool,
    pub preauthorized: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Default for KeyRequest {
    fn default() -> Self {
        Self::from(&TailscaleConfig::default())
    }
}

impl From<&TailscaleConfig> for KeyRequest {
    fn from(cfg: &TailscaleConfig) -> Self {
        Self {
            expiry_days: cfg.expiry_days,
            reusable: cfg.reusable,
            ephemeral: cfg.ephemeral,
            preauthorized: cfg.preauthorized,
            tags: cfg.tags.clone(),
        }
    }
}

/// Keys minted by a `generate-auth-key` run, in target order.
///
/// Targets that did not succeed are skipped.
pub fn generated_keys(run: &RunRecord) -> Result<Vec<String>> {
    if run.action != GENERATE_AUTH_KEY {
        return Err(FlockError::Configuration(format!(
            "run {} is a {} run, not {GENERATE_AUTH_KEY}",
            run.id, run.action
        )));
    }
    let keys = run
        .targets
        .iter()
        .filter_map(|t| match run.outcomes.get(&t.id) {
            Some(Outcome::Succeeded { result }) => result["key"].as_str().map(str::to_string),
            _ => None,
        })
        .collect();
    Ok(keys)
}

/// Generates one auth key per target; the target id becomes the key description.
pub struct GenerateAuthKey {
    client: Arc<TailscaleClient>,
}

impl GenerateAuthKey {
    pub fn new(client: Arc<TailscaleClient>) -> Self {
        Self { client }
    }
}

impl ActionInvoker for GenerateAuthKey {
    fn action(&self) -> &str {
        GENERATE_AUTH_KEY
    }

    fn invoke(&self, target: &Target) -> InvokeResult {
        let request: KeyRequest = parse_payload(&target.payload)?;
        self.client.create_key(&target.id, &request)
    }

    /// A repeated call mints a second key.
    fn idempotent(&self) -> bool {
        false
    }
}
