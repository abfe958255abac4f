//! Minimal client for the KOS agent API.
//!
//! The terminal never creates agents; it only checks that the agent it is
//! about to attach to exists and reports its status.

// Rust guideline compliant 2026-02

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::constants::{API_KEY_HEADER, API_PREFIX, API_TIMEOUT_SECS};
use crate::identity::SessionIdentity;

/// Agent as returned by `GET /api/v1/projects/{id}/agents/{aid}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    /// Agent id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Model the agent runs.
    #[serde(default)]
    pub model: Option<String>,
    /// Agent role.
    #[serde(default)]
    pub role: Option<String>,
    /// Lifecycle status (e.g. `running`, `stopped`).
    #[serde(default)]
    pub status: Option<String>,
    /// Pod hosting the agent's shell.
    #[serde(default)]
    pub pod_name: Option<String>,
}

/// REST client for agent lookups.
#[derive(Debug, Clone)]
pub struct AgentApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AgentApi {
    /// Build a client for `base_url` authenticating with `api_key`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base_url)
    }

    /// Fetch one agent.
    pub async fn get_agent(&self, identity: &SessionIdentity) -> Result<AgentSummary> {
        let path = format!(
            "/projects/{}/agents/{}",
            identity.project_id(),
            identity.agent_id()
        );
        self.get_json(&path).await
    }

    /// List the agents of a project.
    pub async fn list_agents(&self, project_id: &str) -> Result<Vec<AgentSummary>> {
        self.get_json(&format!("/projects/{project_id}/agents")).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        log::debug!("[AgentApi] GET {url}");

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("GET {path} failed: {status}");
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("GET {path}: invalid response body"))
    }
}
