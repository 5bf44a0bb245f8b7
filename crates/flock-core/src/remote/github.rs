//! GitHub REST client and the repository-level invokers built on it.
//!
//! Secret and file uploads reuse `GitHubClient` from their own modules.

use std::sync::Arc;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::config::Config;
use crate::error::{FlockError, Result};
use crate::orchestrator::{ActionInvoker, InvocationError, InvokeResult, Target};

use super::{decode_body, http_client, json_body, parse_payload, read_body, transport_error};

pub const CREATE_REPOSITORY: &str = "create-repository";
pub const DISPATCH_WORKFLOW: &str = "dispatch-workflow";

const API_VERSION: &str = "2022-11-28";

// ---------------------------------------------------------------------------
// GitHubClient
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GitHubClient {
    http: Client,
    api_url: String,
    owner: String,
    organization: bool,
    token: String,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        owner: impl Into<String>,
        organization: bool,
        token: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let owner = owner.into();
        if owner.trim().is_empty() {
            return Err(FlockError::Configuration(
                "github.owner must be set".to_string(),
            ));
        }
        Ok(Self {
            http: http_client(timeout)?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            owner,
            organization,
            token: token.into(),
        })
    }

    /// Build a client from the config, reading the token from its env var.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.github.api_url,
            &config.github.owner,
            config.github.organization,
            config.github.token()?,
            config.http.timeout(),
        )
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Login of the token's user. Used as a connectivity check.
    pub fn whoami(&self) -> std::result::Result<String, InvocationError> {
        let response = self
            .request(reqwest::Method::GET, "/user")
            .send()
            .map_err(transport_error)?;
        let body = json_body(response)?;
        Ok(body["login"].as_str().unwrap_or_default().to_string())
    }

    /// Create `name`, or adopt it when GitHub reports it already exists.
    ///
    /// A create whose response was lost still made the repository, so the
    /// 422 that a later attempt gets is resolved by looking the repository
    /// up. The result then carries `"existing": true`.
    pub fn create_repository(&self, name: &str, settings: &RepoSettings) -> InvokeResult {
        let path = if self.organization {
            format!("/orgs/{}/repos", self.owner)
        } else {
            "/user/repos".to_string()
        };
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({
                "name": name,
                "description": settings.description,
                "private": settings.private,
                "auto_init": settings.auto_init,
                "has_issues": settings.has_issues,
                "has_wiki": settings.has_wiki,
                "has_projects": settings.has_projects,
            }))
            .send()
            .map_err(transport_error)?;
        let (status, text) = read_body(response)?;

        let existing = status == StatusCode::UNPROCESSABLE_ENTITY && text.contains("already exists");
        let body = if existing {
            warn!(repo = name, owner = %self.owner, "repository already exists, adopting it");
            self.get_repository(name)?
        } else {
            decode_body(status, &text)?
        };

        if !settings.topics.is_empty() {
            self.replace_topics(name, &settings.topics)?;
        }

        let mut result = json!({
            "id": body["id"],
            "full_name": body["full_name"],
            "html_url": body["html_url"],
        });
        if existing {
            result["existing"] = json!(true);
        }
        Ok(result)
    }

    pub fn get_repository(&self, name: &str) -> InvokeResult {
        let response = self
            .request(reqwest::Method::GET, &format!("/repos/{}/{}", self.owner, name))
            .send()
            .map_err(transport_error)?;
        json_body(response)
    }

    /// Replace the repository's topic list with `topics`.
    pub fn replace_topics(&self, name: &str, topics: &[String]) -> InvokeResult {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/repos/{}/{}/topics", self.owner, name),
            )
            .json(&json!({ "names": topics }))
            .send()
            .map_err(transport_error)?;
        json_body(response)
    }

    pub fn dispatch_workflow(&self, repo: &str, dispatch: &WorkflowDispatch) -> InvokeResult {
        let path = format!(
            "/repos/{}/{}/actions/workflows/{}/dispatches",
            self.owner, repo, dispatch.workflow
        );
        let mut body = json!({ "ref": dispatch.git_ref });
        if !dispatch.inputs.is_empty() {
            body["inputs"] = json!(dispatch.inputs);
        }
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&body)
            .send()
            .map_err(transport_error)?;
        json_body(response)?;
        Ok(json!({
            "workflow": dispatch.workflow,
            "ref": dispatch.git_ref,
        }))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Per-target payload for `create-repository`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSettings {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub private: bool,
    #[serde(default = "default_true")]
    pub auto_init: bool,
    #[serde(default = "default_true")]
    pub has_issues: bool,
    #[serde(default)]
    pub has_wiki: bool,
    #[serde(default)]
    pub has_projects: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            description: String::new(),
            private: true,
            auto_init: true,
            has_issues: true,
            has_wiki: false,
            has_projects: false,
            topics: Vec::new(),
        }
    }
}

impl RepoSettings {
    pub fn from_config(config: &Config) -> Self {
        let repos = &config.repos;
        Self {
            description: repos.description.clone(),
            private: repos.private,
            auto_init: repos.auto_init,
            has_issues: repos.has_issues,
            has_wiki: repos.has_wiki,
            has_projects: repos.has_projects,
            topics: repos.topics.clone(),
        }
    }
}

/// Per-target payload for `dispatch-workflow`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDispatch {
    /// Workflow file name (`ci.yml`) or numeric id.
    pub workflow: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub inputs: std::collections::BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Invokers
// ---------------------------------------------------------------------------

/// Creates one repository named after the target id.
pub struct CreateRepository {
    client: Arc<GitHubClient>,
}

impl CreateRepository {
    pub fn new(client: Arc<GitHubClient>) -> Self {
        Self { client }
    }
}

impl ActionInvoker for CreateRepository {
    fn action(&self) -> &str {
        CREATE_REPOSITORY
    }

    fn invoke(&self, target: &Target) -> InvokeResult {
        let settings: RepoSettings = parse_payload(&target.payload)?;
        self.client.create_repository(&target.id, &settings)
    }

    fn idempotent(&self) -> bool {
        false
    }
}

/// Dispatches a workflow run in the repository named by the target id.
pub struct DispatchWorkflow {
    client: Arc<GitHubClient>,
}

impl DispatchWorkflow {
    pub fn new(client: Arc<GitHubClient>) -> Self {
        Self { client }
    }
}

impl ActionInvoker for DispatchWorkflow {
    fn action(&self) -> &str {
        DISPATCH_WORKFLOW
    }

    fn invoke(&self, target: &Target) -> InvokeResult {
        let dispatch: WorkflowDispatch = parse_payload(&target.payload)?;
        if dispatch.workflow.is_empty() || dispatch.git_ref.is_empty() {
            return Err(InvocationError::rejected(
                "dispatch payload needs both 'workflow' and 'ref'",
            ));
        }
        self.client.dispatch_workflow(&target.id, &dispatch)
    }

    /// Every accepted dispatch starts another workflow run.
    fn idempotent(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
