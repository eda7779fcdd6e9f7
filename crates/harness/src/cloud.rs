//! Control-plane HTTP API for the extended test phase
//!
//! The extended phase needs two things the CLI does not hand out directly:
//! the remote project's id (resolved from its generated name) and a
//! short-lived access token scoped to that project.

use hubtest_common::{Error, Result};

/// Header carrying the project-scoped access token on test requests
pub const ACCESS_TOKEN_HEADER: &str = "x-hub-access-token";
/// Header selecting the project when requesting a token
pub const PROJECT_ID_HEADER: &str = "x-hub-project-id";

const PROJECT_ID_QUERY: &str =
    "query ProjectByName($name: String!) { hub_projects(where: {name: {_eq: $name}}) { id } }";

/// Endpoints of the hosted control plane
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub auth_endpoint: String,
    pub data_endpoint: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            auth_endpoint: "https://auth.hub.dev".to_string(),
            data_endpoint: "https://data.hub.dev".to_string(),
        }
    }
}

/// Client for the hosted control plane's auth and data APIs
#[derive(Debug, Clone)]
pub struct CloudClient {
    client: reqwest::Client,
    config: CloudConfig,
}

impl CloudClient {
    pub fn new(config: CloudConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Resolve a project's id from its name
    pub async fn project_id(&self, project_name: &str, pat: &str) -> Result<String> {
        let url = format!(
            "{}/v1/graphql",
            self.config.data_endpoint.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "query": PROJECT_ID_QUERY,
            "variables": { "name": project_name },
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("pat {}", pat))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let value: serde_json::Value = response.json().await?;
        value
            .pointer("/data/hub_projects/0/id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Cloud(format!("no project named {} in data API", project_name))
            })
    }

    /// Mint a project-scoped access token
    pub async fn project_token(&self, project_id: &str, pat: &str) -> Result<String> {
        let url = format!(
            "{}/hub/project/token",
            self.config.auth_endpoint.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("pat {}", pat))
            .header(PROJECT_ID_HEADER, project_id)
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?;

        let value: serde_json::Value = response.json().await?;
        value
            .get("token")
            .and_then(|token| token.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Cloud("token response carries no token".to_string()))
    }
}
