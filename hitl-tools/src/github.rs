//! GitHub repository tools over the REST API.
//!
//! `create_repository` and `delete_repository` mutate the authenticated
//! user's account and are expected to be registered as requiring
//! confirmation. `list_repositories` is read-only.

use crate::traits::{required_str, Tool, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("hitl-agent/", env!("CARGO_PKG_VERSION"));
/// GitHub caps `per_page` at 100.
const MAX_PER_PAGE: u64 = 100;

/// Authenticated GitHub REST client shared by the repository tools.
#[derive(Clone)]
pub struct GitHubClient {
    token: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

/// Failure talking to GitHub, already phrased for the model.
#[derive(Debug)]
struct ApiFailure(String);

impl GitHubClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: Option<String>, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        Self {
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, ApiFailure> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ApiFailure("GITHUB_TOKEN is not configured".to_string()))?;

        Ok(self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    /// Send and check status; the body of an error response becomes the message.
    async fn send(request: reqwest::RequestBuilder) -> anyhow::Result<Result<reqwest::Response, ApiFailure>> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(Ok(response));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
            .unwrap_or(body);
        Ok(Err(ApiFailure(format!("GitHub API error ({status}): {message}"))))
    }

    async fn authenticated_login(&self) -> anyhow::Result<Result<String, ApiFailure>> {
        let request = match self.request(reqwest::Method::GET, "/user") {
            Ok(request) => request,
            Err(failure) => return Ok(Err(failure)),
        };
        match Self::send(request).await? {
            Ok(response) => {
                let user: Account = response.json().await?;
                Ok(Ok(user.login))
            }
            Err(failure) => Ok(Err(failure)),
        }
    }
}

/// Unwrap an `ApiFailure` into a soft tool failure.
macro_rules! try_api {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(ApiFailure(message)) => return Ok(ToolResult::failure(message)),
        }
    };
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    private: bool,
    html_url: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    ssh_url: String,
    #[serde(default)]
    clone_url: String,
}

#[derive(Debug, Serialize)]
struct CreateRepositoryRequest<'a> {
    name: &'a str,
    description: &'a str,
    private: bool,
    auto_init: bool,
}

// ── create_repository ───────────────────────────────────────────

pub struct CreateRepositoryTool {
    github: GitHubClient,
}

impl CreateRepositoryTool {
    pub fn new(github: GitHubClient) -> Self {
        Self { github }
    }
}

#[async_trait]
impl Tool for CreateRepositoryTool {
    fn name(&self) -> &str {
        "create_repository"
    }

    fn description(&self) -> &str {
        "Create a new GitHub repository for the authenticated user"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Repository name (no spaces, use hyphens)"
                },
                "description": {
                    "type": "string",
                    "description": "Short description of the repository",
                    "default": ""
                },
                "private": {
                    "type": "boolean",
                    "description": "Create a private repository",
                    "default": false
                },
                "auto_init": {
                    "type": "boolean",
                    "description": "Initialize with a README",
                    "default": true
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let name = required_str(&args, "name")?;
        let body = CreateRepositoryRequest {
            name,
            description: args.get("description").and_then(Value::as_str).unwrap_or(""),
            private: args.get("private").and_then(Value::as_bool).unwrap_or(false),
            auto_init: args.get("auto_init").and_then(Value::as_bool).unwrap_or(true),
        };

        let request = try_api!(self.github.request(reqwest::Method::POST, "/user/repos"));
        let response = try_api!(GitHubClient::send(request.json(&body)).await?);
        let repo: Repository = response.json().await?;

        tracing::info!(repo = %repo.full_name, private = repo.private, "Repository created");
        Ok(ToolResult::json(&json!({
            "status": "success",
            "name": repo.full_name,
            "url": repo.html_url,
            "private": repo.private,
            "created_at": repo.created_at,
            "ssh_url": repo.ssh_url,
            "clone_url": repo.clone_url,
        })))
    }
}

// ── delete_repository ───────────────────────────────────────────

pub struct DeleteRepositoryTool {
    github: GitHubClient,
}

impl DeleteRepositoryTool {
    pub fn new(github: GitHubClient) -> Self {
        Self { github }
    }
}

#[async_trait]
impl Tool for DeleteRepositoryTool {
    fn name(&self) -> &str {
        "delete_repository"
    }

    fn description(&self) -> &str {
        "Permanently delete a GitHub repository. Accepts 'owner/repo' or a bare repository name owned by the authenticated user."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_name": {
                    "type": "string",
                    "description": "Full name 'owner/repo', or just 'repo' for the authenticated user"
                }
            },
            "required": ["repo_name"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let repo_name = required_str(&args, "repo_name")?;
        let full_name = if repo_name.contains('/') {
            repo_name.to_string()
        } else {
            let login = try_api!(self.github.authenticated_login().await?);
            format!("{login}/{repo_name}")
        };

        let request = try_api!(self
            .github
            .request(reqwest::Method::DELETE, &format!("/repos/{full_name}")));
        try_api!(GitHubClient::send(request).await?);

        tracing::info!(repo = %full_name, "Repository deleted");
        Ok(ToolResult::json(&json!({
            "status": "success",
            "deleted": full_name,
            "message": "Repository permanently deleted",
        })))
    }
}

// ── list_repositories ───────────────────────────────────────────

pub struct ListRepositoriesTool {
    github: GitHubClient,
}

impl ListRepositoriesTool {
    pub fn new(github: GitHubClient) -> Self {
        Self { github }
    }
}

#[async_trait]
impl Tool for ListRepositoriesTool {
    fn name(&self) -> &str {
        "list_repositories"
    }

    fn description(&self) -> &str {
        "List GitHub repositories of a user, or of the authenticated user when no username is given"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "username": {
                    "type": "string",
                    "description": "GitHub username; omit for the authenticated user"
                },
                "repo_type": {
                    "type": "string",
                    "enum": ["owner", "all", "member", "public", "private"],
                    "default": "owner"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of repositories to return",
                    "default": 20
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(20);
        let per_page = limit.clamp(1, MAX_PER_PAGE).to_string();

        let request = match args
            .get("username")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
        {
            Some(username) => try_api!(self
                .github
                .request(reqwest::Method::GET, &format!("/users/{username}/repos")))
            .query(&[("per_page", per_page.as_str())]),
            None => {
                let repo_type = args
                    .get("repo_type")
                    .and_then(Value::as_str)
                    .unwrap_or("owner");
                try_api!(self.github.request(reqwest::Method::GET, "/user/repos"))
                    .query(&[("type", repo_type), ("per_page", per_page.as_str())])
            }
        };

        let response = try_api!(GitHubClient::send(request).await?);
        let repos: Vec<Repository> = response.json().await?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        let summaries: Vec<Value> = repos
            .into_iter()
            .take(limit)
            .map(|repo| {
                json!({
                    "name": repo.full_name,
                    "description": repo.description.unwrap_or_default(),
                    "language": repo.language.unwrap_or_default(),
                    "stars": repo.stargazers_count,
                    "forks": repo.forks_count,
                    "private": repo.private,
                    "url": repo.html_url,
                    "created_at": repo.created_at.get(..10).unwrap_or(&repo.created_at),
                })
            })
            .collect();

        Ok(ToolResult::json(&json!({
            "status": "success",
            "count": summaries.len(),
            "repos": summaries,
        })))
    }
}
