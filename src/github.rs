//! GitHub Facts Provider - point-in-time facts about repositories and organizations
//!
//! Wraps octocrab with the authentication detection ghwatch supports
//! (GitHub CLI token or GITHUB_TOKEN) and exposes the narrow set of
//! read-only facts the reconciler consumes: latest commit, latest release,
//! repository/organization metadata, organization repository listings and
//! rate-limit status.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Errors from fact fetching.
///
/// NotFound is an expected absence (missing branch, empty repository,
/// unknown organization) and drives control flow in the reconciler; Api is
/// a transient network/API failure that aborts the current target only.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("request for {resource} failed: {message}")]
    Api { resource: String, message: String },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }

    pub fn api(resource: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Api {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Latest commit on a branch
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
    pub url: String,
    pub branch: String,
}

impl CommitInfo {
    /// Abbreviated SHA for display
    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(7)]
    }
}

/// Latest published release of a repository
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseInfo {
    pub tag: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub author: String,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
    pub prerelease: bool,
    pub draft: bool,
}

/// Repository metadata used for display and default-branch fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "stargazers_count", default)]
    pub stars: u64,
    #[serde(rename = "forks_count", default)]
    pub forks: u64,
    #[serde(default)]
    pub language: Option<String>,
    pub default_branch: String,
    #[serde(rename = "html_url")]
    pub url: String,
}

/// Organization metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgInfo {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "html_url")]
    pub url: String,
    #[serde(default)]
    pub public_repos: u64,
}

impl OrgInfo {
    /// Display name, falling back to the login
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.login)
    }
}

/// One entry of an organization repository listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "html_url")]
    pub url: String,
    #[serde(default)]
    pub fork: bool,
}

impl RepoSummary {
    /// Split `full_name` into (owner, repo)
    pub fn owner_and_repo(&self) -> Option<(&str, &str)> {
        self.full_name.split_once('/')
    }
}

/// Current API quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

/// Read-only facts interface consumed by the reconciler and batch runner.
///
/// Implementations must paginate listings internally; callers never see
/// page boundaries.
#[async_trait]
pub trait FactsProvider: Send + Sync {
    async fn repository_info(&self, owner: &str, repo: &str) -> Result<RepoInfo, FetchError>;

    /// Latest commit on the given branch, or None when the branch exists
    /// but has no commits.
    async fn latest_commit(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<CommitInfo>, FetchError>;

    /// Latest release, or None when the repository has never released.
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<ReleaseInfo>, FetchError>;

    async fn organization_info(&self, org: &str) -> Result<OrgInfo, FetchError>;

    /// Full public repository listing of an organization, newest-created
    /// first.
    async fn organization_repositories(
        &self,
        org: &str,
        exclude_forks: bool,
    ) -> Result<Vec<RepoSummary>, FetchError>;

    async fn rate_limit(&self) -> Result<RateLimit, FetchError>;
}

// Wire shapes for the endpoints octocrab has no convenient models for.

#[derive(Debug, Deserialize)]
struct RawCommit {
    sha: String,
    html_url: String,
    commit: RawCommitDetail,
}

#[derive(Debug, Deserialize)]
struct RawCommitDetail {
    message: String,
    #[serde(default)]
    author: Option<RawGitActor>,
}

#[derive(Debug, Deserialize)]
struct RawGitActor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawRelease {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    author: Option<RawLogin>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    html_url: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
}

#[derive(Debug, Deserialize)]
struct RawLogin {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawRateLimit {
    rate: RawRate,
}

#[derive(Debug, Deserialize)]
struct RawRate {
    limit: u64,
    remaining: u64,
    reset: u64,
}

/// GitHub client wrapper with authentication management
pub struct GitHubClient {
    client: octocrab::Octocrab,
    username: String,
}

/// GitHub authentication strategies
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
}

impl GitHubClient {
    /// Create a new GitHub client with automatic authentication
    pub async fn new(config: &Config) -> Result<Self> {
        let (auth_strategy, token) = Self::detect_authentication(config)?;

        info!("Using authentication strategy: {:?}", auth_strategy);

        let client = octocrab::Octocrab::builder()
            .personal_token(token)
            .build()
            .context("Failed to create GitHub client")?;

        // Get authenticated user information
        let user = client
            .current()
            .user()
            .await
            .context("Failed to get current user information. Check your authentication.")?;

        let username = config
            .github
            .username
            .clone()
            .unwrap_or_else(|| user.login.clone());

        info!("Authenticated as GitHub user: {}", username);

        Ok(Self { client, username })
    }

    /// Detect and obtain GitHub authentication
    fn detect_authentication(config: &Config) -> Result<(AuthStrategy, String)> {
        match config.github.auth_method.as_str() {
            "auto" => {
                // Try GitHub CLI first, then environment token
                if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCLI, token))
                } else if let Ok(token) = Self::try_environment_token() {
                    Ok((AuthStrategy::EnvironmentToken, token))
                } else {
                    Err(anyhow!(
                        "No GitHub authentication found. Please either:\n\
                         1. Install and authenticate GitHub CLI: gh auth login\n\
                         2. Set GITHUB_TOKEN environment variable\n\
                         3. Run: ghwatch auth setup"
                    ))
                }
            }
            "gh_cli" => {
                let token = Self::try_github_cli()
                    .context("GitHub CLI authentication failed. Run: gh auth login")?;
                Ok((AuthStrategy::GitHubCLI, token))
            }
            "token" => {
                let token = Self::try_environment_token()
                    .context("GITHUB_TOKEN environment variable not found or invalid")?;
                Ok((AuthStrategy::EnvironmentToken, token))
            }
            other => Err(anyhow!("Unknown auth method: {}", other)),
        }
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        if !Self::is_command_available("gh") {
            return Err(anyhow!("GitHub CLI (gh) is not installed"));
        }

        let auth_status = Command::new("gh")
            .args(["auth", "status"])
            .output()
            .context("Failed to check GitHub CLI auth status")?;

        if !auth_status.status.success() {
            return Err(anyhow!(
                "GitHub CLI is not authenticated. Run: gh auth login"
            ));
        }

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("Failed to get GitHub CLI token")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "Failed to retrieve token from GitHub CLI: {}",
                String::from_utf8_lossy(&token_output.stderr)
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        debug!("Successfully obtained token from GitHub CLI");
        Ok(token)
    }

    /// Try to get token from environment variable
    fn try_environment_token() -> Result<String> {
        debug!("Attempting environment variable authentication");

        let token =
            env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

        if token.is_empty() {
            return Err(anyhow!("GITHUB_TOKEN is empty"));
        }

        if !token.starts_with("ghp_") && !token.starts_with("gho_") && !token.starts_with("ghs_") {
            warn!("GITHUB_TOKEN doesn't look like a valid GitHub token (should start with ghp_, gho_, or ghs_)");
        }

        debug!("Successfully found GITHUB_TOKEN environment variable");
        Ok(token)
    }

    /// Check if a command is available in PATH
    fn is_command_available(command: &str) -> bool {
        Command::new("which")
            .arg(command)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Get the authenticated username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Classify an octocrab error. 404 (missing resource) and 409 (empty
    /// repository) are expected absences, everything else is transient.
    fn classify(resource: &str, err: octocrab::Error) -> FetchError {
        if let octocrab::Error::GitHub { source, .. } = &err {
            let status = source.status_code.as_u16();
            if status == 404 || status == 409 {
                return FetchError::NotFound(resource.to_string());
            }
        }
        FetchError::api(resource, err.to_string())
    }
}

#[async_trait]
impl FactsProvider for GitHubClient {
    async fn repository_info(&self, owner: &str, repo: &str) -> Result<RepoInfo, FetchError> {
        let resource = format!("repository {}/{}", owner, repo);
        debug!("Fetching repository info for {}/{}", owner, repo);

        let info: RepoInfo = self
            .client
            .get(format!("/repos/{}/{}", owner, repo), None::<&()>)
            .await
            .map_err(|e| Self::classify(&resource, e))?;

        Ok(info)
    }

    async fn latest_commit(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<CommitInfo>, FetchError> {
        let resource = format!("branch {} of {}/{}", branch, owner, repo);
        debug!("Fetching latest commit on {}/{}@{}", owner, repo, branch);

        let commits: Vec<RawCommit> = self
            .client
            .get(
                format!("/repos/{}/{}/commits", owner, repo),
                Some(&[("sha", branch), ("per_page", "1")]),
            )
            .await
            .map_err(|e| Self::classify(&resource, e))?;

        let Some(raw) = commits.into_iter().next() else {
            return Ok(None);
        };

        let (author, date) = match raw.commit.author {
            Some(actor) => (
                actor.name.unwrap_or_else(|| "unknown".to_string()),
                actor.date,
            ),
            None => ("unknown".to_string(), None),
        };

        Ok(Some(CommitInfo {
            sha: raw.sha,
            message: raw.commit.message,
            author,
            date,
            url: raw.html_url,
            branch: branch.to_string(),
        }))
    }

    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<ReleaseInfo>, FetchError> {
        let resource = format!("latest release of {}/{}", owner, repo);
        debug!("Fetching latest release for {}/{}", owner, repo);

        let raw: RawRelease = match self
            .client
            .get(
                format!("/repos/{}/{}/releases/latest", owner, repo),
                None::<&()>,
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                let classified = Self::classify(&resource, e);
                // A repository without releases is an expected state
                if classified.is_not_found() {
                    return Ok(None);
                }
                return Err(classified);
            }
        };

        Ok(Some(ReleaseInfo {
            tag: raw.tag_name,
            name: raw.name,
            body: raw.body,
            author: raw
                .author
                .map(|a| a.login)
                .unwrap_or_else(|| "unknown".to_string()),
            published_at: raw.published_at,
            url: raw.html_url,
            prerelease: raw.prerelease,
            draft: raw.draft,
        }))
    }

    async fn organization_info(&self, org: &str) -> Result<OrgInfo, FetchError> {
        let resource = format!("organization {}", org);
        debug!("Fetching organization info for {}", org);

        let info: OrgInfo = self
            .client
            .get(format!("/orgs/{}", org), None::<&()>)
            .await
            .map_err(|e| Self::classify(&resource, e))?;

        Ok(info)
    }

    async fn organization_repositories(
        &self,
        org: &str,
        exclude_forks: bool,
    ) -> Result<Vec<RepoSummary>, FetchError> {
        let resource = format!("repositories of organization {}", org);
        debug!("Fetching repository listing for organization {}", org);

        let per_page = 100usize;
        let mut repositories = Vec::new();
        let mut page = 1u32;

        loop {
            let page_param = page.to_string();
            let per_page_param = per_page.to_string();
            let batch: Vec<RepoSummary> = self
                .client
                .get(
                    format!("/orgs/{}/repos", org),
                    Some(&[
                        ("type", "public"),
                        ("sort", "created"),
                        ("direction", "desc"),
                        ("per_page", per_page_param.as_str()),
                        ("page", page_param.as_str()),
                    ]),
                )
                .await
                .map_err(|e| Self::classify(&resource, e))?;

            let fetched = batch.len();
            repositories.extend(batch.into_iter().filter(|r| !exclude_forks || !r.fork));

            if fetched < per_page {
                break;
            }
            page += 1;
        }

        info!(
            "Found {} repositories for organization: {}",
            repositories.len(),
            org
        );
        Ok(repositories)
    }

    async fn rate_limit(&self) -> Result<RateLimit, FetchError> {
        let raw: RawRateLimit = self
            .client
            .get("/rate_limit", None::<&()>)
            .await
            .map_err(|e| Self::classify("rate limit", e))?;

        Ok(RateLimit {
            limit: raw.rate.limit,
            remaining: raw.rate.remaining,
            reset: raw.rate.reset,
        })
    }
}

/// Utility functions for GitHub authentication setup
pub mod auth_setup {
    use super::*;

    /// Interactive authentication setup guide
    pub async fn setup_authentication() -> Result<()> {
        println!("🔧 ghwatch Authentication Setup");
        println!();

        // Check if gh CLI is available
        if Command::new("which").arg("gh").output()?.status.success() {
            println!("✅ GitHub CLI (gh) is installed");

            if Command::new("gh")
                .args(["auth", "status"])
                .output()?
                .status
                .success()
            {
                println!("✅ GitHub CLI is already authenticated");
                return Ok(());
            } else {
                println!("🔄 GitHub CLI needs authentication");
                println!("Run: gh auth login");
                return Ok(());
            }
        }

        println!("❌ GitHub CLI (gh) is not installed");
        println!();
        println!("Recommended setup:");
        println!("1. Install GitHub CLI:");

        #[cfg(target_os = "macos")]
        println!("   brew install gh");

        #[cfg(target_os = "linux")]
        println!("   See: https://github.com/cli/cli/blob/trunk/docs/install_linux.md");

        #[cfg(target_os = "windows")]
        println!("   winget install --id GitHub.cli");

        println!();
        println!("2. Authenticate:");
        println!("   gh auth login");
        println!();
        println!("Alternative: Set GITHUB_TOKEN environment variable");
        println!("   export GITHUB_TOKEN=your_token_here");

        Ok(())
    }

    /// Test current authentication
    pub async fn test_authentication(config: &Config) -> Result<()> {
        println!("🔍 Testing GitHub authentication...");

        match GitHubClient::new(config).await {
            Ok(client) => {
                println!("✅ Authentication successful");
                println!("   Username: {}", client.username());

                match client.rate_limit().await {
                    Ok(rate) => {
                        println!("   API quota: {}/{} remaining", rate.remaining, rate.limit);
                    }
                    Err(e) => {
                        println!("⚠️  Could not check rate limit: {}", e);
                    }
                }
            }
            Err(e) => {
                println!("❌ Authentication failed: {}", e);
                println!();
                println!("To fix this, run: ghwatch auth setup");
            }
        }

        Ok(())
    }
}
