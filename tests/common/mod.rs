/// Common test utilities: in-memory facts provider and recording notifier

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use ghwatch::github::{
    CommitInfo, FactsProvider, FetchError, OrgInfo, RateLimit, ReleaseInfo, RepoInfo, RepoSummary,
};
use ghwatch::notify::{Delivery, Notifier};

pub fn repo_info(owner: &str, repo: &str, default_branch: &str) -> RepoInfo {
    RepoInfo {
        id: 0,
        name: repo.to_string(),
        full_name: format!("{}/{}", owner, repo),
        description: None,
        stars: 0,
        forks: 0,
        language: Some("Rust".to_string()),
        default_branch: default_branch.to_string(),
        url: format!("https://github.com/{}/{}", owner, repo),
    }
}

pub fn commit(sha: &str, branch: &str) -> CommitInfo {
    CommitInfo {
        sha: sha.to_string(),
        message: format!("commit {}", sha),
        author: "dev".to_string(),
        date: None,
        url: format!("https://example.com/commit/{}", sha),
        branch: branch.to_string(),
    }
}

pub fn release(tag: &str) -> ReleaseInfo {
    ReleaseInfo {
        tag: tag.to_string(),
        name: None,
        body: None,
        author: "dev".to_string(),
        published_at: None,
        url: format!("https://example.com/releases/{}", tag),
        prerelease: false,
        draft: false,
    }
}

pub fn org_info(login: &str) -> OrgInfo {
    OrgInfo {
        login: login.to_string(),
        name: None,
        description: None,
        url: format!("https://github.com/{}", login),
        public_repos: 0,
    }
}

pub fn repo_summary(id: u64, owner: &str, repo: &str) -> RepoSummary {
    RepoSummary {
        id,
        name: repo.to_string(),
        full_name: format!("{}/{}", owner, repo),
        description: None,
        language: None,
        created_at: None::<DateTime<Utc>>,
        url: format!("https://github.com/{}/{}", owner, repo),
        fork: false,
    }
}

fn key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner, repo)
}

/// In-memory facts provider. Unknown repositories, branches and
/// organizations report NotFound; resources listed in `failures` report a
/// transient API error. Every fetch is appended to `calls`.
#[derive(Default)]
pub struct MockFacts {
    repos: HashMap<String, RepoInfo>,
    commits: HashMap<(String, String), CommitInfo>,
    empty_branches: HashSet<(String, String)>,
    releases: HashMap<String, ReleaseInfo>,
    orgs: HashMap<String, OrgInfo>,
    org_repos: HashMap<String, Vec<RepoSummary>>,
    failures: HashSet<String>,
    rate: Option<RateLimit>,
    pub calls: Mutex<Vec<String>>,
}

impl MockFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, owner: &str, repo: &str, default_branch: &str) -> Self {
        self.repos
            .insert(key(owner, repo), repo_info(owner, repo, default_branch));
        self
    }

    pub fn with_commit(mut self, owner: &str, repo: &str, branch: &str, sha: &str) -> Self {
        self.commits
            .insert((key(owner, repo), branch.to_string()), commit(sha, branch));
        self
    }

    /// Branch exists but has no commits
    pub fn with_empty_branch(mut self, owner: &str, repo: &str, branch: &str) -> Self {
        self.empty_branches
            .insert((key(owner, repo), branch.to_string()));
        self
    }

    pub fn with_release(mut self, owner: &str, repo: &str, tag: &str) -> Self {
        self.releases.insert(key(owner, repo), release(tag));
        self
    }

    pub fn with_org(mut self, org: &str) -> Self {
        self.orgs.insert(org.to_string(), org_info(org));
        self.org_repos.entry(org.to_string()).or_default();
        self
    }

    pub fn with_org_repo(mut self, org: &str, summary: RepoSummary) -> Self {
        self.org_repos
            .entry(org.to_string())
            .or_default()
            .push(summary);
        self
    }

    /// Make all fetches for `owner/repo` fail transiently
    pub fn fail_repository(mut self, owner: &str, repo: &str) -> Self {
        self.failures.insert(format!("repo:{}", key(owner, repo)));
        self
    }

    /// Make all fetches for `org` fail transiently
    pub fn fail_organization(mut self, org: &str) -> Self {
        self.failures.insert(format!("org:{}", org));
        self
    }

    pub fn with_rate_limit(mut self, limit: u64, remaining: u64) -> Self {
        self.rate = Some(RateLimit {
            limit,
            remaining,
            reset: 0,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl FactsProvider for MockFacts {
    async fn repository_info(&self, owner: &str, repo: &str) -> Result<RepoInfo, FetchError> {
        let key = key(owner, repo);
        self.record(format!("repository_info:{}", key));

        if self.failures.contains(&format!("repo:{}", key)) {
            return Err(FetchError::api(&key, "simulated API failure"));
        }
        self.repos
            .get(&key)
            .cloned()
            .ok_or(FetchError::NotFound(key))
    }

    async fn latest_commit(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<CommitInfo>, FetchError> {
        let key = key(owner, repo);
        self.record(format!("latest_commit:{}@{}", key, branch));

        if self.failures.contains(&format!("repo:{}", key)) {
            return Err(FetchError::api(&key, "simulated API failure"));
        }
        if self
            .empty_branches
            .contains(&(key.clone(), branch.to_string()))
        {
            return Ok(None);
        }
        match self.commits.get(&(key.clone(), branch.to_string())) {
            Some(commit) => Ok(Some(commit.clone())),
            None => Err(FetchError::NotFound(format!(
                "branch {} of {}",
                branch, key
            ))),
        }
    }

    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<ReleaseInfo>, FetchError> {
        let key = key(owner, repo);
        self.record(format!("latest_release:{}", key));

        if self.failures.contains(&format!("repo:{}", key)) {
            return Err(FetchError::api(&key, "simulated API failure"));
        }
        Ok(self.releases.get(&key).cloned())
    }

    async fn organization_info(&self, org: &str) -> Result<OrgInfo, FetchError> {
        self.record(format!("organization_info:{}", org));

        if self.failures.contains(&format!("org:{}", org)) {
            return Err(FetchError::api(org, "simulated API failure"));
        }
        self.orgs
            .get(org)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("organization {}", org)))
    }

    async fn organization_repositories(
        &self,
        org: &str,
        exclude_forks: bool,
    ) -> Result<Vec<RepoSummary>, FetchError> {
        self.record(format!("organization_repositories:{}", org));

        if self.failures.contains(&format!("org:{}", org)) {
            return Err(FetchError::api(org, "simulated API failure"));
        }
        let repos = self
            .org_repos
            .get(org)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("organization {}", org)))?;
        Ok(repos
            .into_iter()
            .filter(|r| !exclude_forks || !r.fork)
            .collect())
    }

    async fn rate_limit(&self) -> Result<RateLimit, FetchError> {
        self.record("rate_limit".to_string());
        Ok(self.rate.unwrap_or(RateLimit {
            limit: 5000,
            remaining: 4500,
            reset: 0,
        }))
    }
}

/// Notifier that records every notification instead of showing anything
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    pub notifications: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose deliveries always fail
    pub fn failing() -> Self {
        Self {
            fail: true,
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }

    fn record(&self, entry: String) -> Delivery {
        self.notifications.lock().unwrap().push(entry);
        if self.fail {
            Delivery::failed("simulated delivery failure")
        } else {
            Delivery::sent()
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn test_connection(&self) -> bool {
        !self.fail
    }

    async fn notify_commit(&self, repo: &RepoInfo, commit: &CommitInfo) -> Delivery {
        self.record(format!("commit:{}:{}", repo.full_name, commit.sha))
    }

    async fn notify_release(&self, repo: &RepoInfo, release: &ReleaseInfo) -> Delivery {
        self.record(format!("release:{}:{}", repo.full_name, release.tag))
    }

    async fn notify_new_repository(&self, org: &OrgInfo, repo: &RepoSummary) -> Delivery {
        self.record(format!("new_repo:{}:{}", org.login, repo.full_name))
    }

    async fn notify_test(&self) -> Delivery {
        self.record("test".to_string())
    }
}
