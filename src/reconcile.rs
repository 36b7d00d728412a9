//! Reconciliation - compare live GitHub facts against last-known state
//!
//! The reconcilers are the core of ghwatch. Each takes the previous state
//! of one target (if any) plus live facts and produces a new state value
//! and the change events detected along the way. They never mutate shared
//! state; the batch runner owns the state map and applies the returned
//! values.
//!
//! First observation of any pointer establishes a baseline silently. A
//! change event fires only when a previously recorded pointer differs from
//! the live value, and the recorded pointer always moves to the live value
//! whether or not an event fired.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{OrganizationTarget, RepositoryTarget};
use crate::github::{
    CommitInfo, FactsProvider, FetchError, OrgInfo, ReleaseInfo, RepoInfo, RepoSummary,
};
use crate::notify::Notifier;
use crate::state::{
    repo_key, KnownRepository, MonitorState, OrganizationState, RepositoryState,
};

/// A detected change on a monitored target
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Commit {
        repo: RepoInfo,
        commit: CommitInfo,
    },
    Release {
        repo: RepoInfo,
        release: ReleaseInfo,
    },
    NewRepository {
        org: OrgInfo,
        repo: RepoSummary,
    },
}

impl ChangeEvent {
    /// Short human-readable description for logs
    pub fn describe(&self) -> String {
        match self {
            ChangeEvent::Commit { repo, commit } => {
                format!("new commit {} in {}", commit.short_sha(), repo.full_name)
            }
            ChangeEvent::Release { repo, release } => {
                format!("new release {} in {}", release.tag, repo.full_name)
            }
            ChangeEvent::NewRepository { org, repo } => {
                format!("new repository {} in {}", repo.full_name, org.login)
            }
        }
    }
}

/// Tunables for organization member sub-checks
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// How many known repositories of an organization get commit/release
    /// sub-checks per batch, oldest-known first.
    pub org_repo_check_limit: usize,
    /// Pause between member sub-checks.
    pub member_delay: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            org_repo_check_limit: 10,
            member_delay: Duration::from_millis(500),
        }
    }
}

/// Result of reconciling one repository
#[derive(Debug)]
pub struct RepoOutcome {
    pub state: RepositoryState,
    pub events: Vec<ChangeEvent>,
}

impl RepoOutcome {
    pub fn has_updates(&self) -> bool {
        !self.events.is_empty()
    }
}

/// Result of reconciling one organization
#[derive(Debug)]
pub struct OrgOutcome {
    pub state: OrganizationState,
    /// Updated per-repository states produced by member sub-checks, keyed
    /// like standalone repository targets.
    pub repo_updates: Vec<(String, RepositoryState)>,
    pub events: Vec<ChangeEvent>,
}

impl OrgOutcome {
    pub fn new_repositories(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ChangeEvent::NewRepository { .. }))
            .count()
    }
}

/// Stateless reconciliation engine over a facts provider and a notifier
pub struct Reconciler<'a> {
    facts: &'a dyn FactsProvider,
    notifier: &'a dyn Notifier,
    policy: ReconcilePolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        facts: &'a dyn FactsProvider,
        notifier: &'a dyn Notifier,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            facts,
            notifier,
            policy,
        }
    }

    /// Check one repository target against its previous state.
    ///
    /// Errors abort this target only; the caller records them and moves on.
    pub async fn reconcile_repository(
        &self,
        target: &RepositoryTarget,
        previous: Option<&RepositoryState>,
    ) -> Result<RepoOutcome, FetchError> {
        let key = target.key();
        debug!("Checking repository: {}", key);

        let repo_info = self
            .facts
            .repository_info(&target.owner, &target.repo)
            .await?;

        let mut state = previous.cloned().unwrap_or_default();
        let mut events = Vec::new();

        if target.watch_commits {
            let latest = self
                .fetch_latest_commit(target, &repo_info.default_branch)
                .await?;

            if let Some(commit) = latest {
                let changed = match &state.last_commit_sha {
                    Some(known) => known != &commit.sha,
                    // First observation establishes the baseline silently
                    None => false,
                };

                if changed {
                    info!("📝 New commit found in {}: {}", key, commit.short_sha());
                    let delivery = self.notifier.notify_commit(&repo_info, &commit).await;
                    if delivery.success {
                        info!("Commit notification sent for {}", key);
                    } else {
                        error!(
                            "Failed to send commit notification for {}: {}",
                            key,
                            delivery.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    events.push(ChangeEvent::Commit {
                        repo: repo_info.clone(),
                        commit: commit.clone(),
                    });
                }

                // Pointer always moves to the live value
                state.last_commit_sha = Some(commit.sha);
            }
        }

        if target.watch_releases {
            let latest = self
                .facts
                .latest_release(&target.owner, &target.repo)
                .await?;

            // None means no releases yet; the recorded tag stays put
            if let Some(release) = latest {
                let changed = match &state.last_release_tag {
                    Some(known) => known != &release.tag,
                    None => false,
                };

                if changed {
                    info!("🎉 New release found in {}: {}", key, release.tag);
                    let delivery = self.notifier.notify_release(&repo_info, &release).await;
                    if delivery.success {
                        info!("Release notification sent for {}", key);
                    } else {
                        error!(
                            "Failed to send release notification for {}: {}",
                            key,
                            delivery.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    events.push(ChangeEvent::Release {
                        repo: repo_info.clone(),
                        release: release.clone(),
                    });
                }

                state.last_release_tag = Some(release.tag);
            }
        }

        state.last_check = Some(Utc::now());

        if events.is_empty() && state.last_commit_sha.is_some() {
            debug!("No new updates for {}", key);
        }

        Ok(RepoOutcome { state, events })
    }

    /// Resolve the branch to query and fetch its latest commit.
    ///
    /// A missing "main" falls back to "master" once; a missing "master"
    /// after that fallback means an empty repository. A missing branch the
    /// user configured explicitly is the target's error.
    async fn fetch_latest_commit(
        &self,
        target: &RepositoryTarget,
        default_branch: &str,
    ) -> Result<Option<CommitInfo>, FetchError> {
        let branch = target.branch.as_deref().unwrap_or(default_branch);

        match self
            .facts
            .latest_commit(&target.owner, &target.repo, branch)
            .await
        {
            Ok(commit) => Ok(commit),
            Err(e) if e.is_not_found() && branch == "main" => {
                debug!(
                    "Branch main not found for {}/{}, trying master",
                    target.owner, target.repo
                );
                match self
                    .facts
                    .latest_commit(&target.owner, &target.repo, "master")
                    .await
                {
                    Ok(commit) => Ok(commit),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) if e.is_not_found() && target.branch.is_none() => {
                // Default branch with no commits, an empty repository
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Check one organization target against its previous state.
    ///
    /// `repo_states` supplies the previous per-repository states for member
    /// sub-checks; updates come back in the outcome rather than being
    /// applied here.
    pub async fn reconcile_organization(
        &self,
        target: &OrganizationTarget,
        previous: Option<&OrganizationState>,
        repo_states: &MonitorState,
    ) -> Result<OrgOutcome, FetchError> {
        debug!("Checking organization: {}", target.org);

        let org_info = self.facts.organization_info(&target.org).await?;
        let live = self
            .facts
            .organization_repositories(&target.org, target.exclude_forks)
            .await?;

        let mut state = previous.cloned().unwrap_or_default();
        let mut events = Vec::new();

        // The first listing establishes the baseline silently
        let established = !state.known_repositories.is_empty();

        for repo in &live {
            if state.knows(repo.id) {
                continue;
            }

            if target.watch_new_repos && established {
                info!(
                    "🆕 New repository found in {}: {}",
                    target.org, repo.full_name
                );
                let delivery = self.notifier.notify_new_repository(&org_info, repo).await;
                if delivery.success {
                    info!("New repository notification sent for {}", repo.full_name);
                } else {
                    error!(
                        "Failed to send new repository notification for {}: {}",
                        repo.full_name,
                        delivery.error.as_deref().unwrap_or("unknown error")
                    );
                }
                events.push(ChangeEvent::NewRepository {
                    org: org_info.clone(),
                    repo: repo.clone(),
                });
            }

            // Known repositories are append-only, keyed by immutable id
            state.known_repositories.push(KnownRepository {
                id: repo.id,
                name: repo.name.clone(),
                full_name: repo.full_name.clone(),
                created_at: repo.created_at,
            });
        }

        let mut repo_updates = Vec::new();

        if target.watch_commits || target.watch_releases {
            let members: Vec<KnownRepository> = state
                .known_repositories
                .iter()
                .take(self.policy.org_repo_check_limit)
                .cloned()
                .collect();

            for known in members {
                // Absent from the live listing means deleted or filtered
                let Some(summary) = live.iter().find(|r| r.id == known.id) else {
                    debug!(
                        "Skipping {}: no longer in the listing of {}",
                        known.full_name, target.org
                    );
                    continue;
                };

                let Some((owner, repo)) = summary.owner_and_repo() else {
                    warn!("Malformed repository name: {}", summary.full_name);
                    continue;
                };

                let member_target = RepositoryTarget {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    branch: None,
                    watch_commits: target.watch_commits,
                    watch_releases: target.watch_releases,
                    description: None,
                };

                let key = repo_key(owner, repo);
                match self
                    .reconcile_repository(&member_target, repo_states.repository(&key))
                    .await
                {
                    Ok(outcome) => {
                        events.extend(outcome.events);
                        repo_updates.push((key, outcome.state));
                    }
                    Err(e) => {
                        warn!(
                            "Failed to check repository {} in organization {}: {}",
                            known.full_name, target.org, e
                        );
                    }
                }

                if !self.policy.member_delay.is_zero() {
                    tokio::time::sleep(self.policy.member_delay).await;
                }
            }
        }

        state.last_check = Some(Utc::now());

        let new_repos = events
            .iter()
            .filter(|e| matches!(e, ChangeEvent::NewRepository { .. }))
            .count();
        if new_repos == 0 && established {
            debug!("No new repositories for organization {}", target.org);
        }

        Ok(OrgOutcome {
            state,
            repo_updates,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = ReconcilePolicy::default();
        assert_eq!(policy.org_repo_check_limit, 10);
        assert_eq!(policy.member_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_event_description() {
        let event = ChangeEvent::Commit {
            repo: RepoInfo {
                id: 1,
                name: "widget".to_string(),
                full_name: "acme/widget".to_string(),
                description: None,
                stars: 0,
                forks: 0,
                language: None,
                default_branch: "main".to_string(),
                url: "https://github.com/acme/widget".to_string(),
            },
            commit: CommitInfo {
                sha: "bbb222333444".to_string(),
                message: "fix".to_string(),
                author: "dev".to_string(),
                date: None,
                url: String::new(),
                branch: "main".to_string(),
            },
        };
        assert_eq!(event.describe(), "new commit bbb2223 in acme/widget");
    }
}
