//! Batch Runner - one sequential pass over all configured targets
//!
//! Repository targets run first, then organizations, in configuration
//! order. Targets fail independently; the batch always runs to completion
//! and persists the state map exactly once at the end.

use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{MonitorConfig, MonitorTarget};
use crate::github::{FactsProvider, RateLimit};
use crate::notify::Notifier;
use crate::reconcile::{ReconcilePolicy, Reconciler};
use crate::state::{MonitorState, StatePersist};

/// Inter-request pacing between targets
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Pause after each repository target
    pub repository_delay: Duration,
    /// Pause after each organization target
    pub organization_delay: Duration,
    /// Pause between organization member sub-checks
    pub member_delay: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            repository_delay: Duration::from_millis(1000),
            organization_delay: Duration::from_millis(2000),
            member_delay: Duration::from_millis(500),
        }
    }
}

impl PacingConfig {
    pub fn from_monitor(config: &MonitorConfig) -> Self {
        Self {
            repository_delay: Duration::from_millis(config.repository_delay_ms),
            organization_delay: Duration::from_millis(config.organization_delay_ms),
            member_delay: Duration::from_millis(config.member_delay_ms),
        }
    }

    /// No delays at all, for tests
    pub fn none() -> Self {
        Self {
            repository_delay: Duration::ZERO,
            organization_delay: Duration::ZERO,
            member_delay: Duration::ZERO,
        }
    }
}

/// What one batch did
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub repositories_checked: usize,
    pub organizations_checked: usize,
    pub repositories_with_updates: usize,
    pub new_repositories: usize,
    pub organizations_with_new_repositories: usize,
    /// Per-target failures as (target key, message)
    pub failures: Vec<(String, String)>,
    pub rate_limit: Option<RateLimit>,
    pub state_persisted: bool,
    pub duration: Duration,
}

impl BatchSummary {
    pub fn error_count(&self) -> usize {
        self.failures.len()
    }
}

/// Runs batches over a facts provider, notifier and state store
pub struct BatchRunner<'a> {
    facts: &'a dyn FactsProvider,
    notifier: &'a dyn Notifier,
    store: &'a dyn StatePersist,
    pacing: PacingConfig,
    org_repo_check_limit: usize,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        facts: &'a dyn FactsProvider,
        notifier: &'a dyn Notifier,
        store: &'a dyn StatePersist,
        pacing: PacingConfig,
        org_repo_check_limit: usize,
    ) -> Self {
        Self {
            facts,
            notifier,
            store,
            pacing,
            org_repo_check_limit,
        }
    }

    /// Run one batch over `targets`, mutating `state` in memory and
    /// persisting it once at the end.
    pub async fn run(&self, targets: &[MonitorTarget], state: &mut MonitorState) -> BatchSummary {
        let started = Instant::now();
        let mut summary = BatchSummary::default();

        let repositories: Vec<_> = targets
            .iter()
            .filter_map(|t| match t {
                MonitorTarget::Repository(r) => Some(r),
                _ => None,
            })
            .collect();
        let organizations: Vec<_> = targets
            .iter()
            .filter_map(|t| match t {
                MonitorTarget::Organization(o) => Some(o),
                _ => None,
            })
            .collect();

        info!(
            "🔍 Starting monitor check: {} repositories, {} organizations",
            repositories.len(),
            organizations.len()
        );

        let policy = ReconcilePolicy {
            org_repo_check_limit: self.org_repo_check_limit,
            member_delay: self.pacing.member_delay,
        };
        let reconciler = Reconciler::new(self.facts, self.notifier, policy);

        for (index, target) in repositories.iter().enumerate() {
            let key = target.key();

            match reconciler
                .reconcile_repository(target, state.repository(&key))
                .await
            {
                Ok(outcome) => {
                    if outcome.has_updates() {
                        summary.repositories_with_updates += 1;
                    }
                    state.set_repository(key, outcome.state);
                }
                Err(e) => {
                    error!("Error checking repository {}: {}", key, e);
                    summary.failures.push((key, e.to_string()));
                }
            }
            summary.repositories_checked += 1;

            // No trailing delay after the last target of the group
            if index + 1 < repositories.len() && !self.pacing.repository_delay.is_zero() {
                tokio::time::sleep(self.pacing.repository_delay).await;
            }
        }

        for (index, target) in organizations.iter().enumerate() {
            let key = target.key();

            match reconciler
                .reconcile_organization(target, state.organization(&key), state)
                .await
            {
                Ok(outcome) => {
                    let new_repos = outcome.new_repositories();
                    summary.new_repositories += new_repos;
                    if new_repos > 0 {
                        summary.organizations_with_new_repositories += 1;
                    }
                    for (repo_key, repo_state) in outcome.repo_updates {
                        state.set_repository(repo_key, repo_state);
                    }
                    state.set_organization(key, outcome.state);
                }
                Err(e) => {
                    error!("Error checking organization {}: {}", target.org, e);
                    summary.failures.push((key, e.to_string()));
                }
            }
            summary.organizations_checked += 1;

            if index + 1 < organizations.len() && !self.pacing.organization_delay.is_zero() {
                tokio::time::sleep(self.pacing.organization_delay).await;
            }
        }

        // One save per batch, after all targets
        match self.store.save(state) {
            Ok(()) => summary.state_persisted = true,
            Err(e) => {
                error!("Failed to save state: {:#}", e);
                summary.state_persisted = false;
            }
        }

        match self.facts.rate_limit().await {
            Ok(rate) => {
                debug!(
                    "API rate limit: {}/{} remaining",
                    rate.remaining, rate.limit
                );
                if rate.remaining < 100 {
                    warn!(
                        "GitHub API rate limit is low: {} remaining, resets at epoch {}",
                        rate.remaining, rate.reset
                    );
                }
                summary.rate_limit = Some(rate);
            }
            Err(e) => {
                warn!("Could not check rate limit: {}", e);
            }
        }

        summary.duration = started.elapsed();
        info!(
            "📊 Monitor check completed in {:.2}s: {} updates, {} new repositories, {} errors",
            summary.duration.as_secs_f64(),
            summary.repositories_with_updates,
            summary.new_repositories,
            summary.error_count()
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_defaults() {
        let pacing = PacingConfig::default();
        assert_eq!(pacing.repository_delay, Duration::from_millis(1000));
        assert_eq!(pacing.organization_delay, Duration::from_millis(2000));
        assert_eq!(pacing.member_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_pacing_from_monitor_config() {
        let monitor = MonitorConfig {
            repository_delay_ms: 5,
            organization_delay_ms: 7,
            member_delay_ms: 3,
            ..MonitorConfig::default()
        };
        let pacing = PacingConfig::from_monitor(&monitor);
        assert_eq!(pacing.repository_delay, Duration::from_millis(5));
        assert_eq!(pacing.organization_delay, Duration::from_millis(7));
        assert_eq!(pacing.member_delay, Duration::from_millis(3));
    }

    #[test]
    fn test_pacing_none_is_zero() {
        let pacing = PacingConfig::none();
        assert!(pacing.repository_delay.is_zero());
        assert!(pacing.organization_delay.is_zero());
        assert!(pacing.member_delay.is_zero());
    }
}
