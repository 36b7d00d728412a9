//! State Management - persisted last-known pointers per monitored target
//!
//! This module provides persistent storage for:
//! - Repository state (last seen commit SHA, last seen release tag)
//! - Organization state (known repository ids, append-only)
//!
//! The state file is a single JSON document stored at
//! XDG_DATA_HOME/ghwatch/state.json, loaded once per run, mutated in
//! memory and written back once at the end of a batch.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Last-known pointers for one repository (standalone target or
/// organization member)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_release_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// One repository an organization is known to have
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownRepository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Append-only record of the repositories seen under an organization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationState {
    pub known_repositories: Vec<KnownRepository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

impl OrganizationState {
    pub fn knows(&self, id: u64) -> bool {
        self.known_repositories.iter().any(|r| r.id == id)
    }
}

/// State of one target keyed in the monitor state map.
///
/// Untagged on the wire. OrganizationState must stay first: its required
/// `known_repositories` field disambiguates it from RepositoryState, whose
/// fields are all optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetState {
    Organization(OrganizationState),
    Repository(RepositoryState),
}

/// Key for a repository entry, shared by standalone targets and
/// organization member sub-checks.
pub fn repo_key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner, repo)
}

/// Key for an organization entry
pub fn org_key(org: &str) -> String {
    format!("org:{}", org)
}

/// Complete persisted monitor state: a map from target key to target state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorState {
    pub entries: BTreeMap<String, TargetState>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repository(&self, key: &str) -> Option<&RepositoryState> {
        match self.entries.get(key) {
            Some(TargetState::Repository(state)) => Some(state),
            _ => None,
        }
    }

    pub fn organization(&self, key: &str) -> Option<&OrganizationState> {
        match self.entries.get(key) {
            Some(TargetState::Organization(state)) => Some(state),
            _ => None,
        }
    }

    pub fn set_repository(&mut self, key: String, state: RepositoryState) {
        self.entries.insert(key, TargetState::Repository(state));
    }

    pub fn set_organization(&mut self, key: String, state: OrganizationState) {
        self.entries.insert(key, TargetState::Organization(state));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Persistence seam for `MonitorState`.
///
/// The batch runner saves through this trait so tests can observe how
/// often a batch persists.
pub trait StatePersist: Send + Sync {
    fn save(&self, state: &MonitorState) -> Result<()>;
}

/// File-backed store for `MonitorState`
pub struct StateStore {
    path: PathBuf,
}

impl StatePersist for StateStore {
    fn save(&self, state: &MonitorState) -> Result<()> {
        StateStore::save(self, state)
    }
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default state file location: XDG_DATA_HOME/ghwatch/state.json
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().context("Could not determine data directory")?;
        Ok(data_dir.join("ghwatch").join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted state. A missing file is a normal first run and a
    /// corrupt file is discarded with a warning; both yield empty state.
    pub fn load(&self) -> MonitorState {
        if !self.path.exists() {
            debug!("State file {} does not exist, starting fresh", self.path.display());
            return MonitorState::new();
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(
                    "Could not read state file {}: {}. Starting with empty state.",
                    self.path.display(),
                    e
                );
                return MonitorState::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(state) => {
                let state: MonitorState = state;
                debug!(
                    "Loaded state for {} targets from {}",
                    state.len(),
                    self.path.display()
                );
                state
            }
            Err(e) => {
                warn!(
                    "State file {} is corrupt: {}. Starting with empty state.",
                    self.path.display(),
                    e
                );
                MonitorState::new()
            }
        }
    }

    /// Persist state atomically: write a temp file in the same directory,
    /// then rename over the target.
    pub fn save(&self, state: &MonitorState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write state file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace state file {}", self.path.display()))?;

        info!(
            "Saved state for {} targets to {}",
            state.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_repo_state() -> RepositoryState {
        RepositoryState {
            last_commit_sha: Some("aaa111".to_string()),
            last_release_tag: Some("v1.0.0".to_string()),
            last_check: Some(Utc::now()),
        }
    }

    fn sample_org_state() -> OrganizationState {
        OrganizationState {
            known_repositories: vec![
                KnownRepository {
                    id: 1,
                    name: "widget".to_string(),
                    full_name: "acme/widget".to_string(),
                    created_at: None,
                },
                KnownRepository {
                    id: 2,
                    name: "gadget".to_string(),
                    full_name: "acme/gadget".to_string(),
                    created_at: None,
                },
            ],
            last_check: None,
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(repo_key("acme", "widget"), "acme/widget");
        assert_eq!(org_key("acme"), "org:acme");
    }

    #[test]
    fn test_accessors_respect_entry_kind() {
        let mut state = MonitorState::new();
        state.set_repository(repo_key("acme", "widget"), sample_repo_state());
        state.set_organization(org_key("acme"), sample_org_state());

        assert!(state.repository("acme/widget").is_some());
        assert!(state.organization("org:acme").is_some());
        // Wrong kind for the key yields None
        assert!(state.repository("org:acme").is_none());
        assert!(state.organization("acme/widget").is_none());
    }

    #[test]
    fn test_knows_by_id() {
        let org = sample_org_state();
        assert!(org.knows(1));
        assert!(org.knows(2));
        assert!(!org.knows(3));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let mut state = MonitorState::new();
        state.set_repository(repo_key("acme", "widget"), sample_repo_state());
        state.set_organization(org_key("acme"), sample_org_state());

        store.save(&state).unwrap();
        let loaded = store.load();

        assert_eq!(loaded, state);
        assert!(matches!(
            loaded.entries.get("acme/widget"),
            Some(TargetState::Repository(_))
        ));
        assert!(matches!(
            loaded.entries.get("org:acme"),
            Some(TargetState::Organization(_))
        ));
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nope.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let store = StateStore::new(path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_untagged_resolution_prefers_org_when_known_repos_present() {
        let json = r#"{
            "org:acme": {"known_repositories": [], "last_check": null},
            "acme/widget": {"last_commit_sha": "aaa111"}
        }"#;

        let state: MonitorState = serde_json::from_str(json).unwrap();
        assert!(state.organization("org:acme").is_some());
        let repo = state.repository("acme/widget").unwrap();
        assert_eq!(repo.last_commit_sha.as_deref(), Some("aaa111"));
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("deep").join("nested").join("state.json"));
        store.save(&MonitorState::new()).unwrap();
        assert!(store.path().exists());
    }
}
