//! ghwatch - GitHub Repository and Organization Activity Monitor
//!
//! ghwatch periodically polls a configured set of GitHub repositories and
//! organizations and raises desktop notifications for new commits,
//! releases, and newly created organization repositories.
//!
//! ## Core Features
//!
//! - **Change detection**: last-known commit/release pointers per target,
//!   compared against live GitHub facts each check
//! - **Organization watching**: append-only record of known repositories,
//!   with commit/release sub-checks for a bounded set of members
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//! - **Authentication**: GitHub CLI and token-based authentication support
//! - **Notifications**: desktop and optional email channels, best-effort,
//!   never block monitoring
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and target definitions
//! - [`github`]: GitHub facts provider and authentication
//! - [`notify`]: Notification channels (desktop, email) and fan-out
//! - [`state`]: Persisted last-known state per target
//! - [`reconcile`]: Change detection against previous state
//! - [`batch`]: Sequential pass over all targets
//! - [`daemon`]: Periodic background execution

pub mod batch;
pub mod config;
pub mod daemon;
pub mod github;
pub mod notify;
pub mod reconcile;
pub mod state;

pub use batch::{BatchRunner, BatchSummary, PacingConfig};
pub use config::{Config, MonitorTarget};
pub use daemon::Daemon;
pub use github::{FactsProvider, FetchError, GitHubClient};
pub use notify::{build_notifier, Delivery, DesktopNotifier, EmailNotifier, MultiNotifier, Notifier};
pub use reconcile::{ChangeEvent, ReconcilePolicy, Reconciler};
pub use state::{MonitorState, StatePersist, StateStore};
