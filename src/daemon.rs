//! Daemon Infrastructure - background service for periodic monitoring
//!
//! Runs one batch immediately on startup, then one per configured
//! interval. Batches run to completion inside the loop body, so two
//! batches never overlap. Includes PID file management, graceful shutdown
//! on Ctrl+C/SIGTERM and Unix daemonization.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchRunner, BatchSummary, PacingConfig};
use crate::config::Config;
use crate::github::GitHubClient;
use crate::notify::{build_notifier, MultiNotifier};
use crate::state::{MonitorState, StateStore};

/// Daemon state and control
pub struct Daemon {
    config: Arc<Config>,
    facts: GitHubClient,
    notifier: MultiNotifier,
    store: StateStore,
    shutdown_sender: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    total_batches: AtomicU64,
    failed_batches: AtomicU64,
    pid_file_path: Option<PathBuf>,
}

/// Daemon statistics and status
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub uptime: Duration,
    pub total_batches: u64,
    pub failed_batches: u64,
    pub next_check_in: Option<Duration>,
}

impl Daemon {
    /// Create a new daemon instance
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let facts = GitHubClient::new(&config)
            .await
            .context("Failed to create GitHub client for daemon")?;
        let notifier = build_notifier(&config.notification)
            .context("Failed to set up notification channels")?;
        let store = StateStore::new(resolve_state_path(&config)?);

        let (shutdown_sender, _) = broadcast::channel(1);
        let is_running = Arc::new(AtomicBool::new(false));

        // Prepare PID file path if configured
        let pid_file_path = if !config.daemon.pid_file.is_empty() {
            let expanded_path = shellexpand::full(&config.daemon.pid_file)
                .context("Failed to expand PID file path")?;
            Some(PathBuf::from(expanded_path.as_ref()))
        } else {
            None
        };

        Ok(Self {
            config,
            facts,
            notifier,
            store,
            shutdown_sender,
            is_running,
            total_batches: AtomicU64::new(0),
            failed_batches: AtomicU64::new(0),
            pid_file_path,
        })
    }

    /// Start the daemon in the foreground
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting ghwatch daemon");

        // Write PID file if configured
        self.write_pid_file().context("Failed to write PID file")?;

        // Set running state
        self.is_running.store(true, Ordering::SeqCst);

        // Setup graceful shutdown handling
        let shutdown_receiver = self.shutdown_sender.subscribe();
        let is_running = self.is_running.clone();

        // Spawn shutdown signal handler
        let shutdown_sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("Shutdown signal received, stopping daemon...");
            is_running.store(false, Ordering::SeqCst);
            let _ = shutdown_sender.send(());
        });

        // Run the main daemon loop
        let result = self.daemon_loop(shutdown_receiver).await;

        // Cleanup on exit
        self.cleanup().context("Failed to cleanup daemon")?;

        result
    }

    /// Start the daemon as a background service (Unix platforms)
    #[cfg(unix)]
    pub fn daemonize(&self) -> Result<()> {
        use daemonize::Daemonize;

        let log_file = if !self.config.daemon.log_file.is_empty() {
            let expanded_path = shellexpand::full(&self.config.daemon.log_file)
                .context("Failed to expand log file path")?;
            let log_file = std::fs::File::create(expanded_path.as_ref())
                .context("Failed to create log file")?;
            Some(log_file)
        } else {
            None
        };

        let mut daemonize = Daemonize::new();

        if let Some(pid_path) = &self.pid_file_path {
            daemonize = daemonize.pid_file(pid_path);
        }

        if let Some(log_file) = log_file {
            daemonize = daemonize.stdout(log_file.try_clone()?).stderr(log_file);
        }

        daemonize.start().context("Failed to daemonize process")?;

        info!("ghwatch daemon started as background service");
        Ok(())
    }

    /// Stop a running daemon by sending a shutdown signal
    pub async fn stop(&self) -> Result<()> {
        info!("Sending shutdown signal to daemon");

        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                let pid_str = fs::read_to_string(pid_file).context("Failed to read PID file")?;

                let pid: u32 = pid_str.trim().parse().context("Invalid PID in PID file")?;

                #[cfg(unix)]
                {
                    use nix::sys::signal::{self, Signal};
                    use nix::unistd::Pid;

                    let pid = Pid::from_raw(pid as i32);
                    signal::kill(pid, Signal::SIGTERM)
                        .context("Failed to send SIGTERM to daemon process")?;
                }

                #[cfg(not(unix))]
                {
                    warn!("Daemon stop not implemented for this platform");
                }

                info!("Shutdown signal sent to daemon process {}", pid);
            } else {
                warn!("PID file not found, daemon may not be running");
            }
        } else {
            warn!("No PID file configured, cannot stop daemon");
        }

        Ok(())
    }

    /// Get current daemon status
    pub fn status(&self, start_time: Instant) -> DaemonStatus {
        let is_running = self.is_running.load(Ordering::SeqCst);
        let uptime = start_time.elapsed();

        let next_check_in = if is_running {
            Some(
                self.config
                    .check_interval()
                    .unwrap_or(Duration::from_secs(1800)),
            )
        } else {
            None
        };

        DaemonStatus {
            is_running,
            uptime,
            total_batches: self.total_batches.load(Ordering::SeqCst),
            failed_batches: self.failed_batches.load(Ordering::SeqCst),
            next_check_in,
        }
    }

    /// Main daemon loop - runs periodic monitor batches
    async fn daemon_loop(&self, mut shutdown_receiver: broadcast::Receiver<()>) -> Result<()> {
        let check_interval = self
            .config
            .check_interval()
            .context("Failed to parse check interval")?;
        let mut interval_timer = interval(check_interval);

        info!("Daemon loop started with interval: {:?}", check_interval);

        // State lives in memory across ticks; every batch persists it
        let mut state = self.store.load();

        // Skip the first immediate tick and run the initial batch directly
        interval_timer.tick().await;
        self.run_batch(&mut state).await;

        loop {
            tokio::select! {
                // Shutdown signal received
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received in daemon loop");
                    break;
                }

                // Check interval elapsed
                _ = interval_timer.tick() => {
                    if !self.is_running.load(Ordering::SeqCst) {
                        break;
                    }

                    debug!("Starting scheduled monitor batch");
                    self.run_batch(&mut state).await;
                }
            }
        }

        info!("Daemon loop exiting");
        Ok(())
    }

    /// Run one batch and record its outcome
    async fn run_batch(&self, state: &mut MonitorState) -> BatchSummary {
        let runner = BatchRunner::new(
            &self.facts,
            &self.notifier,
            &self.store,
            PacingConfig::from_monitor(&self.config.monitor),
            self.config.monitor.org_repo_check_limit,
        );

        let summary = runner.run(&self.config.targets, state).await;

        self.total_batches.fetch_add(1, Ordering::SeqCst);
        if summary.error_count() > 0 || !summary.state_persisted {
            self.failed_batches.fetch_add(1, Ordering::SeqCst);
            error!(
                "Monitor batch finished with {} errors (state persisted: {})",
                summary.error_count(),
                summary.state_persisted
            );
        } else {
            info!(
                "Monitor batch completed in {:.2}s: {} repositories, {} organizations, {} updates",
                summary.duration.as_secs_f64(),
                summary.repositories_checked,
                summary.organizations_checked,
                summary.repositories_with_updates
            );
        }

        summary
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            // Create parent directories if they don't exist
            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file and perform cleanup
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Daemon cleanup completed");
        Ok(())
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT, Ctrl+C)
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => debug!("SIGTERM received"),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                debug!("Ctrl+C received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
        debug!("Ctrl+C received");
    }
}

/// Resolve the state file path: config override or the XDG default
pub fn resolve_state_path(config: &Config) -> Result<PathBuf> {
    match &config.monitor.state_file {
        Some(path) => {
            let expanded =
                shellexpand::full(path).context("Failed to expand state file path")?;
            Ok(PathBuf::from(expanded.as_ref()))
        }
        None => StateStore::default_path(),
    }
}

/// Check if daemon is currently running by checking PID file
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    if !config.daemon.pid_file.is_empty() {
        let expanded_path = shellexpand::full(&config.daemon.pid_file)
            .context("Failed to expand PID file path")?;
        let pid_file = PathBuf::from(expanded_path.as_ref());

        if pid_file.exists() {
            let pid_str = fs::read_to_string(&pid_file).context("Failed to read PID file")?;

            let pid: u32 = pid_str.trim().parse().context("Invalid PID in PID file")?;

            // Check if process is actually running
            #[cfg(unix)]
            {
                use nix::errno::Errno;
                use nix::sys::signal;
                use nix::unistd::Pid;

                let pid = Pid::from_raw(pid as i32);
                match signal::kill(pid, None) {
                    Ok(_) => return Ok(true), // Process exists
                    Err(Errno::ESRCH) => {
                        // Process doesn't exist, remove stale PID file
                        let _ = fs::remove_file(&pid_file);
                        return Ok(false);
                    }
                    Err(_) => return Ok(true), // Assume running if we can't check
                }
            }

            #[cfg(not(unix))]
            {
                // On non-Unix platforms, just check if PID file exists
                return Ok(true);
            }
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_daemon_not_running_without_pid_file() {
        let temp_dir = tempdir().unwrap();
        let pid_file = temp_dir.path().join("test.pid");

        let mut config = Config::default();
        config.daemon.pid_file = pid_file.to_string_lossy().to_string();

        assert!(!pid_file.exists());
        let is_running = is_daemon_running(&config).unwrap();
        assert!(!is_running);
    }

    #[test]
    fn test_stale_pid_file_is_removed() {
        let temp_dir = tempdir().unwrap();
        let pid_file = temp_dir.path().join("stale.pid");
        // PID value far beyond anything a test system will have running
        fs::write(&pid_file, "999999999").unwrap();

        let mut config = Config::default();
        config.daemon.pid_file = pid_file.to_string_lossy().to_string();

        #[cfg(unix)]
        {
            let is_running = is_daemon_running(&config).unwrap();
            assert!(!is_running);
            assert!(!pid_file.exists());
        }
    }

    #[test]
    fn test_resolve_state_path_prefers_config_override() {
        let mut config = Config::default();
        config.monitor.state_file = Some("/tmp/ghwatch-test-state.json".to_string());

        let path = resolve_state_path(&config).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/ghwatch-test-state.json"));
    }

    #[test]
    fn test_resolve_state_path_default_ends_with_state_json() {
        let config = Config::default();
        let path = resolve_state_path(&config).unwrap();
        assert!(path.ends_with("ghwatch/state.json"));
    }
}
