use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ghwatch::batch::{BatchRunner, BatchSummary, PacingConfig};
use ghwatch::daemon::{is_daemon_running, resolve_state_path};
use ghwatch::github::auth_setup;
use ghwatch::notify::{build_notifier, Notifier};
use ghwatch::state::StateStore;
use ghwatch::{Config, Daemon, GitHubClient, MonitorTarget};

#[derive(Parser)]
#[command(name = "ghwatch")]
#[command(about = "GitHub repository and organization activity monitor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one monitor check over all configured targets (the default)
    Check,

    /// List configured monitor targets
    Targets,

    /// Send a test notification through every configured channel
    Test,

    /// Manage authentication
    Auth {
        #[command(subcommand)]
        auth_command: AuthCommands,
    },

    /// Run as daemon
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Set up authentication
    Setup,

    /// Test current authentication
    Test,

    /// Show authentication status
    Status,
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop running daemon
    Stop,

    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting ghwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config(cli.config).await?;

    // Execute command (default to a single check if no command specified)
    match cli.command {
        None | Some(Commands::Check) => cmd_check(&config).await,
        Some(Commands::Targets) => cmd_targets(&config),
        Some(Commands::Test) => cmd_test(&config).await,
        Some(Commands::Auth { auth_command }) => cmd_auth(auth_command, &config).await,
        Some(Commands::Daemon { daemon_command }) => cmd_daemon(daemon_command, &config).await,
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
async fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Run a single monitor batch and print its summary
async fn cmd_check(config: &Config) -> Result<()> {
    config.validate_targets()?;

    let client = GitHubClient::new(config).await?;
    let notifier = build_notifier(&config.notification)?;
    let store = StateStore::new(resolve_state_path(config)?);
    let mut state = store.load();

    let runner = BatchRunner::new(
        &client,
        &notifier,
        &store,
        PacingConfig::from_monitor(&config.monitor),
        config.monitor.org_repo_check_limit,
    );

    let summary = runner.run(&config.targets, &mut state).await;
    print_summary(&summary);

    Ok(())
}

/// Print the batch summary in human-readable form
fn print_summary(summary: &BatchSummary) {
    println!("\n📊 Monitor check completed:");
    println!(
        "  - Individual repositories checked: {}",
        summary.repositories_checked
    );
    println!(
        "  - Organizations checked: {}",
        summary.organizations_checked
    );
    println!(
        "  - Repository updates found: {}",
        summary.repositories_with_updates
    );
    if summary.organizations_checked > 0 {
        println!(
            "  - New repositories found: {} (from {} organizations)",
            summary.new_repositories, summary.organizations_with_new_repositories
        );
    }
    println!("  - Errors: {}", summary.error_count());

    for (target, message) in &summary.failures {
        println!("    ❌ {}: {}", target, message);
    }

    if !summary.state_persisted {
        println!("  ⚠️  State could not be saved; changes may be re-reported next run");
    }

    if let Some(rate) = &summary.rate_limit {
        println!(
            "  - API rate limit: {}/{} remaining",
            rate.remaining, rate.limit
        );
        if rate.remaining < 100 {
            println!(
                "  ⚠️  GitHub API rate limit is low. Resets at epoch {}",
                rate.reset
            );
        }
    }

    println!("  - Duration: {:.2}s", summary.duration.as_secs_f64());
}

/// List configured targets
fn cmd_targets(config: &Config) -> Result<()> {
    config.validate_targets()?;

    println!("Monitor targets ({}):", config.targets.len());

    for target in &config.targets {
        match target {
            MonitorTarget::Repository(repo) => {
                println!("  📁 {}", repo.key());
                if let Some(branch) = &repo.branch {
                    println!("     Branch: {}", branch);
                }
                println!(
                    "     Watching: commits={}, releases={}",
                    repo.watch_commits, repo.watch_releases
                );
                if let Some(description) = &repo.description {
                    println!("     📝 {}", description);
                }
            }
            MonitorTarget::Organization(org) => {
                println!("  🏢 org:{}", org.org);
                println!(
                    "     Watching: new_repos={}, commits={}, releases={}, exclude_forks={}",
                    org.watch_new_repos, org.watch_commits, org.watch_releases, org.exclude_forks
                );
                if let Some(description) = &org.description {
                    println!("     📝 {}", description);
                }
            }
        }
    }

    Ok(())
}

/// Send a test notification through every configured channel
async fn cmd_test(config: &Config) -> Result<()> {
    let notifier = build_notifier(&config.notification)?;
    println!(
        "Sending test notification through {} channel(s)...",
        notifier.channel_count()
    );

    let delivery = notifier.notify_test().await;

    if delivery.success {
        println!("✅ Test notification sent successfully");
        if let Some(error) = &delivery.error {
            println!("   ⚠️  Some channels failed: {}", error);
        }
    } else {
        println!(
            "❌ Failed to send test notification: {}",
            delivery.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

/// Handle authentication commands
async fn cmd_auth(auth_command: AuthCommands, config: &Config) -> Result<()> {
    match auth_command {
        AuthCommands::Setup => auth_setup::setup_authentication().await,
        AuthCommands::Test => auth_setup::test_authentication(config).await,
        AuthCommands::Status => {
            match GitHubClient::new(config).await {
                Ok(client) => {
                    println!("✅ Authentication successful");
                    println!("   Username: {}", client.username());
                }
                Err(e) => {
                    println!("❌ Authentication failed: {}", e);
                }
            }
            Ok(())
        }
    }
}

/// Handle daemon commands
async fn cmd_daemon(daemon_command: DaemonCommands, config: &Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            println!("🚀 Starting ghwatch daemon...");

            // Check if daemon is already running
            if is_daemon_running(config)? {
                println!("⚠️  Daemon is already running!");
                println!("   Use 'ghwatch daemon stop' to stop it first");
                return Ok(());
            }

            config.validate_targets()?;
            let mut daemon = Daemon::new((*config).clone()).await?;

            if foreground {
                println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
                daemon.run().await?;
            } else {
                #[cfg(unix)]
                {
                    daemon.daemonize()?;
                    daemon.run().await?;
                }

                #[cfg(not(unix))]
                {
                    println!("❌ Background daemon mode not supported on this platform");
                    println!("   Use --foreground to run in foreground mode");
                    return Ok(());
                }
            }
        }

        DaemonCommands::Stop => {
            println!("🛑 Stopping ghwatch daemon...");

            if !is_daemon_running(config)? {
                println!("⚠️  No daemon appears to be running");
                return Ok(());
            }

            let daemon = Daemon::new((*config).clone()).await?;
            daemon.stop().await?;

            println!("✅ Daemon stop signal sent");
        }

        DaemonCommands::Status => {
            println!("📊 ghwatch Daemon Status");

            let is_running = is_daemon_running(config)?;

            if is_running {
                let daemon = Daemon::new((*config).clone()).await?;
                let status = daemon.status(std::time::Instant::now());

                println!("   🟢 Status: Running");
                println!("   🔄 Check interval: {}", config.monitor.check_interval);

                if let Some(next_check) = status.next_check_in {
                    println!("   ⏰ Next check in: {:.0}s", next_check.as_secs_f64());
                }

                if !config.daemon.log_file.is_empty() {
                    println!("   📄 Log file: {}", config.daemon.log_file);
                }
            } else {
                println!("   🔴 Status: Not running");
                println!("   💡 Use 'ghwatch daemon start' to start the daemon");
            }
        }
    }

    Ok(())
}
