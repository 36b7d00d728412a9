use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for ghwatch
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// GitHub authentication settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Desktop notification settings
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Polling behavior settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Repositories and organizations to watch
    #[serde(default)]
    pub targets: Vec<MonitorTarget>,
}

/// One watched entity, decided at config-load time
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorTarget {
    Repository(RepositoryTarget),
    Organization(OrganizationTarget),
}

/// A single repository to watch for commits and releases
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RepositoryTarget {
    pub owner: String,
    pub repo: String,

    /// Branch to watch; falls back to the repository default branch
    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default = "default_true")]
    pub watch_commits: bool,

    #[serde(default = "default_true")]
    pub watch_releases: bool,

    /// Free-text note shown in target listings
    #[serde(default)]
    pub description: Option<String>,
}

/// An organization to watch for new repositories and member activity
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OrganizationTarget {
    pub org: String,

    #[serde(default = "default_true")]
    pub watch_new_repos: bool,

    #[serde(default = "default_true")]
    pub watch_commits: bool,

    #[serde(default = "default_true")]
    pub watch_releases: bool,

    #[serde(default = "default_true")]
    pub exclude_forks: bool,

    #[serde(default)]
    pub description: Option<String>,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// GitHub username (auto-detected if null)
    pub username: Option<String>,
}

/// Notification configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub sound: bool,

    /// Seconds before a notification auto-dismisses
    #[serde(default = "default_notification_timeout")]
    pub timeout: u64,

    /// Optional email channel, off unless configured
    #[serde(default)]
    pub email: EmailConfig,
}

/// Email notification channel configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Implicit TLS instead of STARTTLS
    #[serde(default)]
    pub secure: bool,

    #[serde(default)]
    pub smtp_user: Option<String>,

    #[serde(default)]
    pub smtp_pass: Option<String>,

    /// Sender address, e.g. "GitHub Monitor <monitor@example.com>"
    #[serde(default)]
    pub from: String,

    /// Recipient address
    #[serde(default)]
    pub to: String,
}

/// Polling configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Interval between scheduled checks
    #[serde(default = "default_interval")]
    pub check_interval: String, // "30m"

    /// Per-organization cap on member repositories checked for
    /// commits/releases each cycle (oldest-known-first)
    #[serde(default = "default_org_repo_check_limit")]
    pub org_repo_check_limit: usize,

    /// Delay after each repository target, in milliseconds
    #[serde(default = "default_repository_delay_ms")]
    pub repository_delay_ms: u64,

    /// Delay after each organization target, in milliseconds
    #[serde(default = "default_organization_delay_ms")]
    pub organization_delay_ms: u64,

    /// Delay between organization member sub-checks, in milliseconds
    #[serde(default = "default_member_delay_ms")]
    pub member_delay_ms: u64,

    /// State file location (defaults to XDG data directory)
    #[serde(default)]
    pub state_file: Option<String>,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_true() -> bool {
    true
}
fn default_notification_timeout() -> u64 {
    10
}
fn default_smtp_port() -> u16 {
    587
}
fn default_interval() -> String {
    "30m".to_string()
}
fn default_org_repo_check_limit() -> usize {
    10
}
fn default_repository_delay_ms() -> u64 {
    1000
}
fn default_organization_delay_ms() -> u64 {
    2000
}
fn default_member_delay_ms() -> u64 {
    500
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/ghwatch.pid", runtime_dir)
    } else {
        "/tmp/ghwatch.pid".to_string()
    }
}
fn default_log_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/ghwatch/daemon.log", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/ghwatch/daemon.log", home)
    } else {
        "/tmp/ghwatch-daemon.log".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            username: None,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sound: true,
            timeout: default_notification_timeout(),
            email: EmailConfig::default(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            secure: false,
            smtp_user: None,
            smtp_pass: None,
            from: String::new(),
            to: String::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_interval(),
            org_repo_check_limit: default_org_repo_check_limit(),
            repository_delay_ms: default_repository_delay_ms(),
            organization_delay_ms: default_organization_delay_ms(),
            member_delay_ms: default_member_delay_ms(),
            state_file: None,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github: GitHubConfig::default(),
            notification: NotificationConfig::default(),
            monitor: MonitorConfig::default(),
            daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
            targets: Vec::new(),
        }
    }
}

impl MonitorTarget {
    /// State key for this target: `owner/repo` or `org:<org>`
    pub fn key(&self) -> String {
        match self {
            MonitorTarget::Repository(r) => r.key(),
            MonitorTarget::Organization(o) => o.key(),
        }
    }

    /// Validate target names against GitHub naming rules
    pub fn validate(&self) -> Result<()> {
        match self {
            MonitorTarget::Repository(r) => {
                validate_name("owner", &r.owner)?;
                validate_name("repo", &r.repo)?;
                if let Some(branch) = &r.branch {
                    if branch.trim().is_empty() {
                        bail!("branch must not be empty for {}", r.key());
                    }
                }
            }
            MonitorTarget::Organization(o) => {
                validate_name("org", &o.org)?;
            }
        }
        Ok(())
    }
}

impl RepositoryTarget {
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl OrganizationTarget {
    pub fn key(&self) -> String {
        format!("org:{}", self.org)
    }
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    // GitHub owner/repo/org segment: letters, digits, dot, dash, underscore
    let pattern = regex::Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid pattern");
    if value.is_empty() {
        bail!("{} must not be empty", field);
    }
    if !pattern.is_match(value) {
        bail!("{} '{}' contains invalid characters", field, value);
    }
    Ok(())
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("ghwatch").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        if let Some(state_file) = &self.monitor.state_file {
            self.monitor.state_file = Some(
                shellexpand::full(state_file)
                    .context("Failed to expand state_file path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Validate the configured targets: non-empty, well-formed, no duplicates
    pub fn validate_targets(&self) -> Result<()> {
        if self.targets.is_empty() {
            bail!("No targets configured. Add repositories or organizations to the config file.");
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !seen.insert(target.key()) {
                bail!("Duplicate target: {}", target.key());
            }
        }

        Ok(())
    }

    /// Parse the check interval into a Duration
    pub fn check_interval(&self) -> Result<Duration> {
        parse_interval(&self.monitor.check_interval).map(Duration::from_secs)
    }
}

/// Parse duration strings like "30s", "30m", "1h", "2d" into seconds
pub fn parse_interval(interval: &str) -> Result<u64> {
    let interval = interval.trim().to_lowercase();

    if let Some(value) = interval.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")
    } else if let Some(value) = interval.strip_suffix('m') {
        value
            .parse::<u64>()
            .map(|v| v * 60)
            .context("Invalid minutes value")
    } else if let Some(value) = interval.strip_suffix('h') {
        value
            .parse::<u64>()
            .map(|v| v * 3600)
            .context("Invalid hours value")
    } else if let Some(value) = interval.strip_suffix('d') {
        value
            .parse::<u64>()
            .map(|v| v * 86400)
            .context("Invalid days value")
    } else {
        interval
            .parse::<u64>()
            .context("Invalid interval format. Use format like '30m', '1h', '2d'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo_target(owner: &str, repo: &str) -> MonitorTarget {
        MonitorTarget::Repository(RepositoryTarget {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: None,
            watch_commits: true,
            watch_releases: true,
            description: None,
        })
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.github.auth_method, "auto");
        assert!(config.notification.enabled);
        assert!(config.notification.sound);
        assert_eq!(config.notification.timeout, 10);
        assert_eq!(config.monitor.check_interval, "30m");
        assert_eq!(config.monitor.org_repo_check_limit, 10);
        assert_eq!(config.monitor.repository_delay_ms, 1000);
        assert_eq!(config.monitor.organization_delay_ms, 2000);
        assert_eq!(config.monitor.member_delay_ms, 500);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("30s").unwrap(), 30);
        assert_eq!(parse_interval("30m").unwrap(), 1800);
        assert_eq!(parse_interval("1h").unwrap(), 3600);
        assert_eq!(parse_interval("2d").unwrap(), 172800);
        assert_eq!(parse_interval("90").unwrap(), 90);
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_yaml_parsing_targets() {
        let yaml_content = r#"
notification:
  enabled: true
  timeout: 5
monitor:
  check_interval: "15m"
  org_repo_check_limit: 5
targets:
  - type: repository
    owner: "rust-lang"
    repo: "rust"
    branch: "master"
    watch_releases: false
  - type: organization
    org: "tokio-rs"
    exclude_forks: true
    description: "async runtime org"
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.notification.timeout, 5);
        assert_eq!(config.monitor.check_interval, "15m");
        assert_eq!(config.monitor.org_repo_check_limit, 5);
        assert_eq!(config.targets.len(), 2);

        match &config.targets[0] {
            MonitorTarget::Repository(r) => {
                assert_eq!(r.owner, "rust-lang");
                assert_eq!(r.repo, "rust");
                assert_eq!(r.branch.as_deref(), Some("master"));
                assert!(r.watch_commits); // default
                assert!(!r.watch_releases);
            }
            other => panic!("Expected repository target, got {:?}", other),
        }

        match &config.targets[1] {
            MonitorTarget::Organization(o) => {
                assert_eq!(o.org, "tokio-rs");
                assert!(o.watch_new_repos);
                assert!(o.exclude_forks);
                assert_eq!(o.description.as_deref(), Some("async runtime org"));
            }
            other => panic!("Expected organization target, got {:?}", other),
        }
    }

    #[test]
    fn test_yaml_email_config() {
        let yaml_content = r#"
notification:
  enabled: true
  email:
    enabled: true
    smtp_host: "smtp.example.com"
    smtp_user: "monitor"
    smtp_pass: "hunter2"
    from: "GitHub Monitor <monitor@example.com>"
    to: "dev@example.com"
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        let email = &config.notification.email;
        assert!(email.enabled);
        assert_eq!(email.smtp_host, "smtp.example.com");
        assert_eq!(email.smtp_port, 587); // default
        assert!(!email.secure); // default
        assert_eq!(email.to, "dev@example.com");

        // Absent email block stays disabled
        let bare: Config = serde_yaml::from_str("targets: []").unwrap();
        assert!(!bare.notification.email.enabled);
    }

    #[test]
    fn test_yaml_unknown_target_type_fails() {
        let yaml_content = r#"
targets:
  - type: gitlab_project
    owner: "a"
    repo: "b"
"#;
        let result: std::result::Result<Config, _> = serde_yaml::from_str(yaml_content);
        assert!(result.is_err());
    }

    #[test]
    fn test_target_keys() {
        assert_eq!(repo_target("acme", "widget").key(), "acme/widget");

        let org = MonitorTarget::Organization(OrganizationTarget {
            org: "acme".to_string(),
            watch_new_repos: true,
            watch_commits: true,
            watch_releases: true,
            exclude_forks: true,
            description: None,
        });
        assert_eq!(org.key(), "org:acme");
    }

    #[test]
    fn test_validate_targets_empty() {
        let config = Config::default();
        assert!(config.validate_targets().is_err());
    }

    #[test]
    fn test_validate_targets_duplicate() {
        let mut config = Config::default();
        config.targets.push(repo_target("acme", "widget"));
        config.targets.push(repo_target("acme", "widget"));

        let err = config.validate_targets().unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_validate_target_names() {
        let mut config = Config::default();
        config.targets.push(repo_target("acme corp", "widget"));
        assert!(config.validate_targets().is_err());

        let mut config = Config::default();
        config.targets.push(repo_target("", "widget"));
        assert!(config.validate_targets().is_err());

        let mut config = Config::default();
        config.targets.push(repo_target("acme", "widget.rs"));
        assert!(config.validate_targets().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.yml");

        let mut config = Config::default();
        config.github.username = Some("testuser".to_string());
        config.monitor.check_interval = "1h".to_string();
        config.targets.push(repo_target("acme", "widget"));

        config.save(&config_path).expect("Failed to save config");

        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.github.username, Some("testuser".to_string()));
        assert_eq!(loaded.monitor.check_interval, "1h".to_string());
        assert_eq!(loaded.targets, config.targets);
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.yml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("ghwatch"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }
}
