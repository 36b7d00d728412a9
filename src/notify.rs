//! Notification channels - best-effort change announcements
//!
//! The reconciler talks to a `Notifier` trait object. `DesktopNotifier`
//! (notify-rust) and `EmailNotifier` (lettre over SMTP) are the shipping
//! channels; `MultiNotifier` fans one event out to every configured
//! channel. Delivery is always best-effort: failures are reported in the
//! returned `Delivery`, never as errors, so a broken notification daemon
//! or mail server cannot stall monitoring.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use crate::config::{EmailConfig, NotificationConfig};
use crate::github::{CommitInfo, OrgInfo, ReleaseInfo, RepoInfo, RepoSummary};

/// Outcome of one notification attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub success: bool,
    pub error: Option<String>,
}

impl Delivery {
    pub fn sent() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Notification channel used by the reconciler.
///
/// Methods never return Err; a failed delivery is data, not a fault.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Whether the channel is usable at all.
    async fn test_connection(&self) -> bool;

    async fn notify_commit(&self, repo: &RepoInfo, commit: &CommitInfo) -> Delivery;

    async fn notify_release(&self, repo: &RepoInfo, release: &ReleaseInfo) -> Delivery;

    async fn notify_new_repository(&self, org: &OrgInfo, repo: &RepoSummary) -> Delivery;

    async fn notify_test(&self) -> Delivery;
}

/// Truncate to `max` characters with a trailing ellipsis, on a char boundary.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// Desktop notification channel backed by the platform notification service
pub struct DesktopNotifier {
    enabled: bool,
    sound: bool,
    timeout_secs: u32,
}

impl DesktopNotifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            sound: config.sound,
            timeout_secs: config.timeout.min(u32::MAX as u64) as u32,
        }
    }

    fn show(&self, title: &str, body: &str) -> Delivery {
        let mut notification = notify_rust::Notification::new();
        notification
            .summary(title)
            .body(body)
            .appname("ghwatch")
            .timeout(notify_rust::Timeout::Milliseconds(
                self.timeout_secs.saturating_mul(1000),
            ));

        #[cfg(all(unix, not(target_os = "macos")))]
        if self.sound {
            notification.sound_name("message-new-instant");
        }

        match notification.show() {
            Ok(_) => {
                debug!("Desktop notification shown: {}", title);
                Delivery::sent()
            }
            Err(e) => {
                warn!("Failed to show desktop notification: {}", e);
                Delivery::failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn test_connection(&self) -> bool {
        self.enabled
    }

    async fn notify_commit(&self, repo: &RepoInfo, commit: &CommitInfo) -> Delivery {
        if !self.enabled {
            return Delivery::failed("Desktop notifications disabled");
        }

        let title = format!("🚀 New Commit - {}", repo.name);
        let body = format!(
            "{}\n\nBy: {}\nSHA: {}",
            truncate(&commit.message, 100),
            commit.author,
            commit.short_sha()
        );
        self.show(&title, &body)
    }

    async fn notify_release(&self, repo: &RepoInfo, release: &ReleaseInfo) -> Delivery {
        if !self.enabled {
            return Delivery::failed("Desktop notifications disabled");
        }

        let title = format!("🎉 New Release - {}", repo.name);
        let mut body = format!("New release: {}", release.tag);
        if let Some(name) = &release.name {
            if name != &release.tag {
                body.push_str(&format!(" ({})", name));
            }
        }
        body.push_str(&format!("\n\nBy: {}", release.author));
        if release.prerelease {
            body.push_str("\n⚠️ Pre-release");
        }
        self.show(&title, &body)
    }

    async fn notify_new_repository(&self, org: &OrgInfo, repo: &RepoSummary) -> Delivery {
        if !self.enabled {
            return Delivery::failed("Desktop notifications disabled");
        }

        let title = format!("🆕 New Repository - {}", org.display_name());
        let mut body = format!("New repository: {}", repo.name);
        if let Some(description) = &repo.description {
            body.push_str(&format!("\n\n{}", truncate(description, 80)));
        }
        body.push_str(&format!(
            "\n\nLanguage: {}",
            repo.language.as_deref().unwrap_or("Not specified")
        ));
        if let Some(created) = repo.created_at {
            body.push_str(&format!(
                "\nCreated: {}",
                created.with_timezone(&Local).format("%Y-%m-%d")
            ));
        }
        self.show(&title, &body)
    }

    async fn notify_test(&self) -> Delivery {
        if !self.enabled {
            return Delivery::failed("Desktop notifications disabled");
        }

        let body = format!(
            "Test notification sent at {}\n\nIf you see this, desktop notifications are working!",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.show("🧪 ghwatch Test", &body)
    }
}

/// Email notification channel over SMTP
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .with_context(|| format!("Invalid SMTP host '{}'", config.smtp_host))?;

        let mut builder = builder.port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from: Mailbox = config
            .from
            .parse()
            .with_context(|| format!("Invalid email sender address '{}'", config.from))?;
        let to: Mailbox = config
            .to
            .parse()
            .with_context(|| format!("Invalid email recipient address '{}'", config.to))?;

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    async fn send(&self, subject: &str, html: String) -> Delivery {
        let message = match Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
        {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to build email '{}': {}", subject, e);
                return Delivery::failed(e.to_string());
            }
        };

        match self.transport.send(message).await {
            Ok(_) => {
                debug!("Email sent: {}", subject);
                Delivery::sent()
            }
            Err(e) => {
                warn!("Failed to send email '{}': {}", subject, e);
                Delivery::failed(e.to_string())
            }
        }
    }
}

/// Repository footer shared by the commit and release email bodies
fn repo_footer_html(repo: &RepoInfo) -> String {
    let mut html = String::from("<hr>");
    if let Some(description) = &repo.description {
        html.push_str(&format!("<p>{}</p>", description));
    }
    html.push_str(&format!(
        "<p>Language: {} | ⭐ {} | 🍴 {}</p>",
        repo.language.as_deref().unwrap_or("Not specified"),
        repo.stars,
        repo.forks
    ));
    html
}

fn commit_email_html(repo: &RepoInfo, commit: &CommitInfo) -> String {
    let mut html = format!(
        "<h2>🚀 New commit in {}</h2>\
         <p><strong>Message:</strong> {}</p>\
         <p><strong>Author:</strong> {}</p>\
         <p><strong>Branch:</strong> {}</p>\
         <p><strong>SHA:</strong> <code>{}</code></p>",
        repo.full_name,
        commit.message,
        commit.author,
        commit.branch,
        commit.short_sha()
    );
    if let Some(date) = commit.date {
        html.push_str(&format!(
            "<p><strong>Date:</strong> {}</p>",
            date.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ));
    }
    html.push_str(&format!("<p><a href=\"{}\">View Commit</a></p>", commit.url));
    html.push_str(&repo_footer_html(repo));
    html
}

fn release_email_html(repo: &RepoInfo, release: &ReleaseInfo) -> String {
    let mut html = format!(
        "<h2>🎉 New release in {}</h2>\
         <h3>{}</h3>\
         <p><strong>Tag:</strong> {}</p>\
         <p><strong>Author:</strong> {}</p>",
        repo.full_name,
        release.name.as_deref().unwrap_or(&release.tag),
        release.tag,
        release.author
    );
    if let Some(published) = release.published_at {
        html.push_str(&format!(
            "<p><strong>Published:</strong> {}</p>",
            published.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ));
    }
    if release.prerelease {
        html.push_str("<p>⚠️ Pre-release</p>");
    }
    if release.draft {
        html.push_str("<p>📝 Draft</p>");
    }
    if let Some(body) = &release.body {
        html.push_str(&format!(
            "<div style=\"white-space: pre-wrap;\">{}</div>",
            body
        ));
    }
    html.push_str(&format!(
        "<p><a href=\"{}\">View Release</a></p>",
        release.url
    ));
    html.push_str(&repo_footer_html(repo));
    html
}

fn new_repository_email_html(org: &OrgInfo, repo: &RepoSummary) -> String {
    let mut html = format!(
        "<h2>🆕 New repository in {}</h2><h3>{}</h3>",
        org.display_name(),
        repo.full_name
    );
    if let Some(description) = &repo.description {
        html.push_str(&format!("<p>{}</p>", description));
    }
    html.push_str(&format!(
        "<p><strong>Language:</strong> {}</p>",
        repo.language.as_deref().unwrap_or("Not specified")
    ));
    if let Some(created) = repo.created_at {
        html.push_str(&format!(
            "<p><strong>Created:</strong> {}</p>",
            created.with_timezone(&Local).format("%Y-%m-%d")
        ));
    }
    html.push_str(&format!(
        "<p><a href=\"{}\">View Repository</a></p>",
        repo.url
    ));
    html
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn test_connection(&self) -> bool {
        self.transport.test_connection().await.unwrap_or(false)
    }

    async fn notify_commit(&self, repo: &RepoInfo, commit: &CommitInfo) -> Delivery {
        let subject = format!("🚀 New commit in {}", repo.full_name);
        self.send(&subject, commit_email_html(repo, commit)).await
    }

    async fn notify_release(&self, repo: &RepoInfo, release: &ReleaseInfo) -> Delivery {
        let subject = format!("🎉 New release {} in {}", release.tag, repo.full_name);
        self.send(&subject, release_email_html(repo, release)).await
    }

    async fn notify_new_repository(&self, org: &OrgInfo, repo: &RepoSummary) -> Delivery {
        let subject = format!(
            "🆕 New repository {} in {}",
            repo.full_name,
            org.display_name()
        );
        self.send(&subject, new_repository_email_html(org, repo))
            .await
    }

    async fn notify_test(&self) -> Delivery {
        let html = format!(
            "<h2>🧪 ghwatch Test Email</h2>\
             <p>Test email sent at {}</p>\
             <p>If you received this, email notifications are working!</p>",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.send("🧪 ghwatch Test Email", html).await
    }
}

/// Fans one event out to every configured channel.
///
/// A delivery counts as successful when at least one channel got it out;
/// errors from the failed channels are still carried in the result.
pub struct MultiNotifier {
    channels: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn merge(deliveries: Vec<Delivery>) -> Delivery {
        if deliveries.is_empty() {
            return Delivery::failed("No notification channels configured");
        }
        let success = deliveries.iter().any(|d| d.success);
        let errors: Vec<String> = deliveries.into_iter().filter_map(|d| d.error).collect();
        Delivery {
            success,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        }
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn test_connection(&self) -> bool {
        let mut any = false;
        for channel in &self.channels {
            if channel.test_connection().await {
                any = true;
            }
        }
        any
    }

    async fn notify_commit(&self, repo: &RepoInfo, commit: &CommitInfo) -> Delivery {
        let mut deliveries = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            deliveries.push(channel.notify_commit(repo, commit).await);
        }
        Self::merge(deliveries)
    }

    async fn notify_release(&self, repo: &RepoInfo, release: &ReleaseInfo) -> Delivery {
        let mut deliveries = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            deliveries.push(channel.notify_release(repo, release).await);
        }
        Self::merge(deliveries)
    }

    async fn notify_new_repository(&self, org: &OrgInfo, repo: &RepoSummary) -> Delivery {
        let mut deliveries = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            deliveries.push(channel.notify_new_repository(org, repo).await);
        }
        Self::merge(deliveries)
    }

    async fn notify_test(&self) -> Delivery {
        let mut deliveries = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            deliveries.push(channel.notify_test().await);
        }
        Self::merge(deliveries)
    }
}

/// Build the notifier stack from configuration.
///
/// The desktop channel is always present; email joins it when enabled.
pub fn build_notifier(config: &NotificationConfig) -> Result<MultiNotifier> {
    let mut channels: Vec<Box<dyn Notifier>> = vec![Box::new(DesktopNotifier::new(config))];
    if config.email.enabled {
        channels.push(Box::new(EmailNotifier::new(&config.email)?));
    }
    Ok(MultiNotifier::new(channels))
}
