//! Notifications: the one-shot "bookings open" alert and the periodic
//! "still watching" heartbeat.

use crate::mail::MailNotifier;
use crate::state::MonitorState;
use crate::template::{self, TemplateVars};
use chrono::{DateTime, Local, Utc};
use std::time::Duration;

/// Delivery channel used by the scheduler.
///
/// Failures are reported, never escalated: the scheduler logs them and
/// carries on.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn notify_open(&self, text: &str, at: DateTime<Utc>) -> Result<(), NotifyError>;

    async fn notify_heartbeat(
        &self,
        state: &MonitorState,
        next_check: DateTime<Utc>,
    ) -> Result<(), NotifyError>;
}

/// A rendered message, ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subject: String,
    pub html: String,
}

/// Builds message subjects and bodies from the configured templates.
#[derive(Debug, Clone)]
pub struct Composer {
    url: String,
    subject_template: String,
    body_template: String,
    check_interval: Duration,
}

impl Composer {
    pub fn new(
        url: &str,
        subject_template: &str,
        body_template: &str,
        check_interval: Duration,
    ) -> Self {
        Self {
            url: url.to_string(),
            subject_template: subject_template.to_string(),
            body_template: body_template.to_string(),
            check_interval,
        }
    }

    pub fn open_alert(&self, text: &str, at: DateTime<Utc>) -> Notification {
        let timestamp = local_time(at);
        let vars = TemplateVars {
            button_text: text,
            timestamp: &timestamp,
            url: &self.url,
        };
        Notification {
            subject: template::render(&self.subject_template, &vars),
            html: template::render(&self.body_template, &vars),
        }
    }

    pub fn heartbeat(
        &self,
        state: &MonitorState,
        next_check: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Notification {
        let last_check = state
            .last_check
            .map(local_time)
            .unwrap_or_else(|| "N/A".to_string());
        let html = format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
  <h2 style="color: #2563eb;">Booking Monitor Status Update</h2>
  <p><strong>Status:</strong> Running</p>
  <p><strong>Booking Status:</strong> Not Open Yet</p>
  <h3>Statistics</h3>
  <ul>
    <li><strong>Total Checks:</strong> {total}</li>
    <li><strong>Last Check:</strong> {last_check}</li>
    <li><strong>Running For:</strong> {uptime}</li>
    <li><strong>Check Interval:</strong> Every {interval} minutes</li>
    <li><strong>Recent Errors:</strong> {errors}</li>
  </ul>
  <p><strong>Next Check:</strong> {next}</p>
  <p><strong>Monitoring URL:</strong> <a href="{url}">{url}</a></p>
  <p style="color: #6b7280; font-size: 12px;">You will receive an immediate alert when bookings open. Sent at {sent}.</p>
</div>"#,
            total = state.total_checks,
            uptime = format_uptime(state.uptime(now)),
            interval = self.check_interval.as_secs() / 60,
            errors = state.consecutive_errors,
            next = local_time(next_check),
            url = self.url,
            sent = local_time(now),
        );
        Notification {
            subject: format!(
                "Monitor Active - Still Searching ({} checks completed)",
                state.total_checks
            ),
            html,
        }
    }

    pub fn test_message(&self, now: DateTime<Utc>) -> Notification {
        Notification {
            subject: "Test Email - Booking Monitor Setup".to_string(),
            html: format!(
                "<h2>Email configuration works</h2>\
                 <p>slotwatch can deliver notifications for <a href=\"{url}\">{url}</a>.</p>\
                 <p style=\"color: #666; font-size: 12px;\">Test sent at {sent}</p>",
                url = self.url,
                sent = local_time(now),
            ),
        }
    }
}

/// Render a timestamp in the host's local time zone.
pub fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `Xd Yh Zm` for days, `Yh Zm` for hours, `Zm Ss` otherwise.
pub fn format_uptime(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h {}m", days, hours % 24, minutes % 60)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else {
        format!("{}m {}s", minutes, seconds % 60)
    }
}

/// Logs what would have been sent. Used when no mail account is configured.
pub struct LogNotifier {
    composer: Composer,
}

impl LogNotifier {
    pub fn new(composer: Composer) -> Self {
        Self { composer }
    }
}

impl Notifier for LogNotifier {
    async fn notify_open(&self, text: &str, at: DateTime<Utc>) -> Result<(), NotifyError> {
        let message = self.composer.open_alert(text, at);
        tracing::warn!(subject = %message.subject, "BOOKING IS OPEN (email not configured, alert logged only)");
        Ok(())
    }

    async fn notify_heartbeat(
        &self,
        state: &MonitorState,
        next_check: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let message = self.composer.heartbeat(state, next_check, Utc::now());
        tracing::info!(
            subject = %message.subject,
            consecutive_errors = state.consecutive_errors,
            "status update (email not configured, logged only)"
        );
        Ok(())
    }
}

/// The notifier chosen at startup.
pub enum AnyNotifier {
    Mail(MailNotifier),
    Log(LogNotifier),
}

impl Notifier for AnyNotifier {
    async fn notify_open(&self, text: &str, at: DateTime<Utc>) -> Result<(), NotifyError> {
        match self {
            AnyNotifier::Mail(n) => n.notify_open(text, at).await,
            AnyNotifier::Log(n) => n.notify_open(text, at).await,
        }
    }

    async fn notify_heartbeat(
        &self,
        state: &MonitorState,
        next_check: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        match self {
            AnyNotifier::Mail(n) => n.notify_heartbeat(state, next_check).await,
            AnyNotifier::Log(n) => n.notify_heartbeat(state, next_check).await,
        }
    }
}

/// Errors from notification delivery. Never fatal to the monitor.
#[derive(Debug)]
pub enum NotifyError {
    Address { address: String, reason: String },
    Build(String),
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Address { address, reason } => {
                write!(f, "invalid mail address {address:?}: {reason}")
            }
            NotifyError::Build(msg) => write!(f, "failed to build message: {msg}"),
            NotifyError::Transport(e) => write!(f, "failed to send message: {e}"),
        }
    }
}

impl std::error::Error for NotifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifyError::Transport(e) => Some(e.as_ref()),
            NotifyError::Address { .. } | NotifyError::Build(_) => None,
        }
    }
}
