use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from slotwatch.toml, then overridden
/// from the environment and the command line.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub target: TargetConfig,
    pub schedule: ScheduleConfig,
    pub retry: RetryConfig,
    pub browser: BrowserConfig,
    pub connectivity: ConnectivityConfig,
    pub email: EmailConfig,
    pub status: StatusConfig,
}

/// What to watch and how to recognise the open state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub url: String,
    /// CSS selector for the card containers; also the content marker waited on.
    pub card_selector: String,
    pub heading_selector: String,
    /// Substring the card heading must contain.
    pub heading_marker: String,
    /// Substring (case-insensitive) of the action text that means bookings are open.
    pub open_marker: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub check_interval_mins: u64,
    /// Zero disables heartbeats.
    pub heartbeat_interval_mins: u64,
    /// How long shutdown waits for an in-flight check to close its browser.
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub exhaustion_cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub executable: Option<PathBuf>,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub load_timeout_secs: u64,
    pub content_wait_timeout_secs: u64,
    pub settle_millis: u64,
    pub blocked_resource_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub probe_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub file: PathBuf,
}

// --- Default implementations ---

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            card_selector: ".bg-white.rounded-2xl".to_string(),
            heading_selector: "h3".to_string(),
            heading_marker: "Bhasmaarti".to_string(),
            open_marker: "Book Now".to_string(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_mins: 5,
            heartbeat_interval_mins: 60,
            shutdown_grace_secs: 15,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 5,
            exhaustion_cooldown_secs: 10,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
            load_timeout_secs: 60,
            content_wait_timeout_secs: 30,
            settle_millis: 2000,
            blocked_resource_types: vec![
                "image".to_string(),
                "stylesheet".to_string(),
                "font".to_string(),
                "media".to_string(),
            ],
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://www.google.com".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            recipient: String::new(),
            subject: "Bookings are open: {{BUTTON_TEXT}}".to_string(),
            body: "<p>The booking button now reads <strong>{{BUTTON_TEXT}}</strong> \
                   (seen at {{TIMESTAMP}}).</p><p><a href=\"{{URL}}\">{{URL}}</a></p>"
                .to_string(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("slotwatch.status"),
        }
    }
}

// --- Derived durations ---

/// Longest check or heartbeat interval accepted: one year.
pub const MAX_INTERVAL_MINS: u64 = 60 * 24 * 365;

impl ScheduleConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_mins.saturating_mul(60))
    }

    /// `None` when heartbeats are disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_mins > 0)
            .then(|| Duration::from_secs(self.heartbeat_interval_mins.saturating_mul(60)))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl BrowserConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn content_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.content_wait_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }
}

impl EmailConfig {
    /// Mail is sent only when credentials and a recipient are all present.
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty() && !self.recipient.is_empty()
    }
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub url: Option<String>,
    pub check_interval_mins: Option<u64>,
    pub heartbeat_interval_mins: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl MonitorConfig {
    /// Load the config file if it exists, otherwise start from defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Apply `KEY=value` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WEBSITE_URL") {
            self.target.url = v;
        }
        if let Some(v) = get("TARGET_CHECK") {
            self.target.heading_marker = v;
        }
        if let Some(v) = get("OPEN_MARKER") {
            self.target.open_marker = v;
        }
        if let Some(v) = get("CHECK_INTERVAL") {
            self.schedule.check_interval_mins = parse_env("CHECK_INTERVAL", &v)?;
        }
        if let Some(v) = get("NOTIFICATION_INTERVAL") {
            self.schedule.heartbeat_interval_mins = parse_env("NOTIFICATION_INTERVAL", &v)?;
        }
        if let Some(v) = get("EMAIL_SMTP_HOST") {
            self.email.smtp_host = v;
        }
        if let Some(v) = get("EMAIL_SMTP_PORT") {
            self.email.smtp_port = parse_env("EMAIL_SMTP_PORT", &v)?;
        }
        if let Some(v) = get("EMAIL_SERVER_USER") {
            self.email.username = v;
        }
        if let Some(v) = get("EMAIL_SERVER_PASSWORD") {
            self.email.password = v;
        }
        if let Some(v) = get("EMAIL_RECIPIENT") {
            self.email.recipient = v;
        }
        if let Some(v) = get("EMAIL_SUBJECT") {
            self.email.subject = v;
        }
        if let Some(v) = get("EMAIL_BODY") {
            self.email.body = v;
        }
        if let Some(v) = get("CHROME_EXECUTABLE") {
            self.browser.executable = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(ref url) = cli.url {
            self.target.url = url.clone();
        }
        if let Some(mins) = cli.check_interval_mins {
            self.schedule.check_interval_mins = mins;
        }
        if let Some(mins) = cli.heartbeat_interval_mins {
            self.schedule.heartbeat_interval_mins = mins;
        }
        if let Some(n) = cli.max_attempts {
            self.retry.max_attempts = n;
        }
    }

    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };

        if self.target.url.trim().is_empty() {
            return Err(invalid(
                "target.url",
                "no target URL configured (set WEBSITE_URL or [target] url)",
            ));
        }
        if let Err(e) = reqwest::Url::parse(&self.target.url) {
            return Err(invalid("target.url", &e.to_string()));
        }
        if self.target.card_selector.trim().is_empty() {
            return Err(invalid("target.card_selector", "must not be empty"));
        }
        if self.target.heading_selector.trim().is_empty() {
            return Err(invalid("target.heading_selector", "must not be empty"));
        }
        if self.target.heading_marker.trim().is_empty() {
            return Err(invalid("target.heading_marker", "must not be empty"));
        }
        if self.target.open_marker.trim().is_empty() {
            return Err(invalid("target.open_marker", "must not be empty"));
        }
        if self.schedule.check_interval_mins == 0 {
            return Err(invalid("schedule.check_interval_mins", "must be at least 1"));
        }
        if self.schedule.check_interval_mins > MAX_INTERVAL_MINS {
            return Err(invalid(
                "schedule.check_interval_mins",
                &format!("must be at most {MAX_INTERVAL_MINS} (one year)"),
            ));
        }
        if self.schedule.heartbeat_interval_mins > MAX_INTERVAL_MINS {
            return Err(invalid(
                "schedule.heartbeat_interval_mins",
                &format!("must be at most {MAX_INTERVAL_MINS} (one year), or 0 to disable"),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.browser.load_timeout_secs == 0 || self.browser.content_wait_timeout_secs == 0 {
            return Err(invalid("browser", "timeouts must be greater than zero"));
        }
        if self.connectivity.timeout_secs == 0 {
            return Err(invalid("connectivity.timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key,
        value: value.to_string(),
    })
}

/// Errors raised while resolving the configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Env {
        key: &'static str,
        value: String,
    },
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Env { key, value } => {
                write!(f, "invalid value for {key}: {value:?}")
            }
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Env { .. } | ConfigError::Invalid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.target.url = "https://example.com/darshan".to_string();
        config
    }

    #[test]
    fn test_defaults_match_monitoring_policy() {
        let config = MonitorConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_secs, 5);
        assert_eq!(config.retry.exhaustion_cooldown_secs, 10);
        assert_eq!(config.browser.load_timeout_secs, 60);
        assert_eq!(config.browser.content_wait_timeout_secs, 30);
        assert_eq!(config.browser.settle_millis, 2000);
        assert_eq!(config.target.open_marker, "Book Now");
        assert_eq!(
            config.browser.blocked_resource_types,
            vec!["image", "stylesheet", "font", "media"]
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.schedule.check_interval_mins, 5);
    }

    #[test]
    fn test_load_partial_toml_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slotwatch.toml");
        std::fs::write(
            &path,
            r#"
[target]
url = "https://example.com"
open_marker = "Reserve"

[schedule]
heartbeat_interval_mins = 0
"#,
        )
        .unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.target.url, "https://example.com");
        assert_eq!(config.target.open_marker, "Reserve");
        assert_eq!(config.target.heading_selector, "h3");
        assert_eq!(config.schedule.heartbeat_interval(), None);
        assert_eq!(config.schedule.check_interval_mins, 5);
    }

    #[test]
    fn test_load_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[target\nurl = ").unwrap();
        let err = MonitorConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("WEBSITE_URL", "https://temple.example/book"),
            ("TARGET_CHECK", "Shringar"),
            ("CHECK_INTERVAL", "2"),
            ("NOTIFICATION_INTERVAL", "30"),
            ("EMAIL_SERVER_USER", "me@example.com"),
            ("EMAIL_SERVER_PASSWORD", "secret"),
            ("EMAIL_RECIPIENT", "you@example.com"),
            ("EMAIL_SUBJECT", "Open!"),
        ]
        .into_iter()
        .collect();

        let mut config = MonitorConfig::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.target.url, "https://temple.example/book");
        assert_eq!(config.target.heading_marker, "Shringar");
        assert_eq!(config.schedule.check_interval_mins, 2);
        assert_eq!(
            config.schedule.heartbeat_interval(),
            Some(Duration::from_secs(1800))
        );
        assert!(config.email.is_configured());
        assert_eq!(config.email.subject, "Open!");
    }

    #[test]
    fn test_env_empty_values_are_ignored() {
        let mut config = MonitorConfig::default();
        config
            .apply_env_from(|k| (k == "EMAIL_SUBJECT").then(|| "   ".to_string()))
            .unwrap();
        assert_eq!(config.email.subject, EmailConfig::default().subject);
    }

    #[test]
    fn test_env_non_numeric_interval_is_error() {
        let mut config = MonitorConfig::default();
        let err = config
            .apply_env_from(|k| (k == "CHECK_INTERVAL").then(|| "five".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "CHECK_INTERVAL", .. }));
        assert!(err.to_string().contains("five"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = valid();
        config.apply_cli(&CliOverrides {
            url: Some("https://other.example".to_string()),
            check_interval_mins: Some(1),
            heartbeat_interval_mins: Some(0),
            max_attempts: Some(5),
        });
        assert_eq!(config.target.url, "https://other.example");
        assert_eq!(config.schedule.check_interval(), Duration::from_secs(60));
        assert_eq!(config.schedule.heartbeat_interval(), None);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_validate_accepts_defaults_with_url() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_url() {
        let err = MonitorConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("target.url"));
    }

    #[test]
    fn test_validate_rejects_unparseable_url() {
        let mut config = valid();
        config.target.url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "target.url", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_attempts() {
        let mut config = valid();
        config.schedule.check_interval_mins = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_env_interval_is_rejected_without_overflow() {
        let mut config = valid();
        config
            .apply_env_from(|key| {
                (key == "CHECK_INTERVAL").then(|| "307445734561825861".to_string())
            })
            .unwrap();
        assert_eq!(config.schedule.check_interval(), Duration::from_secs(u64::MAX));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "schedule.check_interval_mins",
                ..
            })
        ));

        let mut config = valid();
        config.schedule.heartbeat_interval_mins = MAX_INTERVAL_MINS + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "schedule.heartbeat_interval_mins",
                ..
            })
        ));
    }

    #[test]
    fn test_interval_at_upper_bound_is_accepted() {
        let mut config = valid();
        config.schedule.check_interval_mins = MAX_INTERVAL_MINS;
        config.schedule.heartbeat_interval_mins = MAX_INTERVAL_MINS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_email_is_configured_requires_all_fields() {
        let mut email = EmailConfig::default();
        assert!(!email.is_configured());
        email.username = "a".to_string();
        email.password = "b".to_string();
        assert!(!email.is_configured());
        email.recipient = "c".to_string();
        assert!(email.is_configured());
    }
}
