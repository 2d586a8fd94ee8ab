use crate::config::RetryConfig;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;

/// Failure classes for a single check attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Page navigation did not finish within the load timeout.
    NavigationTimeout,
    /// The content marker never appeared within the content-wait timeout.
    ContentWaitTimeout,
    /// The browser could not be started or the host ran out of resources.
    ResourceExhaustion,
    /// Shutdown was requested while the attempt was running.
    Cancelled,
    Unclassified,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NavigationTimeout => "navigation timeout",
            ErrorKind::ContentWaitTimeout => "content wait timeout",
            ErrorKind::ResourceExhaustion => "resource exhaustion",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

static EXHAUSTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"pthread_create").unwrap(),
        Regex::new(r"(?i)resource temporarily unavailable").unwrap(),
        Regex::new(r"(?i)cannot allocate memory").unwrap(),
        Regex::new(r"(?i)too many open files").unwrap(),
        Regex::new(r"(?i)no space left on device").unwrap(),
    ]
});

static TIMEOUT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)time(d)?[\s_-]?out").unwrap());

/// Classify an untyped error message from the browser layer.
pub fn classify_message(message: &str) -> ErrorKind {
    if EXHAUSTION_PATTERNS.iter().any(|p| p.is_match(message)) {
        ErrorKind::ResourceExhaustion
    } else if TIMEOUT_PATTERN.is_match(message) {
        ErrorKind::NavigationTimeout
    } else {
        ErrorKind::Unclassified
    }
}

/// Decision returned by the retry policy after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run another attempt (1-based number) after waiting `delay`.
    Retry { attempt: u32, delay: Duration },
    /// No attempts left, or the failure is not worth retrying.
    GiveUp,
}

/// Retry policy for one check cycle.
///
/// Every retry waits `backoff`; a `ResourceExhaustion` failure adds
/// `exhaustion_cooldown` on top so the host can recover.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
    exhaustion_cooldown: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, exhaustion_cooldown: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            exhaustion_cooldown,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.backoff_secs),
            Duration::from_secs(config.exhaustion_cooldown_secs),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what follows failed attempt number `attempt` (1-based).
    pub fn evaluate(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if kind == ErrorKind::Cancelled {
            return RetryDecision::GiveUp;
        }

        if attempt >= self.max_attempts {
            warn!(
                attempt,
                max_attempts = self.max_attempts,
                kind = %kind,
                "check attempts exhausted"
            );
            return RetryDecision::GiveUp;
        }

        let delay = match kind {
            ErrorKind::ResourceExhaustion => self.backoff + self.exhaustion_cooldown,
            _ => self.backoff,
        };
        warn!(
            attempt,
            max_attempts = self.max_attempts,
            kind = %kind,
            delay_secs = delay.as_secs(),
            "check attempt failed, retrying"
        );
        RetryDecision::Retry {
            attempt: attempt + 1,
            delay,
        }
    }
}
