//! One check cycle: acquire a browser session, load the page, extract the
//! watched field, classify it, and release the session, retrying failed
//! attempts under a `RetryPolicy`.

use crate::extract::ExtractionRule;
use crate::retry::{ErrorKind, RetryDecision, RetryPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// Outcome of one check cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckResult {
    Open {
        text: String,
        at: DateTime<Utc>,
    },
    Closed {
        text: String,
        at: DateTime<Utc>,
    },
    Indeterminate {
        reason: String,
        at: DateTime<Utc>,
    },
    Failed {
        kind: ErrorKind,
        attempts: u32,
        at: DateTime<Utc>,
    },
}

impl CheckResult {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            CheckResult::Open { at, .. }
            | CheckResult::Closed { at, .. }
            | CheckResult::Indeterminate { at, .. }
            | CheckResult::Failed { at, .. } => *at,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CheckResult::Open { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            CheckResult::Open { .. } => "open",
            CheckResult::Closed { .. } => "closed",
            CheckResult::Indeterminate { .. } => "indeterminate",
            CheckResult::Failed { .. } => "failed",
        }
    }
}

/// Error from one attempt at the browser layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CheckError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error whose kind is inferred from the message text.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: crate::retry::classify_message(&message),
            message,
        }
    }
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CheckError {}

/// Opens a fresh browser session for one attempt.
#[allow(async_fn_in_trait)]
pub trait SessionFactory {
    type Session: PageSession;

    async fn open(&self) -> Result<Self::Session, CheckError>;
}

/// A live browser session holding one page.
#[allow(async_fn_in_trait)]
pub trait PageSession {
    /// Navigate to `url`, wait for `ready_selector`, and return the rendered HTML.
    async fn load(&mut self, url: &str, ready_selector: &str) -> Result<String, CheckError>;

    /// Release the browser. Called exactly once per opened session.
    async fn close(self) -> Result<(), CheckError>;
}

enum Attempt {
    Done(CheckResult),
    Error(CheckError),
}

/// Runs check cycles against one URL.
pub struct StatusChecker<F, R> {
    factory: F,
    rule: R,
    policy: RetryPolicy,
    url: String,
    open_marker: String,
    shutdown: watch::Receiver<bool>,
}

impl<F, R> StatusChecker<F, R>
where
    F: SessionFactory,
    R: ExtractionRule,
{
    pub fn new(
        factory: F,
        rule: R,
        policy: RetryPolicy,
        url: impl Into<String>,
        open_marker: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            factory,
            rule,
            policy,
            url: url.into(),
            open_marker: open_marker.into(),
            shutdown,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run one full check cycle. Never returns an error: failures are folded
    /// into `CheckResult::Failed` once the retry policy gives up.
    pub async fn run_cycle(&self) -> CheckResult {
        let mut shutdown = self.shutdown.clone();
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            tracing::info!(attempt, max_attempts, url = %self.url, "checking booking status");

            let error = match self.attempt(&mut shutdown).await {
                Attempt::Done(result) => return result,
                Attempt::Error(e) => e,
            };
            tracing::error!(attempt, max_attempts, kind = %error.kind, error = %error.message, "check attempt failed");

            match self.policy.evaluate(attempt, error.kind) {
                RetryDecision::Retry { attempt: next, delay } => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_requested(&mut shutdown) => {
                            return failed(ErrorKind::Cancelled, attempt);
                        }
                    }
                    attempt = next;
                }
                RetryDecision::GiveUp => return failed(error.kind, attempt),
            }
        }
    }

    /// One attempt. The session is closed before returning on every path.
    async fn attempt(&self, shutdown: &mut watch::Receiver<bool>) -> Attempt {
        let opened = tokio::select! {
            s = self.factory.open() => s,
            _ = shutdown_requested(shutdown) => {
                return Attempt::Error(CheckError::new(ErrorKind::Cancelled, "shutdown before browser launch"));
            }
        };
        let mut session = match opened {
            Ok(s) => s,
            Err(e) => return Attempt::Error(e),
        };

        let loaded = tokio::select! {
            r = session.load(&self.url, self.rule.ready_selector()) => r,
            _ = shutdown_requested(shutdown) => {
                Err(CheckError::new(ErrorKind::Cancelled, "shutdown during page load"))
            }
        };

        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "failed to close browser session");
        } else {
            tracing::debug!("browser session closed");
        }

        match loaded {
            Ok(html) => Attempt::Done(self.classify(self.rule.extract(&html))),
            Err(e) => Attempt::Error(e),
        }
    }

    fn classify(&self, field: Option<String>) -> CheckResult {
        let at = Utc::now();
        match field {
            Some(text) if contains_ignore_case(&text, &self.open_marker) => {
                tracing::info!(text = %text, "booking is open");
                CheckResult::Open { text, at }
            }
            Some(text) => {
                tracing::info!(text = %text, "booking not yet open");
                CheckResult::Closed { text, at }
            }
            None => {
                tracing::warn!("could not find the booking button on the page");
                CheckResult::Indeterminate {
                    reason: "field not found".to_string(),
                    at,
                }
            }
        }
    }
}

fn failed(kind: ErrorKind, attempts: u32) -> CheckResult {
    CheckResult::Failed {
        kind,
        attempts,
        at: Utc::now(),
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Resolves once shutdown has been requested. Pends forever if the sender is gone.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
