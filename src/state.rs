use crate::checker::CheckResult;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Process-lifetime counters owned by the scheduler.
///
/// Everything only grows except `consecutive_errors`, which drops back to
/// zero whenever a check manages to load the page, whatever the page said.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorState {
    pub started_at: DateTime<Utc>,
    pub total_checks: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub heartbeats_sent: u64,
}

impl MonitorState {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            total_checks: 0,
            last_check: None,
            last_success: None,
            consecutive_errors: 0,
            last_heartbeat: None,
            heartbeats_sent: 0,
        }
    }

    /// Fold one completed check cycle into the counters.
    pub fn record_check(&mut self, result: &CheckResult) {
        let at = result.at();
        self.total_checks += 1;
        self.last_check = Some(at);
        match result {
            CheckResult::Failed { .. } => self.consecutive_errors += 1,
            CheckResult::Open { .. }
            | CheckResult::Closed { .. }
            | CheckResult::Indeterminate { .. } => {
                self.last_success = Some(at);
                self.consecutive_errors = 0;
            }
        }
    }

    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat = Some(at);
        self.heartbeats_sent += 1;
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }
}
