//! Status file: writes `slotwatch.status` as JSON on every scheduler transition.
//!
//! Uses atomic write pattern: write to temp file then rename. The file is
//! only for outside observers (`slotwatch --status`); it is never read back
//! by the monitor itself.
use crate::checker::CheckResult;
use crate::state::MonitorState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Scheduler states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Initializing,
    Probing,
    Waiting,
    Terminated,
}

/// The JSON payload written to the status file.
#[derive(Debug, Serialize)]
pub struct StatusData<'a> {
    pub pid: u32,
    pub state: SchedulerState,
    pub url: &'a str,
    pub monitor: &'a MonitorState,
    pub last_result: Option<&'a CheckResult>,
    pub next_check: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    pub fn write(&self, data: &StatusData<'_>) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".slotwatch.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Remove the status file (on clean termination).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Read a running monitor's status file for display.
pub fn read(path: &Path) -> Result<String, StatusError> {
    std::fs::read_to_string(path).map_err(|e| StatusError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Builds StatusData for each scheduler transition.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    url: String,
    last_result: Option<CheckResult>,
    next_check: Option<DateTime<Utc>>,
}

impl StatusTracker {
    pub fn new(status_path: PathBuf, url: &str) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            url: url.to_string(),
            last_result: None,
            next_check: None,
        }
    }

    /// Update and write the status file with the given state.
    pub fn update(&self, state: SchedulerState, monitor: &MonitorState) {
        let data = StatusData {
            pid: self.pid,
            state,
            url: &self.url,
            monitor,
            last_result: self.last_result.as_ref(),
            next_check: self.next_check,
            last_update: Utc::now(),
        };

        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    pub fn set_last_result(&mut self, result: &CheckResult) {
        self.last_result = Some(result.clone());
    }

    pub fn set_next_check(&mut self, at: DateTime<Utc>) {
        self.next_check = Some(at);
    }

    pub fn remove(&self) {
        self.file.remove();
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
            StatusError::Read { path, source } => {
                write!(f, "no status at {} ({source}); is slotwatch running?", path.display())
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
            StatusError::Read { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn test_status_file_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slotwatch.status");
        let sf = StatusFile::new(path.clone());

        let mut monitor = MonitorState::new(Utc::now());
        monitor.total_checks = 7;
        monitor.consecutive_errors = 2;
        let result = CheckResult::Closed {
            text: "Bookings Open Soon".to_string(),
            at: Utc::now(),
        };

        let data = StatusData {
            pid: 12345,
            state: SchedulerState::Waiting,
            url: "https://example.com/slots",
            monitor: &monitor,
            last_result: Some(&result),
            next_check: Some(Utc::now()),
            last_update: Utc::now(),
        };

        sf.write(&data).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["pid"], 12345);
        assert_eq!(parsed["state"], "waiting");
        assert_eq!(parsed["url"], "https://example.com/slots");
        assert_eq!(parsed["monitor"]["total_checks"], 7);
        assert_eq!(parsed["monitor"]["consecutive_errors"], 2);
        assert_eq!(parsed["last_result"]["outcome"], "closed");
        assert_eq!(parsed["last_result"]["text"], "Bookings Open Soon");

        let tmp_path = dir
            .path()
            .join(format!(".slotwatch.status.tmp.{}", std::process::id()));
        assert!(
            !tmp_path.exists(),
            "temp file should be cleaned up by rename"
        );
    }

    #[test]
    fn test_all_scheduler_states_serialize() {
        let states = vec![
            (SchedulerState::Initializing, "initializing"),
            (SchedulerState::Probing, "probing"),
            (SchedulerState::Waiting, "waiting"),
            (SchedulerState::Terminated, "terminated"),
        ];

        for (state, expected_str) in states {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", expected_str));
        }
    }

    #[test]
    fn test_status_tracker_lifecycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slotwatch.status");
        let mut monitor = MonitorState::new(Utc::now());

        let mut tracker = StatusTracker::new(path.clone(), "https://example.com");

        tracker.update(SchedulerState::Initializing, &monitor);
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["state"], "initializing");
        assert!(parsed["last_result"].is_null());
        assert!(parsed["next_check"].is_null());

        let failed = CheckResult::Failed {
            kind: ErrorKind::NavigationTimeout,
            attempts: 3,
            at: Utc::now(),
        };
        monitor.record_check(&failed);
        tracker.set_last_result(&failed);
        tracker.set_next_check(Utc::now());
        tracker.update(SchedulerState::Waiting, &monitor);

        let parsed: serde_json::Value =
            serde_json::from_str(&read(&path).unwrap()).unwrap();
        assert_eq!(parsed["state"], "waiting");
        assert_eq!(parsed["last_result"]["kind"], "navigation_timeout");
        assert_eq!(parsed["monitor"]["consecutive_errors"], 1);
        assert!(parsed["next_check"].is_string());

        tracker.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_status_file_write_to_nonexistent_dir_fails() {
        let sf = StatusFile::new(PathBuf::from("/nonexistent/dir/slotwatch.status"));
        let monitor = MonitorState::new(Utc::now());
        let data = StatusData {
            pid: 1,
            state: SchedulerState::Initializing,
            url: "",
            monitor: &monitor,
            last_result: None,
            next_check: None,
            last_update: Utc::now(),
        };

        assert!(sf.write(&data).is_err());
    }

    #[test]
    fn test_read_missing_status_mentions_running() {
        let dir = tempdir().unwrap();
        let err = read(&dir.path().join("nope.status")).unwrap_err();
        assert!(err.to_string().contains("is slotwatch running?"));
    }
}
