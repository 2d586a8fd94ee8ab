//! Drives the monitor: connectivity probe, first check, then independent
//! check and heartbeat timers until bookings open or shutdown is requested.
//!
//! MonitorState is owned here and only mutated after a check or heartbeat
//! future completes. At most one check cycle and one heartbeat are in flight
//! at any time; the timer branch for each is disabled while its slot is full.

use crate::checker::{shutdown_requested, CheckResult, SessionFactory, StatusChecker};
use crate::config::ScheduleConfig;
use crate::connectivity::{ConnectivityError, ReachabilityProbe};
use crate::extract::ExtractionRule;
use crate::notifier::Notifier;
use crate::retry::ErrorKind;
use crate::state::MonitorState;
use crate::status::{SchedulerState, StatusTracker};
use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Why the monitor stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    BookingOpen { text: String, at: DateTime<Utc> },
    Shutdown,
}

/// Final state handed back to `main`.
#[derive(Debug)]
pub struct RunSummary {
    pub termination: Termination,
    pub state: MonitorState,
}

pub struct Scheduler<P, F, R, N> {
    probe: P,
    checker: StatusChecker<F, R>,
    notifier: N,
    check_interval: Duration,
    heartbeat_interval: Option<Duration>,
    shutdown_grace: Duration,
    status: StatusTracker,
    shutdown: watch::Receiver<bool>,
}

impl<P, F, R, N> Scheduler<P, F, R, N>
where
    P: ReachabilityProbe,
    F: SessionFactory,
    R: ExtractionRule,
    N: Notifier,
{
    pub fn new(
        probe: P,
        checker: StatusChecker<F, R>,
        notifier: N,
        schedule: &ScheduleConfig,
        status: StatusTracker,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            probe,
            checker,
            notifier,
            check_interval: schedule.check_interval(),
            heartbeat_interval: schedule.heartbeat_interval(),
            shutdown_grace: schedule.shutdown_grace(),
            status,
            shutdown,
        }
    }

    /// Run until bookings open or shutdown. Only a failed connectivity probe
    /// is an error.
    pub async fn run(self) -> Result<RunSummary, ConnectivityError> {
        let Scheduler {
            probe,
            checker,
            notifier,
            check_interval,
            heartbeat_interval,
            shutdown_grace,
            mut status,
            mut shutdown,
        } = self;

        let mut state = MonitorState::new(Utc::now());
        status.update(SchedulerState::Initializing, &state);

        if !probe_or_shutdown(&probe, &mut shutdown, &status).await? {
            return Ok(RunSummary {
                termination: Termination::Shutdown,
                state,
            });
        }

        tracing::info!(
            url = %checker.url(),
            check_interval_mins = check_interval.as_secs() / 60,
            heartbeat_interval_mins = heartbeat_interval.map(|d| d.as_secs() / 60).unwrap_or(0),
            "booking monitor started"
        );
        status.update(SchedulerState::Probing, &state);

        let mut check_timer = tokio::time::interval(check_interval);
        check_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_timer = heartbeat_interval.map(|period| {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        let mut cycle: Option<LocalBoxFuture<'_, CheckResult>> = None;
        let mut heartbeat: Option<LocalBoxFuture<'_, bool>> = None;
        let mut cycle_started = Utc::now();
        let mut next_check = Utc::now();

        let termination = loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break Termination::Shutdown,
                _ = check_timer.tick(), if cycle.is_none() => {
                    cycle_started = Utc::now();
                    cycle = Some(guarded_cycle(&checker));
                }
                result = poll_slot(&mut cycle) => {
                    cycle = None;
                    state.record_check(&result);
                    status.set_last_result(&result);

                    if let CheckResult::Open { text, at } = result {
                        send_open_alert(&notifier, &text, at).await;
                        break Termination::BookingOpen { text, at };
                    }

                    next_check = next_check_after(cycle_started, check_interval);
                    status.set_next_check(next_check);
                    status.update(SchedulerState::Waiting, &state);
                    tracing::info!(
                        outcome = result.label(),
                        total_checks = state.total_checks,
                        consecutive_errors = state.consecutive_errors,
                        next_check = %next_check,
                        "check complete, waiting"
                    );
                }
                _ = tick_slot(&mut heartbeat_timer), if heartbeat.is_none() => {
                    heartbeat = Some(guarded_heartbeat(&notifier, state.clone(), next_check));
                }
                sent = poll_slot(&mut heartbeat) => {
                    heartbeat = None;
                    if sent {
                        state.record_heartbeat(Utc::now());
                    }
                }
            }
        };

        drop(heartbeat);
        let termination = match (termination, cycle.take()) {
            (Termination::Shutdown, Some(in_flight)) => {
                drain_cycle(in_flight, shutdown_grace, &notifier, &mut state).await
            }
            (termination, _) => termination,
        };

        status.update(SchedulerState::Terminated, &state);
        status.remove();
        tracing::info!(
            total_checks = state.total_checks,
            heartbeats_sent = state.heartbeats_sent,
            "monitor stopped"
        );
        Ok(RunSummary { termination, state })
    }

    /// Probe, run a single cycle, and stop. `None` if shutdown came first.
    pub async fn run_once(self) -> Result<Option<CheckResult>, ConnectivityError> {
        let Scheduler {
            probe,
            checker,
            notifier,
            mut status,
            mut shutdown,
            ..
        } = self;

        let mut state = MonitorState::new(Utc::now());
        status.update(SchedulerState::Initializing, &state);
        if !probe_or_shutdown(&probe, &mut shutdown, &status).await? {
            return Ok(None);
        }

        status.update(SchedulerState::Probing, &state);
        let result = guarded_cycle(&checker).await;
        state.record_check(&result);
        status.set_last_result(&result);
        if let CheckResult::Open { ref text, at } = result {
            send_open_alert(&notifier, text, at).await;
        }

        status.update(SchedulerState::Terminated, &state);
        status.remove();
        Ok(Some(result))
    }
}

/// `Ok(false)` when shutdown arrived before the probe finished.
async fn probe_or_shutdown<P: ReachabilityProbe>(
    probe: &P,
    shutdown: &mut watch::Receiver<bool>,
    status: &StatusTracker,
) -> Result<bool, ConnectivityError> {
    let probed = tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => None,
        r = probe.check() => Some(r),
    };
    match probed {
        Some(Ok(())) => Ok(true),
        Some(Err(e)) => {
            tracing::error!(error = %e, "connectivity check failed, not starting");
            status.remove();
            Err(e)
        }
        None => {
            status.remove();
            Ok(false)
        }
    }
}

/// Give the cancelled cycle time to close its browser session.
async fn drain_cycle<N: Notifier>(
    in_flight: LocalBoxFuture<'_, CheckResult>,
    grace: Duration,
    notifier: &N,
    state: &mut MonitorState,
) -> Termination {
    tracing::info!(grace_secs = grace.as_secs(), "waiting for in-flight check to finish");
    match tokio::time::timeout(grace, in_flight).await {
        Ok(CheckResult::Failed {
            kind: ErrorKind::Cancelled,
            ..
        }) => {
            tracing::debug!("in-flight check cancelled");
            Termination::Shutdown
        }
        Ok(result) => {
            state.record_check(&result);
            match result {
                CheckResult::Open { text, at } => {
                    send_open_alert(notifier, &text, at).await;
                    Termination::BookingOpen { text, at }
                }
                _ => Termination::Shutdown,
            }
        }
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "in-flight check did not finish within grace period, abandoning it"
            );
            Termination::Shutdown
        }
    }
}

async fn send_open_alert<N: Notifier>(notifier: &N, text: &str, at: DateTime<Utc>) {
    match notifier.notify_open(text, at).await {
        Ok(()) => tracing::info!(text, "booking alert delivered"),
        Err(e) => tracing::error!(error = %e, "failed to deliver booking alert"),
    }
}

/// A check cycle whose panics become a transient failure.
fn guarded_cycle<'a, F, R>(checker: &'a StatusChecker<F, R>) -> LocalBoxFuture<'a, CheckResult>
where
    F: SessionFactory + 'a,
    R: ExtractionRule + 'a,
{
    AssertUnwindSafe(checker.run_cycle())
        .catch_unwind()
        .map(|outcome| {
            outcome.unwrap_or_else(|_| {
                tracing::error!("check cycle panicked, counting it as a failed check");
                CheckResult::Failed {
                    kind: ErrorKind::Unclassified,
                    attempts: 0,
                    at: Utc::now(),
                }
            })
        })
        .boxed_local()
}

/// A heartbeat send resolving to whether it was delivered.
fn guarded_heartbeat<'a, N: Notifier>(
    notifier: &'a N,
    snapshot: MonitorState,
    next_check: DateTime<Utc>,
) -> LocalBoxFuture<'a, bool> {
    async move {
        let sent = AssertUnwindSafe(notifier.notify_heartbeat(&snapshot, next_check))
            .catch_unwind()
            .await;
        match sent {
            Ok(Ok(())) => {
                tracing::info!(total_checks = snapshot.total_checks, "heartbeat sent");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to send heartbeat");
                false
            }
            Err(_) => {
                tracing::error!("heartbeat panicked, skipping it");
                false
            }
        }
    }
    .boxed_local()
}

/// Poll the in-flight future in `slot`, pending forever when it is empty.
async fn poll_slot<T>(slot: &mut Option<impl Future<Output = T> + Unpin>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn tick_slot(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// When the check timer fires next, never in the past.
fn next_check_after(started: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| started.checked_add_signed(d))
        .map_or(now, |at| at.max(now))
}
