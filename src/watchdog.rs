//! Background supervisor that kills a wedged BLE helper process.
//!
//! The native BLE helper sometimes hangs without erroring or timing out.
//! When the poll loop has been disconnected for longer than the threshold,
//! the watchdog terminates the helper found in this process's own tree, so
//! the poll loop's next reconnect starts from a fresh helper.

use crate::measurement::epoch_secs;
use crate::process::{LookupError, ProcessTable, kill_helper};
use crate::state::ConnectionState;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Time between watchdog checks.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Disconnection length after which the helper is killed.
pub const DISCONNECT_THRESHOLD: Duration = Duration::from_secs(60);

/// Outcome of one watchdog check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Connected, or disconnected for less than the threshold
    Idle,
    /// Helper with this pid was terminated and the interval restarted
    Killed(u32),
    /// Threshold exceeded but no helper was found in the tree
    HelperNotFound,
    /// Helper with this pid was found but could not be terminated
    KillFailed(u32),
    /// The process table could not be read
    LookupFailed,
    /// No helper name is configured for this backend
    NoHelper,
}

pub struct Watchdog {
    state: Arc<ConnectionState>,
    processes: Arc<dyn ProcessTable>,
    root_pid: u32,
    helper_name: Option<String>,
    threshold: Duration,
}

impl Watchdog {
    pub fn new(
        state: Arc<ConnectionState>,
        processes: Arc<dyn ProcessTable>,
        root_pid: u32,
        helper_name: Option<String>,
    ) -> Self {
        Self {
            state,
            processes,
            root_pid,
            helper_name,
            threshold: DISCONNECT_THRESHOLD,
        }
    }

    /// Run a single check as of `now` (epoch seconds).
    pub fn cycle(&self, now: u64) -> WatchdogAction {
        let status = self.state.snapshot();
        debug!("watchdog: {status:?}, pid {}", self.root_pid);

        let Some(since) = status.disconnected_since() else {
            return WatchdogAction::Idle;
        };
        if now.saturating_sub(since) <= self.threshold.as_secs() {
            return WatchdogAction::Idle;
        }

        let Some(helper) = self.helper_name.as_deref() else {
            debug!("watchdog: disconnected since {since}, no helper process to kill");
            return WatchdogAction::NoHelper;
        };

        match kill_helper(self.processes.as_ref(), self.root_pid, helper) {
            Ok(pid) => {
                info!("watchdog: killed {helper} with pid {pid}");
                self.state.rearm(since, now);
                WatchdogAction::Killed(pid)
            }
            Err(LookupError::NotFound { .. }) => {
                debug!("watchdog: couldn't find pid of {helper}");
                WatchdogAction::HelperNotFound
            }
            Err(LookupError::Terminate { pid, source }) => {
                warn!("watchdog: failed to kill {helper} with pid {pid}: {source}");
                WatchdogAction::KillFailed(pid)
            }
            Err(e @ LookupError::Io(_)) => {
                warn!("watchdog: {e}");
                WatchdogAction::LookupFailed
            }
        }
    }

    /// Spawn the watchdog loop. It stops when `shutdown` becomes `true` or
    /// its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                self.cycle(epoch_secs());
                tokio::select! {
                    _ = tokio::time::sleep(WATCHDOG_INTERVAL) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("watchdog stopped");
        })
    }
}
