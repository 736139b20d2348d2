//! Connection state shared between the poll loop and the watchdog.
//!
//! The poll loop is the only writer of connect/disconnect transitions. The
//! watchdog reads snapshots and may push the disconnected-since timestamp
//! forward after it kills the helper process. Both fields live in a single
//! atomic word so every reader sees a consistent pair.

use std::sync::atomic::{AtomicI64, Ordering};

/// Encoded value for "connected".
const CONNECTED: i64 = -1;
/// Encoded value for "disconnected, interval not started".
const DISCONNECTED_UNTIMED: i64 = 0;

/// Snapshot of the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// Not connected. `since` is the epoch second at which the current
    /// disconnection began, or `None` if no link has been established yet.
    Disconnected { since: Option<u64> },
}

impl ConnectionStatus {
    fn encode(self) -> i64 {
        match self {
            ConnectionStatus::Connected => CONNECTED,
            ConnectionStatus::Disconnected { since: None } => DISCONNECTED_UNTIMED,
            // Epoch 0 is indistinguishable from "untimed"; clamp to 1.
            ConnectionStatus::Disconnected { since: Some(t) } => {
                i64::try_from(t).unwrap_or(i64::MAX).max(1)
            }
        }
    }

    fn decode(raw: i64) -> Self {
        match raw {
            CONNECTED => ConnectionStatus::Connected,
            DISCONNECTED_UNTIMED => ConnectionStatus::Disconnected { since: None },
            t => ConnectionStatus::Disconnected {
                since: Some(t as u64),
            },
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Start of the current disconnection interval, if one is running.
    pub fn disconnected_since(self) -> Option<u64> {
        match self {
            ConnectionStatus::Connected => None,
            ConnectionStatus::Disconnected { since } => since,
        }
    }
}

/// Lock-free holder for [`ConnectionStatus`].
#[derive(Debug)]
pub struct ConnectionState {
    raw: AtomicI64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    /// Starts disconnected with no interval running.
    pub fn new() -> Self {
        Self {
            raw: AtomicI64::new(DISCONNECTED_UNTIMED),
        }
    }

    pub fn snapshot(&self) -> ConnectionStatus {
        ConnectionStatus::decode(self.raw.load(Ordering::Acquire))
    }

    /// Record a successful connect. Clears disconnected-since.
    pub fn mark_connected(&self) {
        self.raw.store(CONNECTED, Ordering::Release);
    }

    /// Record a connection failure observed at `now`.
    ///
    /// Only the first failure after being connected starts a disconnection
    /// interval; further failures leave the running interval untouched.
    /// Returns `true` when this call started a new interval.
    pub fn mark_disconnected(&self, now: u64) -> bool {
        let next = ConnectionStatus::Disconnected { since: Some(now) }.encode();
        self.raw
            .compare_exchange(CONNECTED, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Restart the disconnection interval at `now`, provided it still starts
    /// at `expected`. Used by the watchdog to debounce kills; a concurrent
    /// reconnect wins over the reset.
    pub fn rearm(&self, expected: u64, now: u64) -> bool {
        let current = ConnectionStatus::Disconnected {
            since: Some(expected),
        }
        .encode();
        let next = ConnectionStatus::Disconnected { since: Some(now) }.encode();
        self.raw
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn set(&self, status: ConnectionStatus) {
        self.raw.store(status.encode(), Ordering::Release);
    }
}
