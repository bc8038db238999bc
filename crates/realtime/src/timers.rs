//! Deadlines owned by the event loop, keyed by what they guard.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    /// Waiting for CONNECTED after opening a transport.
    Connect,
    /// Backoff before reconnecting from `disconnected`.
    Retry,
    /// Longer wait before reconnecting from `suspended`.
    SuspendedRetry,
    /// No inbound activity within the idle window.
    Idle,
    /// Waiting for CLOSED.
    Close,
    Attach(String),
    Detach(String),
    /// Re-attach of a channel suspended by an attach timeout or error.
    ChannelRetry(String),
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    deadlines: HashMap<TimerKind, Instant>,
}

impl Timers {
    /// Arms (or re-arms) a timer to fire `after` from now.
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.deadlines.insert(kind, Instant::now() + after);
    }

    pub fn cancel(&mut self, kind: &TimerKind) -> bool {
        self.deadlines.remove(kind).is_some()
    }

    pub fn is_armed(&self, kind: &TimerKind) -> bool {
        self.deadlines.contains_key(kind)
    }

    pub fn deadline(&self, kind: &TimerKind) -> Option<Instant> {
        self.deadlines.get(kind).copied()
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Disarms and returns every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(kind, at)| (*at, kind.clone()))
            .collect();
        due.sort_by_key(|(at, _)| *at);
        for (_, kind) in &due {
            self.deadlines.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }

    /// Cancels every timer belonging to `channel`.
    pub fn cancel_channel(&mut self, channel: &str) {
        self.deadlines.retain(|kind, _| match kind {
            TimerKind::Attach(name) | TimerKind::Detach(name) | TimerKind::ChannelRetry(name) => {
                name != channel
            }
            _ => true,
        });
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}
