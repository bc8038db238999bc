//! State and event types shared by the connection and its channels.

use std::fmt;

use tidewire_protocol::ErrorInfo;

/// Connection-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Suspended,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    /// Operations on the connection are rejected outright in these states.
    pub fn rejects_operations(self) -> bool {
        matches!(
            self,
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed
        )
    }

    /// Terminal until the consumer explicitly reconnects.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Suspended => "suspended",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
}

impl ChannelState {
    /// States that follow connection state changes.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ChannelState::Attaching
                | ChannelState::Attached
                | ChannelState::Detaching
                | ChannelState::Suspended
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Initialized => "initialized",
            ChannelState::Attaching => "attaching",
            ChannelState::Attached => "attached",
            ChannelState::Detaching => "detaching",
            ChannelState::Detached => "detached",
            ChannelState::Suspended => "suspended",
            ChannelState::Failed => "failed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStateChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
    pub reason: Option<ErrorInfo>,
    /// Delay before the next automatic attempt, when one is scheduled.
    pub retry_in: Option<std::time::Duration>,
}

/// A channel state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStateChange {
    pub previous: ChannelState,
    pub current: ChannelState,
    pub reason: Option<ErrorInfo>,
    /// `true` when an ATTACHED arrived for a channel that was already
    /// attached and message continuity was kept.
    pub resumed: bool,
}

/// Notification delivered to channel event listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StateChanged(ChannelStateChange),
    Error(ErrorInfo),
}

impl ChannelEvent {
    pub fn kind(&self) -> ChannelEventKind {
        match self {
            ChannelEvent::StateChanged(change) => ChannelEventKind::State(change.current),
            ChannelEvent::Error(_) => ChannelEventKind::Error,
        }
    }
}

/// Key for filtering channel events on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventKind {
    /// Transitions into the given state.
    State(ChannelState),
    Error,
}

/// Point-in-time view of the connection, readable without the event loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub error_reason: Option<ErrorInfo>,
    pub id: Option<String>,
    pub key: Option<String>,
    pub serial: Option<i64>,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Initialized,
            error_reason: None,
            id: None,
            key: None,
            serial: None,
        }
    }
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub state: ChannelState,
    pub error_reason: Option<ErrorInfo>,
}

impl Default for ChannelSnapshot {
    fn default() -> Self {
        Self {
            state: ChannelState::Initialized,
            error_reason: None,
        }
    }
}
