//! Error taxonomy for realtime operations.

use tidewire_protocol::ErrorInfo;
use tidewire_protocol::constants::codes;

/// Failure delivered to an operation's [`Completion`](crate::Completion).
///
/// Every variant carries the [`ErrorInfo`] that caused it, so callers can
/// inspect the service code and status.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RealtimeError {
    /// Connectivity lost; the connection retries on its own.
    #[error("transport error: {0}")]
    Transport(ErrorInfo),

    /// Credentials rejected and renewal did not help.
    #[error("authorization failed: {0}")]
    Auth(ErrorInfo),

    /// Malformed envelope or a client error reported by the service.
    #[error("protocol error: {0}")]
    Protocol(ErrorInfo),

    /// Rate or quota limit hit by this particular call.
    #[error("capacity exceeded: {0}")]
    Capacity(ErrorInfo),

    /// The operation's timer expired.
    #[error("timed out: {0}")]
    Timeout(ErrorInfo),

    /// The connection was closed or the client dropped.
    #[error("connection closed: {0}")]
    Closed(ErrorInfo),
}

impl RealtimeError {
    /// Maps service error details onto the taxonomy.
    pub fn classify(info: ErrorInfo) -> Self {
        if info.is_unauthorized() || info.is_token_error() {
            RealtimeError::Auth(info)
        } else if info.is_capacity() {
            RealtimeError::Capacity(info)
        } else if info.status_code == 408
            || matches!(
                info.code,
                codes::CONNECTION_TIMED_OUT
                    | codes::CHANNEL_ATTACH_TIMEOUT
                    | codes::CHANNEL_DETACH_TIMEOUT
            )
        {
            RealtimeError::Timeout(info)
        } else if info.code == codes::CONNECTION_CLOSED {
            RealtimeError::Closed(info)
        } else if info.is_retryable() {
            RealtimeError::Transport(info)
        } else {
            RealtimeError::Protocol(info)
        }
    }

    /// The underlying error details.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            RealtimeError::Transport(info)
            | RealtimeError::Auth(info)
            | RealtimeError::Protocol(info)
            | RealtimeError::Capacity(info)
            | RealtimeError::Timeout(info)
            | RealtimeError::Closed(info) => info,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.info().status_code
    }

    pub fn code(&self) -> u32 {
        self.info().code
    }
}

impl From<ErrorInfo> for RealtimeError {
    fn from(info: ErrorInfo) -> Self {
        RealtimeError::classify(info)
    }
}

/// Locally raised error details.
pub(crate) mod local {
    use super::*;

    pub(crate) fn connection_closed() -> ErrorInfo {
        ErrorInfo::new(codes::CONNECTION_CLOSED, 400, "connection closed")
    }

    pub(crate) fn client_dropped() -> ErrorInfo {
        ErrorInfo::new(codes::CONNECTION_CLOSED, 400, "realtime client dropped")
    }

    pub(crate) fn connection_suspended() -> ErrorInfo {
        ErrorInfo::new(
            codes::CONNECTION_SUSPENDED,
            503,
            "connection suspended after repeated failures",
        )
    }

    pub(crate) fn connection_failed(message: impl Into<String>) -> ErrorInfo {
        ErrorInfo::new(codes::CONNECTION_FAILED, 400, message)
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> ErrorInfo {
        ErrorInfo::new(codes::BAD_REQUEST, 400, message)
    }

    pub(crate) fn disconnected(message: impl Into<String>) -> ErrorInfo {
        ErrorInfo::new(codes::DISCONNECTED, 503, message)
    }

    pub(crate) fn connect_timeout() -> ErrorInfo {
        ErrorInfo::new(
            codes::CONNECTION_TIMED_OUT,
            408,
            "no CONNECTED received before the request timeout",
        )
    }

    pub(crate) fn idle_timeout() -> ErrorInfo {
        ErrorInfo::new(
            codes::DISCONNECTED,
            503,
            "no activity from the service within the idle window",
        )
    }

    pub(crate) fn unable_to_recover() -> ErrorInfo {
        ErrorInfo::new(
            codes::UNABLE_TO_RECOVER,
            400,
            "connection could not be resumed; message continuity was lost",
        )
    }

    pub(crate) fn decode_failed(reason: impl std::fmt::Display) -> ErrorInfo {
        ErrorInfo::new(
            codes::BAD_REQUEST,
            400,
            format!("malformed protocol message: {reason}"),
        )
    }

    pub(crate) fn message_too_large(size: usize, max: usize) -> ErrorInfo {
        ErrorInfo::new(
            codes::MESSAGE_TOO_LARGE,
            400,
            format!("message of {size} bytes exceeds the {max} byte limit"),
        )
    }

    pub(crate) fn attach_timeout(channel: &str) -> ErrorInfo {
        ErrorInfo::new(
            codes::CHANNEL_ATTACH_TIMEOUT,
            408,
            format!("channel {channel} did not attach before the request timeout"),
        )
    }

    pub(crate) fn detach_timeout(channel: &str) -> ErrorInfo {
        ErrorInfo::new(
            codes::CHANNEL_DETACH_TIMEOUT,
            408,
            format!("channel {channel} did not detach before the request timeout"),
        )
    }

    pub(crate) fn channel_detached(channel: &str) -> ErrorInfo {
        ErrorInfo::new(
            codes::CHANNEL_DETACHED,
            400,
            format!("channel {channel} was detached"),
        )
    }

    pub(crate) fn detach_superseded(channel: &str) -> ErrorInfo {
        ErrorInfo::new(
            codes::CHANNEL_OPERATION_FAILED,
            400,
            format!("detach of channel {channel} superseded by attach"),
        )
    }

    pub(crate) fn channel_failed(channel: &str) -> ErrorInfo {
        ErrorInfo::new(
            codes::CHANNEL_OPERATION_FAILED,
            400,
            format!("channel {channel} is in the failed state"),
        )
    }
}
