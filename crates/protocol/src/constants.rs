//! Protocol actions, envelope flags, error codes and default limits.

use serde::{Deserialize, Serialize};

/// Protocol version advertised in the connect request.
pub const PROTOCOL_VERSION: &str = "2";

/// Default maximum size of a single message's payload (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default maximum size of one protocol frame (512 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024;

/// Action carried by every protocol message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Heartbeat,
    Ack,
    Nack,
    Connect,
    Connected,
    Disconnect,
    Disconnected,
    Close,
    Closed,
    Error,
    Attach,
    Attached,
    Detach,
    Detached,
    Presence,
    Message,
    /// Any action this client does not understand.
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Whether envelopes with this action are acknowledged by `ACK`/`NACK`.
    pub fn needs_ack(self) -> bool {
        matches!(self, Action::Message | Action::Presence)
    }

    /// Whether the action is addressed to a single channel.
    pub fn is_channel_scoped(self) -> bool {
        matches!(
            self,
            Action::Attach
                | Action::Attached
                | Action::Detach
                | Action::Detached
                | Action::Presence
                | Action::Message
        )
    }
}

/// Bit flags carried in [`ProtocolMessage::flags`](crate::envelope::ProtocolMessage::flags).
pub mod flags {
    /// The channel has presence members to sync.
    pub const HAS_PRESENCE: u32 = 1 << 0;
    /// Backlog messages follow the attach.
    pub const HAS_BACKLOG: u32 = 1 << 1;
    /// The attachment (or connection) continued without message loss.
    pub const RESUMED: u32 = 1 << 2;
}

/// Service error codes understood by the client.
pub mod codes {
    pub const BAD_REQUEST: u32 = 40000;
    pub const MESSAGE_TOO_LARGE: u32 = 40009;
    pub const INVALID_CREDENTIALS: u32 = 40101;
    /// First code of the token error range (inclusive).
    pub const TOKEN_ERROR_START: u32 = 40140;
    /// Last code of the token error range (inclusive).
    pub const TOKEN_ERROR_END: u32 = 40149;
    pub const TOKEN_EXPIRED: u32 = 40142;
    pub const NOT_PERMITTED: u32 = 40160;
    pub const RATE_LIMITED: u32 = 42910;
    pub const INTERNAL: u32 = 50000;
    pub const CONNECTION_FAILED: u32 = 80000;
    pub const CONNECTION_SUSPENDED: u32 = 80002;
    pub const DISCONNECTED: u32 = 80003;
    pub const UNABLE_TO_RECOVER: u32 = 80008;
    pub const CONNECTION_TIMED_OUT: u32 = 80014;
    pub const CONNECTION_CLOSED: u32 = 80017;
    pub const CHANNEL_OPERATION_FAILED: u32 = 90000;
    pub const CHANNEL_ATTACH_TIMEOUT: u32 = 90007;
    pub const CHANNEL_DETACH_TIMEOUT: u32 = 90008;
    pub const CHANNEL_DETACHED: u32 = 90001;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Action::Connected).unwrap(),
            r#""connected""#
        );
        assert_eq!(
            serde_json::to_string(&Action::Heartbeat).unwrap(),
            r#""heartbeat""#
        );
    }

    #[test]
    fn unrecognised_action_decodes_as_unknown() {
        let action: Action = serde_json::from_str(r#""sync""#).unwrap();
        assert_eq!(action, Action::Unknown);
    }

    #[test]
    fn ack_required_only_for_data_actions() {
        assert!(Action::Message.needs_ack());
        assert!(Action::Presence.needs_ack());
        assert!(!Action::Attach.needs_ack());
        assert!(!Action::Heartbeat.needs_ack());
    }

    #[test]
    fn channel_scoped_actions() {
        assert!(Action::Attached.is_channel_scoped());
        assert!(Action::Message.is_channel_scoped());
        assert!(!Action::Connected.is_channel_scoped());
        assert!(!Action::Ack.is_channel_scoped());
    }
}
