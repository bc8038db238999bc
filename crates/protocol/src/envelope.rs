use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{Action, codes};
use crate::messages::{Message, PresenceMessage};

/// Error details reported by the service or raised locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: u32,
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: u32, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status_code,
            message: message.into(),
        }
    }

    /// Authorization failure (401 class).
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }

    /// Token rejected or expired; renewing credentials may help.
    pub fn is_token_error(&self) -> bool {
        (codes::TOKEN_ERROR_START..=codes::TOKEN_ERROR_END).contains(&self.code)
    }

    /// Service-side or connectivity failure that a later attempt may not hit.
    pub fn is_retryable(&self) -> bool {
        self.status_code >= 500
            || ((codes::CONNECTION_FAILED..codes::CHANNEL_OPERATION_FAILED).contains(&self.code)
                && self.code != codes::UNABLE_TO_RECOVER)
    }

    /// Rate or quota limit.
    pub fn is_capacity(&self) -> bool {
        self.status_code == 429
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} / {}] {}",
            self.code, self.status_code, self.message
        )
    }
}

/// Limits and identity advertised by the service on `CONNECTED`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_inbound_rate: Option<u32>,
    /// How long the service keeps connection state for resumption, in ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state_ttl: Option<u64>,
    /// Longest gap between heartbeats the service promises, in ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

/// Envelope for all realtime communication.
///
/// One envelope may carry several application messages; each message's id is
/// `"{envelope id}:{index}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presence: Vec<PresenceMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_serial: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_serial: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_details: Option<ConnectionDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ProtocolMessage {
    /// Creates an empty envelope with the given action.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            id: None,
            channel: None,
            messages: Vec::new(),
            presence: Vec::new(),
            connection_id: None,
            connection_key: None,
            connection_serial: None,
            msg_serial: None,
            count: None,
            flags: None,
            error: None,
            connection_details: None,
            timestamp: None,
        }
    }

    /// Creates an envelope addressed to a channel.
    pub fn for_channel(action: Action, channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::new(action)
        }
    }

    /// A `CONNECTED` envelope as the service sends it.
    pub fn connected(connection_id: impl Into<String>, connection_key: impl Into<String>) -> Self {
        let key = connection_key.into();
        Self {
            connection_id: Some(connection_id.into()),
            connection_key: Some(key.clone()),
            connection_details: Some(ConnectionDetails {
                connection_key: Some(key),
                ..ConnectionDetails::default()
            }),
            ..Self::new(Action::Connected)
        }
    }

    /// An `ERROR` envelope carrying the given error.
    pub fn error(error: ErrorInfo) -> Self {
        Self::new(Action::Error).with_error(error)
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_presence(mut self, presence: Vec<PresenceMessage>) -> Self {
        self.presence = presence;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_connection_serial(mut self, serial: i64) -> Self {
        self.connection_serial = Some(serial);
        self
    }

    /// Sets the acknowledged range `[msg_serial, msg_serial + count)`.
    pub fn with_ack_range(mut self, msg_serial: u64, count: u32) -> Self {
        self.msg_serial = Some(msg_serial);
        self.count = Some(count);
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn with_details(mut self, details: ConnectionDetails) -> Self {
        self.connection_details = Some(details);
        self
    }

    /// Returns `true` when every bit of `flag` is set.
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags.is_some_and(|f| f & flag == flag)
    }

    /// Sum of the payload sizes of the contained messages.
    pub fn payload_size(&self) -> usize {
        self.messages.iter().map(Message::size).sum()
    }
}
