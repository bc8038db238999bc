use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Encoding marker for payloads carried as base64 text.
pub const BASE64_ENCODING: &str = "base64";

/// One published item.
///
/// `id` stays empty while the message waits in a channel queue; it is
/// assigned when the message is placed into a transmitted envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Message {
    /// Creates a named message with a JSON payload.
    pub fn new(name: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            data: Some(data.into()),
            ..Self::default()
        }
    }

    /// Creates a named message with a binary payload, carried base64-encoded.
    pub fn binary(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: Some(name.into()),
            data: Some(Value::String(STANDARD.encode(bytes))),
            encoding: Some(BASE64_ENCODING.into()),
            ..Self::default()
        }
    }

    /// Decodes a base64 payload. `None` when the payload is not binary.
    pub fn binary_data(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        if self.encoding.as_deref() != Some(BASE64_ENCODING) {
            return None;
        }
        match &self.data {
            Some(Value::String(s)) => Some(STANDARD.decode(s)),
            _ => None,
        }
    }

    /// Size counted against the service's message and frame limits:
    /// name, client id and payload bytes.
    pub fn size(&self) -> usize {
        let name = self.name.as_deref().map_or(0, str::len);
        let client_id = self.client_id.as_deref().map_or(0, str::len);
        let data = match &self.data {
            None | Some(Value::Null) => 0,
            Some(Value::String(s)) => s.len(),
            Some(other) => other.to_string().len(),
        };
        name + client_id + data
    }
}

/// Presence action reported for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Absent,
    Present,
    Enter,
    Leave,
    Update,
}

/// A presence event for one member of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    pub action: PresenceAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl PresenceMessage {
    pub fn new(action: PresenceAction, client_id: impl Into<String>) -> Self {
        Self {
            action,
            id: None,
            client_id: Some(client_id.into()),
            connection_id: None,
            data: None,
            timestamp: None,
        }
    }
}
