//! Wire protocol types for the Tidewire realtime client.
//!
//! Defines the protocol message envelope, application and presence
//! messages, error details, and the JSON / MessagePack frame codecs.

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod messages;

pub use codec::{Codec, CodecError, Frame, JsonCodec, MsgPackCodec, WireFormat};
pub use constants::Action;
pub use envelope::{ConnectionDetails, ErrorInfo, ProtocolMessage};
pub use messages::{Message, PresenceAction, PresenceMessage};
