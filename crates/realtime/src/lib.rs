//! Tidewire realtime client.
//!
//! Maintains one connection to the service and multiplexes named channels
//! over it: publish with acknowledgement, subscribe by message name,
//! presence events, automatic reconnection with connection resume.
//!
//! All state lives on a single event loop task; [`Realtime`] and
//! [`Channel`] are handles that post commands to it.

mod auth;
mod channel;
mod client;
mod completion;
mod config;
mod connection;
mod emitter;
mod error;
mod event_loop;
mod manager;
mod pumps;
mod queue;
mod resume_store;
#[cfg(test)]
mod testing;
mod timers;
mod transport;
mod types;
mod ws_transport;

pub use auth::{AuthError, AuthProvider, Credentials, StaticAuth, TokenRenewer};
pub use client::{Channel, Realtime};
pub use completion::{Completion, CompletionResult};
pub use config::{ClientOptions, ConfigError, LostContinuity, ReconnectConfig};
pub use emitter::{EventEmitter, Listener};
pub use error::RealtimeError;
pub use resume_store::{ResumeData, ResumeStore, ResumeStoreError};
pub use transport::{
    ConnectRequest, Transport, TransportError, TransportEvent, TransportHandle, TransportSink,
};
pub use types::{
    ChannelEvent, ChannelEventKind, ChannelSnapshot, ChannelState, ChannelStateChange,
    ConnectionSnapshot, ConnectionState, ConnectionStateChange,
};
pub use ws_transport::WsTransport;

pub use tidewire_protocol as protocol;
