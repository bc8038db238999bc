//! Transport abstraction.
//!
//! A transport opens one bidirectional frame stream per connection attempt.
//! It reports what happens to that stream through a [`TransportSink`]; the
//! sink tags every event with the attempt's generation so the connection
//! manager can ignore events from streams it has already abandoned.

use tokio::sync::mpsc;

use tidewire_protocol::constants::{PROTOCOL_VERSION, codes};
use tidewire_protocol::{ErrorInfo, Frame, WireFormat};

use crate::auth::Credentials;
use crate::event_loop::Event;

/// Parameters for opening a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub endpoint: String,
    pub credentials: Credentials,
    pub format: WireFormat,
    pub client_id: Option<String>,
    /// Connection key and last processed serial of the connection to resume.
    pub resume: Option<(String, i64)>,
    /// Ask the service for protocol-level heartbeats.
    pub heartbeats: bool,
}

impl ConnectRequest {
    /// Endpoint URL with the connection parameters in the query string.
    pub fn url(&self) -> String {
        let (auth_name, auth_value) = self.credentials.query_param();
        let mut params = vec![
            (auth_name, auth_value.to_string()),
            ("format", self.format.as_str().to_string()),
            ("v", PROTOCOL_VERSION.to_string()),
            ("heartbeats", self.heartbeats.to_string()),
        ];
        if let Some(client_id) = &self.client_id {
            params.push(("client_id", client_id.clone()));
        }
        if let Some((key, serial)) = &self.resume {
            params.push(("resume", key.clone()));
            params.push(("connection_serial", serial.to_string()));
        }

        let query = params
            .iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.endpoint)
    }
}

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    /// The service refused the credentials while opening the stream.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            TransportError::Unauthorized(message) => {
                ErrorInfo::new(codes::INVALID_CREDENTIALS, 401, message.clone())
            }
            TransportError::Connect(_) | TransportError::Io(_) | TransportError::Closed => {
                ErrorInfo::new(codes::DISCONNECTED, 503, self.to_string())
            }
        }
    }
}

/// Something that happened to an open transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The stream is ready; frames may flow.
    Opened,
    Frame(Frame),
    /// The peer closed the stream.
    Closed { reason: Option<String> },
    Failed(TransportError),
}

/// Where a transport reports its events.
#[derive(Debug, Clone)]
pub struct TransportSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Event>,
}

impl TransportSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Posts an event to the connection. Returns `false` once the client is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Event::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Opens transports.
pub trait Transport: Send + Sync + 'static {
    /// Starts opening a stream. Returns immediately; progress is reported
    /// through `sink`.
    fn connect(&self, request: ConnectRequest, sink: TransportSink) -> Box<dyn TransportHandle>;
}

/// Handle to one opened (or opening) stream.
pub trait TransportHandle: Send {
    /// Queues a frame for sending.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Closes the stream. No further events are expected after this.
    fn close(&self);
}
