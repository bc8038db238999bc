//! WebSocket transport built on tokio-tungstenite.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tidewire_protocol::Frame;
use tidewire_protocol::constants::DEFAULT_MAX_FRAME_SIZE;

use crate::pumps::read::read_pump;
use crate::pumps::write::{Outbound, write_pump};
use crate::transport::{
    ConnectRequest, Transport, TransportError, TransportEvent, TransportHandle, TransportSink,
};

/// Opens WebSocket connections to the service.
#[derive(Debug, Clone)]
pub struct WsTransport {
    max_message_size: usize,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_FRAME_SIZE * 2,
        }
    }
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest inbound WebSocket message accepted.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_message_size);
        ws_config.max_frame_size = Some(self.max_message_size);
        ws_config
    }
}

impl Transport for WsTransport {
    fn connect(&self, request: ConnectRequest, sink: TransportSink) -> Box<dyn TransportHandle> {
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Outbound>();
        let cancel = CancellationToken::new();
        let url = request.url();
        let ws_config = self.ws_config();

        let task = {
            let cancel = cancel.clone();
            let pong_tx = write_tx.clone();
            tokio::spawn(async move {
                let generation = sink.generation();
                debug!(generation, endpoint = %request.endpoint, "opening WebSocket");

                let connecting =
                    tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false);
                let ws_stream = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = connecting => match result {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            let error = map_connect_error(e);
                            warn!(generation, error = %error, "WebSocket connect failed");
                            sink.emit(TransportEvent::Failed(error));
                            return;
                        }
                    },
                };

                sink.emit(TransportEvent::Opened);
                let (write, read) = ws_stream.split();
                let writer = tokio::spawn(write_pump(
                    write,
                    write_rx,
                    sink.clone(),
                    cancel.clone(),
                ));
                read_pump(read, sink, pong_tx, cancel.clone()).await;

                cancel.cancel();
                let _ = writer.await;
            })
        };

        Box::new(WsHandle {
            write_tx,
            cancel,
            _task: task,
        })
    }
}

/// Maps a handshake failure; an HTTP 401 on upgrade is an authorization failure.
fn map_connect_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            TransportError::Unauthorized(format!("HTTP {}", response.status()))
        }
        tungstenite::Error::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}

/// Handle to one WebSocket stream.
struct WsHandle {
    write_tx: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    _task: tokio::task::JoinHandle<()>,
}

impl TransportHandle for WsHandle {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.write_tx
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        // The write pump sends the close frame on its way out.
        self.cancel.cancel();
    }
}

impl Drop for WsHandle {
    fn drop(&mut self) {
        // Both pumps exit on cancellation; the writer still sends its close frame.
        self.cancel.cancel();
    }
}
