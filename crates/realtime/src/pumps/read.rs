//! WebSocket read pump: forwards incoming frames to the connection.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tidewire_protocol::Frame;

use super::write::Outbound;
use crate::transport::{TransportError, TransportEvent, TransportSink};

/// Reads messages from the WebSocket and reports them through `sink`.
///
/// Exits on cancellation without reporting anything; otherwise the stream's
/// end is reported as `Closed` and read errors as `Failed`.
pub(crate) async fn read_pump<S>(
    mut read: S,
    sink: TransportSink,
    pong_tx: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => match msg {
                        tungstenite::Message::Text(text) => {
                            trace!(len = text.len(), "received text frame");
                            sink.emit(TransportEvent::Frame(Frame::Text(text.to_string())));
                        }
                        tungstenite::Message::Binary(bytes) => {
                            trace!(len = bytes.len(), "received binary frame");
                            sink.emit(TransportEvent::Frame(Frame::Binary(bytes.to_vec())));
                        }
                        tungstenite::Message::Ping(data) => {
                            trace!("received ping, sending pong");
                            let _ = pong_tx.send(Outbound::Pong(data.to_vec()));
                        }
                        tungstenite::Message::Pong(_) => {
                            trace!("received pong");
                        }
                        tungstenite::Message::Close(frame) => {
                            debug!("received close frame");
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty());
                            break TransportEvent::Closed { reason };
                        }
                        _ => {}
                    },
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break TransportEvent::Failed(TransportError::Io(e.to_string()));
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break TransportEvent::Closed { reason: None };
                    }
                }
            }
        }
    };

    if !cancel.is_cancelled() {
        sink.emit(outcome);
    }
}
