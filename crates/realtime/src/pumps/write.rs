//! WebSocket write pump: drains outbound frames onto the socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use tidewire_protocol::Frame;

use crate::transport::{TransportError, TransportEvent, TransportSink};

/// Something queued for the socket.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Frame),
    /// Reply to a ping carrying this payload.
    Pong(Vec<u8>),
}

impl From<Outbound> for tungstenite::Message {
    fn from(outbound: Outbound) -> Self {
        match outbound {
            Outbound::Frame(Frame::Text(text)) => tungstenite::Message::Text(text.into()),
            Outbound::Frame(Frame::Binary(bytes)) => tungstenite::Message::Binary(bytes.into()),
            Outbound::Pong(payload) => tungstenite::Message::Pong(payload.into()),
        }
    }
}

/// Writes queued frames until cancelled or the queue closes, then sends a
/// close frame. A failed write cancels the stream and is reported through
/// `sink`.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    sink: TransportSink,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let outbound = tokio::select! {
            _ = cancel.cancelled() => break,
            outbound = queue.recv() => match outbound {
                Some(outbound) => outbound,
                None => break,
            },
        };
        trace!(generation = sink.generation(), "writing frame");
        if let Err(e) = write.send(outbound.into()).await {
            if !cancel.is_cancelled() {
                warn!(generation = sink.generation(), error = %e, "WebSocket write failed");
                cancel.cancel();
                sink.emit(TransportEvent::Failed(TransportError::Io(e.to_string())));
            }
            return;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
