//! The client's event loop.
//!
//! Everything that changes connection or channel state arrives here as an
//! [`Event`]: commands from client handles, transport events and credential
//! renewals. Events are handled one at a time, in arrival order, by the
//! [`ConnectionManager`]; timers fire between events.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tidewire_protocol::{Message, PresenceAction, PresenceMessage};

use crate::auth::{AuthError, Credentials};
use crate::completion::Completer;
use crate::emitter::Listener;
use crate::manager::ConnectionManager;
use crate::transport::TransportEvent;
use crate::types::{
    ChannelEvent, ChannelEventKind, ChannelSnapshot, ConnectionState, ConnectionStateChange,
};

/// Sleep target when no timer is armed.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

#[derive(Debug)]
pub(crate) enum Event {
    Command(Command),
    /// Something happened on the transport opened for `generation`.
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    /// Credential renewal started while `generation` was current finished.
    AuthRenewed {
        generation: u64,
        result: Result<Credentials, AuthError>,
    },
}

/// Requests from client and channel handles.
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        done: Option<Completer>,
    },
    Close {
        done: Option<Completer>,
    },
    OnConnectionEvent {
        state: Option<ConnectionState>,
        listener: Listener<ConnectionStateChange>,
    },
    OffConnectionEvent {
        state: Option<ConnectionState>,
        listener: Option<Listener<ConnectionStateChange>>,
    },
    RegisterChannel {
        name: String,
        snapshot: watch::Sender<ChannelSnapshot>,
    },
    Attach {
        channel: String,
        done: Option<Completer>,
    },
    Detach {
        channel: String,
        done: Option<Completer>,
    },
    Publish {
        channel: String,
        message: Message,
        done: Completer,
    },
    Subscribe {
        channel: String,
        name: Option<String>,
        listener: Listener<Message>,
    },
    Unsubscribe {
        channel: String,
        name: Option<String>,
        listener: Option<Listener<Message>>,
    },
    SubscribePresence {
        channel: String,
        action: Option<PresenceAction>,
        listener: Listener<PresenceMessage>,
    },
    UnsubscribePresence {
        channel: String,
        action: Option<PresenceAction>,
        listener: Option<Listener<PresenceMessage>>,
    },
    OnChannelEvent {
        channel: String,
        kind: Option<ChannelEventKind>,
        listener: Listener<ChannelEvent>,
    },
    OffChannelEvent {
        channel: String,
        kind: Option<ChannelEventKind>,
        listener: Option<Listener<ChannelEvent>>,
    },
}

/// Runs until `shutdown` is cancelled or every sender is gone, then fails
/// whatever is still pending.
pub(crate) async fn run(
    mut manager: ConnectionManager,
    mut rx: mpsc::UnboundedReceiver<Event>,
    shutdown: CancellationToken,
) {
    debug!("event loop started");
    loop {
        let deadline = manager
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => manager.handle_event(event),
                None => break,
            },
            _ = tokio::time::sleep_until(deadline) => {
                manager.fire_due_timers(Instant::now());
            }
        }
    }
    manager.dispose();
    debug!("event loop stopped");
}
