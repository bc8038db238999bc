//! Public client handles.
//!
//! [`Realtime`] and [`Channel`] are cheap handles onto the client's event
//! loop. Operations post a command and hand back a [`Completion`]; state is
//! read from snapshots the loop publishes after every change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use tidewire_protocol::{Codec, ErrorInfo, Message, PresenceAction, PresenceMessage};

use crate::auth::AuthProvider;
use crate::completion::{Completer, Completion};
use crate::config::ClientOptions;
use crate::emitter::Listener;
use crate::error::{RealtimeError, local};
use crate::event_loop::{self, Command, Event};
use crate::manager::ConnectionManager;
use crate::transport::Transport;
use crate::types::{
    ChannelEvent, ChannelEventKind, ChannelSnapshot, ChannelState, ConnectionSnapshot,
    ConnectionState, ConnectionStateChange,
};
use crate::ws_transport::WsTransport;

/// Realtime client: one connection, any number of channels.
///
/// Clones share the same connection. The connection is torn down when the
/// last clone is dropped; anything still pending then fails with
/// [`RealtimeError::Closed`].
#[derive(Clone)]
pub struct Realtime {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    commands: mpsc::UnboundedSender<Event>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    channels: Mutex<HashMap<String, Channel>>,
    shutdown: CancellationToken,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Realtime {
    /// Creates a client over WebSocket using the codec for `options.format`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: ClientOptions, auth: impl AuthProvider) -> Self {
        let codec = options.format.codec();
        let transport = WsTransport::new().with_max_message_size(options.max_frame_size * 2);
        Self::with_parts(options, Arc::new(transport), Arc::new(auth), codec)
    }

    /// Creates a client from explicit collaborators.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_parts(
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        codec: Box<dyn Codec>,
    ) -> Self {
        let auto_connect = options.auto_connect;
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(ConnectionSnapshot::default());
        let manager = ConnectionManager::new(
            Arc::new(options),
            transport,
            auth,
            codec,
            tx.clone(),
            snapshot_tx,
        );

        let shutdown = CancellationToken::new();
        tokio::spawn(event_loop::run(manager, rx, shutdown.clone()));

        let client = Self {
            inner: Arc::new(ClientInner {
                commands: tx,
                snapshot,
                channels: Mutex::new(HashMap::new()),
                shutdown,
            }),
        };
        if auto_connect {
            debug!("auto-connecting");
            drop(client.connect());
        }
        client
    }

    /// Opens the connection. Resolves once connected, or with the error that
    /// ended the attempt (failed, closed or suspended).
    pub fn connect(&self) -> Completion {
        request(&self.inner.commands, |done| Command::Connect { done: Some(done) })
    }

    /// Closes the connection. Resolves once closed.
    pub fn close(&self) -> Completion {
        request(&self.inner.commands, |done| Command::Close { done: Some(done) })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.snapshot.borrow().state
    }

    /// Reason for the latest state change, if any.
    pub fn error_reason(&self) -> Option<ErrorInfo> {
        self.inner.snapshot.borrow().error_reason.clone()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.inner.snapshot.borrow().id.clone()
    }

    pub fn connection_key(&self) -> Option<String> {
        self.inner.snapshot.borrow().key.clone()
    }

    /// Serial of the last message processed on this connection.
    pub fn connection_serial(&self) -> Option<i64> {
        self.inner.snapshot.borrow().serial
    }

    /// Registers a state change listener for transitions into `state`, or
    /// every transition when `None`. Keep the returned listener to remove it.
    pub fn on(
        &self,
        state: Option<ConnectionState>,
        f: impl Fn(&ConnectionStateChange) + Send + Sync + 'static,
    ) -> Listener<ConnectionStateChange> {
        let listener = Listener::new(f);
        send(
            &self.inner.commands,
            Command::OnConnectionEvent {
                state,
                listener: listener.clone(),
            },
        );
        listener
    }

    pub fn off(
        &self,
        state: Option<ConnectionState>,
        listener: Option<&Listener<ConnectionStateChange>>,
    ) {
        send(
            &self.inner.commands,
            Command::OffConnectionEvent {
                state,
                listener: listener.cloned(),
            },
        );
    }

    /// Waits until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<(), RealtimeError> {
        let mut rx = self.inner.snapshot.clone();
        rx.wait_for(|snapshot| snapshot.state == state)
            .await
            .map(|_| ())
            .map_err(|_| RealtimeError::Closed(local::client_dropped()))
    }

    /// Handle for the channel called `name`. Every call with the same name
    /// returns a handle to the same channel.
    pub fn channel(&self, name: &str) -> Channel {
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = channels.get(name) {
            return channel.clone();
        }

        let (snapshot_tx, snapshot) = watch::channel(ChannelSnapshot::default());
        send(
            &self.inner.commands,
            Command::RegisterChannel {
                name: name.to_string(),
                snapshot: snapshot_tx,
            },
        );
        let channel = Channel {
            name: Arc::from(name),
            commands: self.inner.commands.clone(),
            snapshot,
        };
        channels.insert(name.to_string(), channel.clone());
        channel
    }
}

/// Handle to one named channel.
#[derive(Clone)]
pub struct Channel {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Event>,
    snapshot: watch::Receiver<ChannelSnapshot>,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches the channel. Resolves once attached.
    pub fn attach(&self) -> Completion {
        let channel = self.name.to_string();
        request(&self.commands, |done| Command::Attach {
            channel,
            done: Some(done),
        })
    }

    /// Detaches the channel. Resolves once detached.
    pub fn detach(&self) -> Completion {
        let channel = self.name.to_string();
        request(&self.commands, |done| Command::Detach {
            channel,
            done: Some(done),
        })
    }

    /// Publishes one message. Resolves when the service acknowledges it.
    pub fn publish(&self, name: impl Into<String>, data: impl Into<Value>) -> Completion {
        self.publish_message(Message::new(name, data))
    }

    pub fn publish_message(&self, message: Message) -> Completion {
        let channel = self.name.to_string();
        request(&self.commands, |done| Command::Publish {
            channel,
            message,
            done,
        })
    }

    /// Registers a listener for messages named `name`, or all messages when
    /// `None`. Does not attach the channel.
    pub fn subscribe(
        &self,
        name: Option<&str>,
        f: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Listener<Message> {
        let listener = Listener::new(f);
        send(
            &self.commands,
            Command::Subscribe {
                channel: self.name.to_string(),
                name: name.map(str::to_string),
                listener: listener.clone(),
            },
        );
        listener
    }

    /// Removes message listeners. Without a listener every registration
    /// under `name` goes; with one, only that listener's registrations.
    pub fn unsubscribe(&self, name: Option<&str>, listener: Option<&Listener<Message>>) {
        send(
            &self.commands,
            Command::Unsubscribe {
                channel: self.name.to_string(),
                name: name.map(str::to_string),
                listener: listener.cloned(),
            },
        );
    }

    pub fn subscribe_presence(
        &self,
        action: Option<PresenceAction>,
        f: impl Fn(&PresenceMessage) + Send + Sync + 'static,
    ) -> Listener<PresenceMessage> {
        let listener = Listener::new(f);
        send(
            &self.commands,
            Command::SubscribePresence {
                channel: self.name.to_string(),
                action,
                listener: listener.clone(),
            },
        );
        listener
    }

    pub fn unsubscribe_presence(
        &self,
        action: Option<PresenceAction>,
        listener: Option<&Listener<PresenceMessage>>,
    ) {
        send(
            &self.commands,
            Command::UnsubscribePresence {
                channel: self.name.to_string(),
                action,
                listener: listener.cloned(),
            },
        );
    }

    /// Registers a listener for channel events of `kind`, or all events.
    pub fn on(
        &self,
        kind: Option<ChannelEventKind>,
        f: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> Listener<ChannelEvent> {
        let listener = Listener::new(f);
        send(
            &self.commands,
            Command::OnChannelEvent {
                channel: self.name.to_string(),
                kind,
                listener: listener.clone(),
            },
        );
        listener
    }

    pub fn off(&self, kind: Option<ChannelEventKind>, listener: Option<&Listener<ChannelEvent>>) {
        send(
            &self.commands,
            Command::OffChannelEvent {
                channel: self.name.to_string(),
                kind,
                listener: listener.cloned(),
            },
        );
    }

    pub fn state(&self) -> ChannelState {
        self.snapshot.borrow().state
    }

    pub fn error_reason(&self) -> Option<ErrorInfo> {
        self.snapshot.borrow().error_reason.clone()
    }

    /// Waits until the channel reaches `state`.
    pub async fn wait_for_state(&self, state: ChannelState) -> Result<(), RealtimeError> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(|snapshot| snapshot.state == state)
            .await
            .map(|_| ())
            .map_err(|_| RealtimeError::Closed(local::client_dropped()))
    }
}

fn request(
    commands: &mpsc::UnboundedSender<Event>,
    command: impl FnOnce(Completer) -> Command,
) -> Completion {
    let (done, completion) = Completion::pair();
    send(commands, command(done));
    completion
}

/// A send fails only once the event loop is gone; the command's completer
/// is dropped with it, which resolves its completion as closed.
fn send(commands: &mpsc::UnboundedSender<Event>, command: Command) {
    if commands.send(Event::Command(command)).is_err() {
        trace!("event loop gone, dropping command");
    }
}
