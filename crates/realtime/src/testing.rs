//! Test doubles: an in-memory transport and a harness that drives the
//! connection manager without the event loop.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};

use tidewire_protocol::{Action, Codec, Frame, JsonCodec, Message, ProtocolMessage};

use crate::auth::{AuthProvider, StaticAuth};
use crate::completion::Completion;
use crate::config::ClientOptions;
use crate::emitter::Listener;
use crate::event_loop::{Command, Event};
use crate::manager::ConnectionManager;
use crate::timers::TimerKind;
use crate::transport::{
    ConnectRequest, Transport, TransportError, TransportEvent, TransportHandle, TransportSink,
};
use crate::types::{
    ChannelEvent, ChannelSnapshot, ChannelState, ConnectionSnapshot, ConnectionState,
    ConnectionStateChange,
};

#[derive(Default)]
struct MockState {
    requests: Vec<ConnectRequest>,
    sinks: Vec<TransportSink>,
    sent: Vec<(u64, Frame)>,
    closed: Vec<u64>,
}

/// Records every connection request and sent frame.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A handle for `generation`, as `connect` would return it.
    pub fn handle(&self, generation: u64) -> Box<dyn TransportHandle> {
        Box::new(MockHandle {
            generation,
            state: self.state.clone(),
        })
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn last_sink(&self) -> TransportSink {
        self.state
            .lock()
            .unwrap()
            .sinks
            .last()
            .cloned()
            .expect("no transport opened")
    }

    /// Sent frames decoded as JSON envelopes.
    pub fn sent_messages(&self) -> Vec<ProtocolMessage> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(_, frame)| JsonCodec.decode(frame).expect("sent frame decodes"))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent.clear();
    }

    pub fn closed(&self) -> Vec<u64> {
        self.state.lock().unwrap().closed.clone()
    }
}

impl Transport for MockTransport {
    fn connect(&self, request: ConnectRequest, sink: TransportSink) -> Box<dyn TransportHandle> {
        let generation = sink.generation();
        let mut state = self.state.lock().unwrap();
        state.requests.push(request);
        state.sinks.push(sink);
        drop(state);
        self.handle(generation)
    }
}

struct MockHandle {
    generation: u64,
    state: Arc<Mutex<MockState>>,
}

impl TransportHandle for MockHandle {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.closed.contains(&self.generation) {
            return Err(TransportError::Closed);
        }
        state.sent.push((self.generation, frame));
        Ok(())
    }

    fn close(&self) {
        self.state.lock().unwrap().closed.push(self.generation);
    }
}

/// Drives a [`ConnectionManager`] synchronously against a [`MockTransport`].
pub(crate) struct Harness {
    pub manager: ConnectionManager,
    pub mock: MockTransport,
    rx: mpsc::UnboundedReceiver<Event>,
    events: Arc<Mutex<Vec<ConnectionStateChange>>>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    channel_snapshots: Vec<(String, watch::Receiver<ChannelSnapshot>)>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    pub fn with_options(options: ClientOptions) -> Self {
        Self::with_auth(options, Arc::new(StaticAuth::key("app.key:secret")))
    }

    pub fn with_auth(options: ClientOptions, auth: Arc<dyn AuthProvider>) -> Self {
        let mock = MockTransport::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(ConnectionSnapshot::default());
        let manager = ConnectionManager::new(
            Arc::new(options),
            Arc::new(mock.clone()),
            auth,
            Box::new(JsonCodec),
            tx,
            snapshot_tx,
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut harness = Self {
            manager,
            mock,
            rx,
            events: events.clone(),
            snapshot,
            channel_snapshots: Vec::new(),
        };
        harness.command(Command::OnConnectionEvent {
            state: None,
            listener: Listener::new(move |change: &ConnectionStateChange| {
                events.lock().unwrap().push(change.clone());
            }),
        });
        harness
    }

    /// Handles everything waiting in the ingress queue.
    pub fn pump(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.manager.handle_event(event);
        }
    }

    /// Lets spawned tasks (credential renewal) run, then pumps.
    pub async fn settle(&mut self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        self.pump();
    }

    pub fn command(&mut self, command: Command) {
        self.manager.handle_command(command);
        self.pump();
    }

    /// Fires a timer that must be armed.
    pub fn fire(&mut self, kind: TimerKind) {
        assert!(
            self.manager.fire_timer(kind.clone()),
            "timer {kind:?} is not armed"
        );
        self.pump();
    }

    /// Delivers an envelope from the service on the current transport.
    pub fn server(&mut self, msg: ProtocolMessage) {
        let frame = JsonCodec.encode(&msg).expect("encodable envelope");
        self.mock.last_sink().emit(TransportEvent::Frame(frame));
        self.pump();
    }

    /// The service drops the current transport.
    pub fn transport_closed(&mut self) {
        self.mock
            .last_sink()
            .emit(TransportEvent::Closed { reason: None });
        self.pump();
    }

    pub fn connect(&mut self) -> Completion {
        let (done, completion) = Completion::pair();
        self.command(Command::Connect { done: Some(done) });
        completion
    }

    /// Connects and answers with CONNECTED for `id`.
    pub fn establish(&mut self, id: &str) {
        let _ = self.connect();
        self.server(ProtocolMessage::connected(id, format!("{id}-key")));
        assert_eq!(self.state(), ConnectionState::Connected);
    }

    pub fn close(&mut self) -> Completion {
        let (done, completion) = Completion::pair();
        self.command(Command::Close { done: Some(done) });
        completion
    }

    pub fn register(&mut self, channel: &str) {
        if self.channel_snapshots.iter().any(|(name, _)| name == channel) {
            return;
        }
        let (tx, rx) = watch::channel(ChannelSnapshot::default());
        self.channel_snapshots.push((channel.to_string(), rx));
        self.command(Command::RegisterChannel {
            name: channel.to_string(),
            snapshot: tx,
        });
    }

    pub fn attach(&mut self, channel: &str) -> Completion {
        self.register(channel);
        let (done, completion) = Completion::pair();
        self.command(Command::Attach {
            channel: channel.to_string(),
            done: Some(done),
        });
        completion
    }

    pub fn detach(&mut self, channel: &str) -> Completion {
        self.register(channel);
        let (done, completion) = Completion::pair();
        self.command(Command::Detach {
            channel: channel.to_string(),
            done: Some(done),
        });
        completion
    }

    /// Publishes a message named `name` on `channel`.
    pub fn publish(&mut self, channel: &str, name: &str) -> Completion {
        self.publish_message(channel, Message::new(name, "payload"))
    }

    pub fn publish_message(&mut self, channel: &str, message: Message) -> Completion {
        self.register(channel);
        let (done, completion) = Completion::pair();
        self.command(Command::Publish {
            channel: channel.to_string(),
            message,
            done,
        });
        completion
    }

    /// Records messages delivered for `name` (or every name).
    pub fn subscribe(&mut self, channel: &str, name: Option<&str>) -> Arc<Mutex<Vec<Message>>> {
        self.register(channel);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        self.command(Command::Subscribe {
            channel: channel.to_string(),
            name: name.map(str::to_string),
            listener: Listener::new(move |message: &Message| {
                sink.lock().unwrap().push(message.clone());
            }),
        });
        received
    }

    /// Records every event emitted by `channel`.
    pub fn channel_events(&mut self, channel: &str) -> Arc<Mutex<Vec<ChannelEvent>>> {
        self.register(channel);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        self.command(Command::OnChannelEvent {
            channel: channel.to_string(),
            kind: None,
            listener: Listener::new(move |event: &ChannelEvent| {
                sink.lock().unwrap().push(event.clone());
            }),
        });
        events
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn channel_state(&self, channel: &str) -> ChannelState {
        self.channel_snapshots
            .iter()
            .find(|(name, _)| name == channel)
            .map(|(_, rx)| rx.borrow().state)
            .or_else(|| self.manager.channel(channel).map(|c| c.state()))
            .unwrap_or(ChannelState::Initialized)
    }

    pub fn connection_events(&self) -> Vec<ConnectionStateChange> {
        self.events.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.mock.sent_messages()
    }

    /// Sent MESSAGE envelopes only.
    pub fn sent_data(&self) -> Vec<ProtocolMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.action == Action::Message)
            .collect()
    }
}
