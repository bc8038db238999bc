//! Connection manager.
//!
//! Owns the transport, the connection's identity and every channel. Drives
//! the connection state machine: opening transports, handling CONNECTED and
//! DISCONNECTED, backoff and suspension, credential renewal, closing, and
//! propagating connection state to channels.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use tidewire_protocol::{Action, Codec, ErrorInfo, ProtocolMessage};

use crate::auth::{AuthError, AuthProvider, Credentials};
use crate::channel::ChannelCore;
use crate::completion::{Completer, CompletionResult};
use crate::config::{ClientOptions, LostContinuity};
use crate::connection::Connection;
use crate::emitter::EventEmitter;
use crate::error::{RealtimeError, local};
use crate::event_loop::{Command, Event};
use crate::queue::{Outbound, QueuedMessage};
use crate::resume_store::{ResumeData, ResumeStore};
use crate::timers::TimerKind;
use crate::transport::{ConnectRequest, Transport, TransportError, TransportEvent, TransportSink};
use crate::types::{ChannelSnapshot, ConnectionSnapshot, ConnectionState, ConnectionStateChange};

pub(crate) struct ConnectionManager {
    conn: Connection,
    channels: BTreeMap<String, ChannelCore>,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    ingress: mpsc::UnboundedSender<Event>,
    /// Bumped every time a transport is opened or abandoned.
    generation: u64,
    /// Consecutive failed attempts since the last CONNECTED.
    retry_count: u32,
    disconnected_since: Option<Instant>,
    /// Credentials were already renewed once in this failure episode.
    auth_retry_used: bool,
    renewed: Option<Credentials>,
    /// The current attempt asked to resume `previous_id`.
    resuming: bool,
    previous_id: Option<String>,
    /// The current attempt was started by the suspended retry timer.
    from_suspended: bool,
    emitter: EventEmitter<ConnectionState, ConnectionStateChange>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    connect_waiters: Vec<Completer>,
    close_waiters: Vec<Completer>,
    resume_store: Option<ResumeStore>,
}

impl ConnectionManager {
    pub fn new(
        options: Arc<ClientOptions>,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        codec: Box<dyn Codec>,
        ingress: mpsc::UnboundedSender<Event>,
        snapshot: watch::Sender<ConnectionSnapshot>,
    ) -> Self {
        let resume_store = options.resume_store_path.clone().map(ResumeStore::new);
        let mut conn = Connection::new(options, codec);

        if let Some(store) = &resume_store {
            match store.load() {
                Ok(Some(resume)) => {
                    debug!(id = %resume.id, serial = resume.serial, "loaded resume data");
                    conn.id = Some(resume.id);
                    conn.key = Some(resume.key);
                    conn.serial = Some(resume.serial);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %store.path().display(), error = %e, "ignoring unreadable resume data");
                }
            }
        }

        let manager = Self {
            conn,
            channels: BTreeMap::new(),
            transport,
            auth,
            ingress,
            generation: 0,
            retry_count: 0,
            disconnected_since: None,
            auth_retry_used: false,
            renewed: None,
            resuming: false,
            previous_id: None,
            from_suspended: false,
            emitter: EventEmitter::new(),
            snapshot,
            connect_waiters: Vec::new(),
            close_waiters: Vec::new(),
            resume_store,
        };
        manager.publish_snapshot();
        manager
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::Transport { generation, event } => {
                if generation != self.generation {
                    trace!(generation, current = self.generation, "dropping stale transport event");
                    return;
                }
                self.on_transport_event(event);
            }
            Event::AuthRenewed { generation, result } => self.on_auth_renewed(generation, result),
        }
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { done } => self.connect(done),
            Command::Close { done } => self.close(done),
            Command::OnConnectionEvent { state, listener } => self.emitter.on(state, listener),
            Command::OffConnectionEvent { state, listener } => {
                self.emitter.off(state.as_ref(), listener.as_ref());
            }
            Command::RegisterChannel { name, snapshot } => {
                self.channels
                    .entry(name.clone())
                    .or_insert_with(|| ChannelCore::new(name, snapshot));
            }
            Command::Attach { channel, done } => {
                self.with_channel(channel, |ch, conn| ch.attach(conn, done));
            }
            Command::Detach { channel, done } => {
                self.with_channel(channel, |ch, conn| ch.detach(conn, done));
            }
            Command::Publish {
                channel,
                message,
                done,
            } => self.with_channel(channel, |ch, conn| ch.publish(conn, message, done)),
            Command::Subscribe {
                channel,
                name,
                listener,
            } => self.with_channel(channel, |ch, _| ch.subscribe(name, listener)),
            Command::Unsubscribe {
                channel,
                name,
                listener,
            } => self.with_channel(channel, |ch, _| {
                ch.unsubscribe(name.as_ref(), listener.as_ref());
            }),
            Command::SubscribePresence {
                channel,
                action,
                listener,
            } => self.with_channel(channel, |ch, _| ch.subscribe_presence(action, listener)),
            Command::UnsubscribePresence {
                channel,
                action,
                listener,
            } => self.with_channel(channel, |ch, _| {
                ch.unsubscribe_presence(action.as_ref(), listener.as_ref());
            }),
            Command::OnChannelEvent {
                channel,
                kind,
                listener,
            } => self.with_channel(channel, |ch, _| ch.on(kind, listener)),
            Command::OffChannelEvent {
                channel,
                kind,
                listener,
            } => self.with_channel(channel, |ch, _| ch.off(kind.as_ref(), listener.as_ref())),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.conn.timers.next_deadline()
    }

    pub fn fire_due_timers(&mut self, now: Instant) {
        for kind in self.conn.timers.take_due(now) {
            self.on_timer(kind);
        }
    }

    /// Fails everything still pending; the client handle is gone.
    pub fn dispose(&mut self) {
        debug!(state = %self.conn.state, "disposing connection");
        self.abandon_transport();
        self.conn.timers.clear();
        let dropped = RealtimeError::Closed(local::client_dropped());
        self.conn.fail_pending(dropped.clone());
        for done in self.connect_waiters.drain(..).chain(self.close_waiters.drain(..)) {
            done.complete(Err(dropped.clone()));
        }
        for channel in self.channels.values_mut() {
            channel.dispose();
        }
        self.emitter.clear();
    }

    // ---- connect / close ----

    fn connect(&mut self, done: Option<Completer>) {
        match self.conn.state {
            ConnectionState::Connected => complete(done, Ok(())),
            ConnectionState::Connecting => self.connect_waiters.extend(done),
            ConnectionState::Closing => {
                complete(done, Err(RealtimeError::Closed(local::connection_closed())));
            }
            ConnectionState::Initialized
            | ConnectionState::Disconnected
            | ConnectionState::Suspended
            | ConnectionState::Closed
            | ConnectionState::Failed => {
                self.connect_waiters.extend(done);
                if self.conn.state.is_terminal() {
                    self.retry_count = 0;
                    self.disconnected_since = None;
                    self.auth_retry_used = false;
                }
                self.from_suspended = self.conn.state == ConnectionState::Suspended;
                self.conn.timers.cancel(&TimerKind::Retry);
                self.conn.timers.cancel(&TimerKind::SuspendedRetry);
                self.start_attempt();
            }
        }
    }

    fn start_attempt(&mut self) {
        self.abandon_transport();

        let credentials = self
            .renewed
            .take()
            .unwrap_or_else(|| self.auth.current_credentials());
        let resume = match (&self.conn.id, &self.conn.key) {
            (Some(_), Some(key)) => Some((key.clone(), self.conn.serial.unwrap_or(-1))),
            _ => None,
        };
        self.resuming = resume.is_some();
        self.previous_id = if self.resuming {
            self.conn.id.clone()
        } else {
            None
        };

        let options = &self.conn.options;
        let request = ConnectRequest {
            endpoint: options.endpoint.clone(),
            credentials,
            format: self.conn.codec().format(),
            client_id: options.client_id.clone(),
            resume,
            heartbeats: true,
        };
        let timeout = options.realtime_request_timeout;

        debug!(
            generation = self.generation,
            attempt = self.retry_count + 1,
            resume = self.resuming,
            "opening transport"
        );
        let sink = TransportSink::new(self.generation, self.ingress.clone());
        let handle = self.transport.connect(request, sink);
        self.conn.set_handle(handle);

        self.set_state(ConnectionState::Connecting, None, None);
        self.conn.timers.arm(TimerKind::Connect, timeout);
    }

    fn close(&mut self, done: Option<Completer>) {
        match self.conn.state {
            ConnectionState::Closed => complete(done, Ok(())),
            ConnectionState::Closing => self.close_waiters.extend(done),
            ConnectionState::Connected => {
                self.close_waiters.extend(done);
                let close = Outbound::control(ProtocolMessage::new(Action::Close));
                if self.conn.transmit(close).is_err() {
                    self.finish_close();
                    return;
                }
                self.conn.timers.cancel(&TimerKind::Idle);
                self.conn
                    .timers
                    .arm(TimerKind::Close, self.conn.options.close_timeout);
                self.set_state(ConnectionState::Closing, None, None);
            }
            ConnectionState::Initialized
            | ConnectionState::Connecting
            | ConnectionState::Disconnected
            | ConnectionState::Suspended
            | ConnectionState::Failed => {
                self.close_waiters.extend(done);
                self.finish_close();
            }
        }
    }

    fn finish_close(&mut self) {
        self.abandon_transport();
        self.conn.timers.clear();
        let closed = RealtimeError::Closed(local::connection_closed());
        self.conn.fail_pending(closed.clone());
        self.forget_identity();
        self.retry_count = 0;
        self.disconnected_since = None;
        self.from_suspended = false;

        self.set_state(ConnectionState::Closed, None, None);
        for done in self.connect_waiters.drain(..) {
            done.complete(Err(closed.clone()));
        }
        for done in self.close_waiters.drain(..) {
            done.complete(Ok(()));
        }
        for channel in self.channels.values_mut() {
            channel.on_connection_closed(&mut self.conn);
        }
    }

    // ---- transport ----

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => debug!(generation = self.generation, "transport opened"),
            TransportEvent::Frame(frame) => match self.conn.codec().decode(&frame) {
                Ok(message) => self.on_protocol_message(message),
                Err(e) => {
                    warn!(error = %e, "undecodable frame");
                    self.fail(local::decode_failed(e));
                }
            },
            TransportEvent::Closed { reason } => {
                if self.conn.state == ConnectionState::Closing {
                    self.finish_close();
                    return;
                }
                let reason = reason.unwrap_or_else(|| "transport closed by peer".to_string());
                self.on_disconnected(local::disconnected(reason));
            }
            TransportEvent::Failed(error) => {
                if self.conn.state == ConnectionState::Closing {
                    self.finish_close();
                } else if matches!(error, TransportError::Unauthorized(_)) {
                    self.on_auth_failure(error.to_error_info());
                } else {
                    self.on_disconnected(error.to_error_info());
                }
            }
        }
    }

    fn on_protocol_message(&mut self, msg: ProtocolMessage) {
        if self.conn.state == ConnectionState::Connected {
            self.arm_idle();
        }

        match msg.action {
            Action::Heartbeat => trace!("heartbeat"),
            Action::Ack => {
                self.conn
                    .acknowledge(msg.msg_serial.unwrap_or(0), msg.count.unwrap_or(1), Ok(()));
            }
            Action::Nack => {
                let error = msg
                    .error
                    .unwrap_or_else(|| local::bad_request("message rejected by the service"));
                self.conn.acknowledge(
                    msg.msg_serial.unwrap_or(0),
                    msg.count.unwrap_or(1),
                    Err(RealtimeError::classify(error)),
                );
            }
            Action::Connected => self.on_connected(msg),
            Action::Disconnected => {
                let error = msg
                    .error
                    .unwrap_or_else(|| local::disconnected("disconnected by the service"));
                self.on_connection_error(error);
            }
            Action::Error if msg.channel.is_none() => {
                let error = msg
                    .error
                    .unwrap_or_else(|| local::bad_request("unspecified connection error"));
                self.on_connection_error(error);
            }
            Action::Closed => self.finish_close(),
            Action::Message | Action::Presence => {
                if let (Some(incoming), Some(last)) = (msg.connection_serial, self.conn.serial)
                    && incoming <= last
                {
                    debug!(incoming, last, "dropping duplicate redelivery");
                    return;
                }
                if let Some(serial) = msg.connection_serial {
                    self.conn.serial = Some(serial);
                    self.publish_snapshot();
                }
                self.route(msg);
            }
            Action::Error | Action::Attached | Action::Detached => self.route(msg),
            Action::Connect
            | Action::Disconnect
            | Action::Close
            | Action::Attach
            | Action::Detach
            | Action::Unknown => {
                debug!(action = ?msg.action, "ignoring unexpected inbound action");
            }
        }
    }

    fn route(&mut self, msg: ProtocolMessage) {
        let Some(name) = msg.channel.clone() else {
            debug!(action = ?msg.action, "channel action without a channel name");
            return;
        };
        match self.channels.get_mut(&name) {
            Some(channel) => channel.on_protocol_message(&mut self.conn, msg),
            None => debug!(channel = %name, action = ?msg.action, "dropping message for unknown channel"),
        }
    }

    fn on_connected(&mut self, msg: ProtocolMessage) {
        self.conn.timers.cancel(&TimerKind::Connect);

        let details = msg.connection_details.clone().unwrap_or_default();
        let key = msg
            .connection_key
            .clone()
            .or_else(|| details.connection_key.clone());
        let granted = self.resuming
            && self.previous_id.is_some()
            && self.previous_id == msg.connection_id
            && msg.error.is_none();
        // A repeated CONNECTED on the live connection changes nothing.
        let repeated = !self.resuming
            && self.conn.state == ConnectionState::Connected
            && self.conn.id.is_some()
            && self.conn.id == msg.connection_id;
        let lost = self.resuming && !granted;
        let continued = granted || repeated;
        if lost {
            info!(
                previous = self.previous_id.as_deref().unwrap_or(""),
                "resume not granted, message continuity lost"
            );
        }

        self.conn.id = msg.connection_id.clone();
        self.conn.key = key;
        self.conn.details = details;
        match msg.connection_serial {
            Some(serial) => self.conn.serial = Some(serial),
            None if !continued => self.conn.serial = None,
            None => {}
        }
        self.resuming = false;
        self.previous_id = None;

        if !continued {
            self.requeue_to_channels();
        }

        self.retry_count = 0;
        self.disconnected_since = None;
        self.auth_retry_used = false;
        self.from_suspended = false;

        self.set_state(ConnectionState::Connected, msg.error.clone(), None);
        self.arm_idle();
        for done in self.connect_waiters.drain(..) {
            done.complete(Ok(()));
        }
        self.save_resume();

        let reason = match self.conn.options.lost_continuity {
            LostContinuity::Surface if lost => Some(local::unable_to_recover()),
            LostContinuity::Surface | LostContinuity::Reattach => None,
        };
        for channel in self.channels.values_mut() {
            channel.on_connection_connected(&mut self.conn, continued, reason.clone());
        }
        self.conn.flush_outbox();
    }

    /// Hands data envelopes from a connection that was not resumed back to
    /// their channels, ahead of anything queued since.
    fn requeue_to_channels(&mut self) {
        let mut by_channel: BTreeMap<String, Vec<QueuedMessage>> = BTreeMap::new();
        for outbound in self.conn.take_data_envelopes() {
            match outbound.message.channel.clone() {
                Some(name) if self.channels.contains_key(&name) => {
                    by_channel.entry(name).or_default().extend(outbound.into_queued());
                }
                _ => outbound.complete(Err(RealtimeError::classify(local::unable_to_recover()))),
            }
        }
        for (name, items) in by_channel {
            if let Some(channel) = self.channels.get_mut(&name) {
                trace!(channel = %name, count = items.len(), "requeueing unacknowledged messages");
                channel.requeue(items);
            }
        }
    }

    /// DISCONNECTED or connection-scoped ERROR from the service.
    fn on_connection_error(&mut self, error: ErrorInfo) {
        if error.is_unauthorized() || error.is_token_error() {
            self.on_auth_failure(error);
        } else if error.is_retryable() {
            self.on_disconnected(error);
        } else {
            self.fail(error);
        }
    }

    fn on_disconnected(&mut self, reason: ErrorInfo) {
        self.abandon_transport();
        self.conn.timers.cancel(&TimerKind::Connect);
        self.conn.timers.cancel(&TimerKind::Idle);
        self.conn.requeue_unacked();

        if self.from_suspended {
            debug!(error = %reason, "attempt from suspended failed");
            self.suspend();
            return;
        }

        self.retry_count += 1;
        let now = Instant::now();
        let since = *self.disconnected_since.get_or_insert(now);
        let ttl = self.conn.options.state_ttl(&self.conn.details);
        if self.retry_count > self.conn.options.max_disconnected_retries
            || now.duration_since(since) >= ttl
        {
            info!(attempt = self.retry_count, "connection state expired, suspending");
            self.suspend();
            return;
        }

        let delay = self
            .conn
            .options
            .disconnected_retry
            .delay_for_attempt(self.retry_count);
        warn!(
            attempt = self.retry_count,
            retry_in_ms = delay.as_millis() as u64,
            error = %reason,
            "connection lost"
        );
        self.conn.timers.arm(TimerKind::Retry, delay);
        self.set_state(ConnectionState::Disconnected, Some(reason), Some(delay));
        self.save_resume();
    }

    fn suspend(&mut self) {
        self.abandon_transport();
        self.conn.timers.cancel(&TimerKind::Connect);
        self.conn.timers.cancel(&TimerKind::Idle);
        self.conn.timers.cancel(&TimerKind::Retry);
        self.forget_identity();
        self.retry_count = 0;
        self.disconnected_since = None;
        self.from_suspended = false;

        let retry_in = self.conn.options.suspended_retry_timeout;
        self.conn.timers.arm(TimerKind::SuspendedRetry, retry_in);
        let reason = local::connection_suspended();
        self.set_state(ConnectionState::Suspended, Some(reason.clone()), Some(retry_in));

        let err = RealtimeError::classify(reason);
        for done in self.connect_waiters.drain(..) {
            done.complete(Err(err.clone()));
        }
        for channel in self.channels.values_mut() {
            channel.on_connection_suspended(&mut self.conn);
        }
    }

    fn fail(&mut self, error: ErrorInfo) {
        warn!(error = %error, "connection failed");
        self.abandon_transport();
        self.conn.timers.clear();
        let err = RealtimeError::classify(error.clone());
        self.conn.fail_pending(err.clone());
        self.forget_identity();
        self.from_suspended = false;

        self.set_state(ConnectionState::Failed, Some(error.clone()), None);
        for done in self.connect_waiters.drain(..).chain(self.close_waiters.drain(..)) {
            done.complete(Err(err.clone()));
        }
        for channel in self.channels.values_mut() {
            channel.on_connection_failed(&mut self.conn, &error);
        }
    }

    // ---- credentials ----

    fn on_auth_failure(&mut self, error: ErrorInfo) {
        if self.auth_retry_used {
            warn!(error = %error, "credentials rejected after renewal");
            self.fail(unauthorized(error));
            return;
        }
        self.auth_retry_used = true;
        info!(error = %error, "credentials rejected, renewing");

        self.abandon_transport();
        self.conn.timers.cancel(&TimerKind::Idle);
        self.conn.requeue_unacked();
        if self.conn.state == ConnectionState::Connected {
            self.set_state(ConnectionState::Disconnected, Some(error), None);
        }

        let generation = self.generation;
        let renew = self.auth.renew();
        let ingress = self.ingress.clone();
        tokio::spawn(async move {
            let result = renew.await;
            let _ = ingress.send(Event::AuthRenewed { generation, result });
        });
        self.conn
            .timers
            .arm(TimerKind::Connect, self.conn.options.realtime_request_timeout);
    }

    fn on_auth_renewed(&mut self, generation: u64, result: Result<Credentials, AuthError>) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale credential renewal");
            return;
        }
        match result {
            Ok(credentials) => {
                debug!("credentials renewed");
                self.renewed = Some(credentials);
                self.start_attempt();
            }
            Err(e) => {
                warn!(error = %e, "credential renewal failed");
                self.fail(unauthorized(e.to_error_info()));
            }
        }
    }

    // ---- timers ----

    pub(crate) fn on_timer(&mut self, kind: TimerKind) {
        trace!(timer = ?kind, "timer fired");
        let state = self.conn.state;
        match kind {
            TimerKind::Connect => {
                if matches!(
                    state,
                    ConnectionState::Connecting | ConnectionState::Disconnected
                ) {
                    self.on_disconnected(local::connect_timeout());
                }
            }
            TimerKind::Idle => {
                if state == ConnectionState::Connected {
                    self.on_disconnected(local::idle_timeout());
                }
            }
            TimerKind::Retry => {
                if state == ConnectionState::Disconnected {
                    self.start_attempt();
                }
            }
            TimerKind::SuspendedRetry => {
                if state == ConnectionState::Suspended {
                    self.from_suspended = true;
                    self.start_attempt();
                }
            }
            TimerKind::Close => {
                if state == ConnectionState::Closing {
                    self.finish_close();
                }
            }
            TimerKind::Attach(name) => {
                if let Some(channel) = self.channels.get_mut(&name) {
                    channel.on_attach_timeout(&mut self.conn);
                }
            }
            TimerKind::Detach(name) => {
                if let Some(channel) = self.channels.get_mut(&name) {
                    channel.on_detach_timeout(&mut self.conn);
                }
            }
            TimerKind::ChannelRetry(name) => {
                if let Some(channel) = self.channels.get_mut(&name) {
                    channel.on_retry(&mut self.conn);
                }
            }
        }
    }

    // ---- internals ----

    fn with_channel(&mut self, name: String, f: impl FnOnce(&mut ChannelCore, &mut Connection)) {
        let channel = self.channels.entry(name.clone()).or_insert_with(|| {
            let (snapshot, _) = watch::channel(ChannelSnapshot::default());
            ChannelCore::new(name, snapshot)
        });
        f(channel, &mut self.conn);
    }

    /// Drops the current transport; its late events become stale.
    fn abandon_transport(&mut self) {
        self.conn.drop_transport();
        self.generation += 1;
    }

    fn arm_idle(&mut self) {
        let window = self.conn.options.idle_window(&self.conn.details);
        self.conn.timers.arm(TimerKind::Idle, window);
    }

    fn forget_identity(&mut self) {
        self.conn.clear_identity();
        self.resuming = false;
        self.previous_id = None;
        if let Some(store) = &self.resume_store
            && let Err(e) = store.clear()
        {
            warn!(error = %e, "failed to clear resume data");
        }
    }

    fn save_resume(&self) {
        let Some(store) = &self.resume_store else {
            return;
        };
        let (Some(id), Some(key)) = (&self.conn.id, &self.conn.key) else {
            return;
        };
        let resume = ResumeData {
            id: id.clone(),
            key: key.clone(),
            serial: self.conn.serial.unwrap_or(-1),
        };
        if let Err(e) = store.save(&resume) {
            warn!(error = %e, "failed to save resume data");
        }
    }

    fn set_state(
        &mut self,
        state: ConnectionState,
        reason: Option<ErrorInfo>,
        retry_in: Option<Duration>,
    ) {
        let previous = self.conn.state;
        self.conn.state = state;
        self.conn.error_reason = reason.clone();
        self.publish_snapshot();
        if previous == state {
            return;
        }

        match &reason {
            Some(reason) => info!(%previous, current = %state, reason = %reason, "connection state changed"),
            None => info!(%previous, current = %state, "connection state changed"),
        }
        let change = ConnectionStateChange {
            previous,
            current: state,
            reason,
            retry_in,
        };
        self.emitter.emit(Some(&state), &change);
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(ConnectionSnapshot {
            state: self.conn.state,
            error_reason: self.conn.error_reason.clone(),
            id: self.conn.id.clone(),
            key: self.conn.key.clone(),
            serial: self.conn.serial,
        });
    }
}

#[cfg(test)]
impl ConnectionManager {
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn channel(&self, name: &str) -> Option<&ChannelCore> {
        self.channels.get(name)
    }

    /// Fires `kind` now if it is armed.
    pub(crate) fn fire_timer(&mut self, kind: TimerKind) -> bool {
        let armed = self.conn.timers.cancel(&kind);
        if armed {
            self.on_timer(kind);
        }
        armed
    }
}

fn complete(done: Option<Completer>, result: CompletionResult) {
    if let Some(done) = done {
        done.complete(result);
    }
}

/// Authorization failures surface with status 401 whatever code caused them.
fn unauthorized(error: ErrorInfo) -> ErrorInfo {
    ErrorInfo {
        status_code: 401,
        ..error
    }
}
