//! Channel state machine.
//!
//! One [`ChannelCore`] exists per channel name. It owns the channel's queue
//! of unsent messages and its listener tables, and drives attach/detach
//! through the shared [`Connection`].

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use tidewire_protocol::constants::flags;
use tidewire_protocol::{
    Action, ErrorInfo, Message, PresenceAction, PresenceMessage, ProtocolMessage,
};

use crate::completion::{Completer, CompletionResult};
use crate::connection::Connection;
use crate::emitter::{EventEmitter, Listener};
use crate::error::{RealtimeError, local};
use crate::queue::{MessageQueue, Outbound, QueuedMessage};
use crate::timers::TimerKind;
use crate::types::{
    ChannelEvent, ChannelEventKind, ChannelSnapshot, ChannelState, ChannelStateChange,
    ConnectionState,
};

pub(crate) struct ChannelCore {
    name: String,
    state: ChannelState,
    error_reason: Option<ErrorInfo>,
    queue: MessageQueue,
    subscriptions: EventEmitter<String, Message>,
    presence: EventEmitter<PresenceAction, PresenceMessage>,
    events: EventEmitter<ChannelEventKind, ChannelEvent>,
    pending_attach: Vec<Completer>,
    pending_detach: Vec<Completer>,
    snapshot: watch::Sender<ChannelSnapshot>,
}

impl ChannelCore {
    pub fn new(name: String, snapshot: watch::Sender<ChannelSnapshot>) -> Self {
        Self {
            name,
            state: ChannelState::Initialized,
            error_reason: None,
            queue: MessageQueue::default(),
            subscriptions: EventEmitter::new(),
            presence: EventEmitter::new(),
            events: EventEmitter::new(),
            pending_attach: Vec::new(),
            pending_detach: Vec::new(),
            snapshot,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[cfg(test)]
    pub fn error_reason(&self) -> Option<&ErrorInfo> {
        self.error_reason.as_ref()
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    // ---- user operations ----

    pub fn attach(&mut self, conn: &mut Connection, done: Option<Completer>) {
        if conn.state.rejects_operations() {
            complete(done, Err(conn.rejection()));
            return;
        }
        match self.state {
            ChannelState::Attached => complete(done, Ok(())),
            ChannelState::Attaching => self.pending_attach.extend(done),
            ChannelState::Suspended if conn.state == ConnectionState::Suspended => {
                self.pending_attach.extend(done);
            }
            ChannelState::Initialized
            | ChannelState::Detaching
            | ChannelState::Detached
            | ChannelState::Suspended
            | ChannelState::Failed => {
                self.pending_attach.extend(done);
                let superseded = local::detach_superseded(&self.name);
                self.fail_pending_detach(RealtimeError::classify(superseded));
                conn.timers.cancel(&TimerKind::Detach(self.name.clone()));

                if conn.state == ConnectionState::Suspended {
                    // Re-attached once the connection comes back.
                    self.set_state(ChannelState::Suspended, None, false);
                } else {
                    self.send_attach(conn);
                    self.set_state(ChannelState::Attaching, None, false);
                }
            }
        }
    }

    pub fn detach(&mut self, conn: &mut Connection, done: Option<Completer>) {
        match self.state {
            ChannelState::Initialized | ChannelState::Detached => complete(done, Ok(())),
            ChannelState::Failed => complete(done, Err(self.failure())),
            ChannelState::Detaching => self.pending_detach.extend(done),
            ChannelState::Suspended => {
                conn.timers.cancel_channel(&self.name);
                let detached = local::channel_detached(&self.name);
                self.fail_pending_attach(RealtimeError::classify(detached));
                self.set_state(ChannelState::Detached, None, false);
                complete(done, Ok(()));
            }
            ChannelState::Attaching | ChannelState::Attached => {
                if conn.state.rejects_operations() {
                    complete(done, Err(conn.rejection()));
                    return;
                }
                self.pending_detach.extend(done);
                conn.timers.cancel(&TimerKind::Attach(self.name.clone()));
                let detached = local::channel_detached(&self.name);
                self.fail_pending_attach(RealtimeError::classify(detached));
                self.send_detach(conn);
                self.set_state(ChannelState::Detaching, None, false);
            }
        }
    }

    pub fn publish(&mut self, conn: &mut Connection, message: Message, done: Completer) {
        if self.state == ChannelState::Failed {
            done.complete(Err(self.failure()));
            return;
        }
        if conn.state.rejects_operations() {
            done.complete(Err(conn.rejection()));
            return;
        }
        let size = message.size();
        let max = conn.max_message_size();
        if size > max {
            debug!(channel = %self.name, size, max, "rejecting oversized message");
            done.complete(Err(RealtimeError::Protocol(local::message_too_large(
                size, max,
            ))));
            return;
        }

        self.queue.push(message, Some(done));
        match self.state {
            ChannelState::Attached => self.flush_queue(conn),
            ChannelState::Initialized | ChannelState::Detached | ChannelState::Detaching => {
                trace!(channel = %self.name, "implicit attach on publish");
                self.attach(conn, None);
            }
            ChannelState::Attaching | ChannelState::Suspended | ChannelState::Failed => {}
        }
    }

    pub fn subscribe(&mut self, name: Option<String>, listener: Listener<Message>) {
        self.subscriptions.on(name, listener);
    }

    pub fn unsubscribe(&mut self, name: Option<&String>, listener: Option<&Listener<Message>>) {
        self.subscriptions.off(name, listener);
    }

    pub fn subscribe_presence(
        &mut self,
        action: Option<PresenceAction>,
        listener: Listener<PresenceMessage>,
    ) {
        self.presence.on(action, listener);
    }

    pub fn unsubscribe_presence(
        &mut self,
        action: Option<&PresenceAction>,
        listener: Option<&Listener<PresenceMessage>>,
    ) {
        self.presence.off(action, listener);
    }

    pub fn on(&mut self, kind: Option<ChannelEventKind>, listener: Listener<ChannelEvent>) {
        self.events.on(kind, listener);
    }

    pub fn off(&mut self, kind: Option<&ChannelEventKind>, listener: Option<&Listener<ChannelEvent>>) {
        self.events.off(kind, listener);
    }

    // ---- inbound ----

    pub fn on_protocol_message(&mut self, conn: &mut Connection, msg: ProtocolMessage) {
        match msg.action {
            Action::Attached => self.on_attached(conn, msg),
            Action::Detached => self.on_detached(conn, msg),
            Action::Message => self.deliver_messages(msg),
            Action::Presence => self.deliver_presence(msg),
            Action::Error => {
                let error = msg
                    .error
                    .unwrap_or_else(|| local::channel_failed(&self.name));
                self.on_error(conn, error);
            }
            Action::Heartbeat
            | Action::Ack
            | Action::Nack
            | Action::Connect
            | Action::Connected
            | Action::Disconnect
            | Action::Disconnected
            | Action::Close
            | Action::Closed
            | Action::Attach
            | Action::Detach
            | Action::Unknown => {
                debug!(channel = %self.name, action = ?msg.action, "ignoring unexpected channel action");
            }
        }
    }

    fn on_attached(&mut self, conn: &mut Connection, msg: ProtocolMessage) {
        let resumed = msg.has_flag(flags::RESUMED);
        match self.state {
            ChannelState::Attaching | ChannelState::Suspended => {
                conn.timers.cancel(&TimerKind::Attach(self.name.clone()));
                conn.timers.cancel(&TimerKind::ChannelRetry(self.name.clone()));
                self.set_state(ChannelState::Attached, msg.error, resumed);
                for done in self.pending_attach.drain(..) {
                    done.complete(Ok(()));
                }
                self.flush_queue(conn);
            }
            ChannelState::Attached if !resumed => {
                // The service re-attached us without continuity.
                if let Some(error) = &msg.error {
                    self.emit_error(error.clone());
                }
                self.error_reason = msg.error.clone();
                self.events.emit(
                    Some(&ChannelEventKind::State(ChannelState::Attached)),
                    &ChannelEvent::StateChanged(ChannelStateChange {
                        previous: ChannelState::Attached,
                        current: ChannelState::Attached,
                        reason: msg.error,
                        resumed: false,
                    }),
                );
                self.publish_snapshot();
            }
            ChannelState::Attached
            | ChannelState::Initialized
            | ChannelState::Detaching
            | ChannelState::Detached
            | ChannelState::Failed => {
                trace!(channel = %self.name, state = %self.state, "ignoring ATTACHED");
            }
        }
    }

    fn on_detached(&mut self, conn: &mut Connection, msg: ProtocolMessage) {
        match self.state {
            ChannelState::Detaching => {
                conn.timers.cancel(&TimerKind::Detach(self.name.clone()));
                self.set_state(ChannelState::Detached, msg.error, false);
                for done in self.pending_detach.drain(..) {
                    done.complete(Ok(()));
                }
            }
            ChannelState::Attached => {
                info!(channel = %self.name, "detached by the service, re-attaching");
                self.send_attach(conn);
                self.set_state(ChannelState::Attaching, msg.error, false);
            }
            ChannelState::Attaching => match msg.error {
                Some(error) => self.on_error(conn, error),
                None => self.send_attach(conn),
            },
            ChannelState::Initialized
            | ChannelState::Detached
            | ChannelState::Suspended
            | ChannelState::Failed => {
                trace!(channel = %self.name, state = %self.state, "ignoring DETACHED");
            }
        }
    }

    fn deliver_messages(&mut self, msg: ProtocolMessage) {
        if self.state != ChannelState::Attached {
            debug!(channel = %self.name, state = %self.state, "dropping MESSAGE while not attached");
            return;
        }
        for (index, mut message) in msg.messages.into_iter().enumerate() {
            if message.id.is_none()
                && let Some(envelope_id) = &msg.id
            {
                message.id = Some(format!("{envelope_id}:{index}"));
            }
            if message.connection_id.is_none() {
                message.connection_id = msg.connection_id.clone();
            }
            if message.timestamp.is_none() {
                message.timestamp = msg.timestamp;
            }
            self.subscriptions.emit(message.name.as_ref(), &message);
        }
    }

    fn deliver_presence(&mut self, msg: ProtocolMessage) {
        if self.state != ChannelState::Attached {
            debug!(channel = %self.name, state = %self.state, "dropping PRESENCE while not attached");
            return;
        }
        for (index, mut presence) in msg.presence.into_iter().enumerate() {
            if presence.id.is_none()
                && let Some(envelope_id) = &msg.id
            {
                presence.id = Some(format!("{envelope_id}:{index}"));
            }
            if presence.connection_id.is_none() {
                presence.connection_id = msg.connection_id.clone();
            }
            if presence.timestamp.is_none() {
                presence.timestamp = msg.timestamp;
            }
            self.presence.emit(Some(&presence.action), &presence);
        }
    }

    /// Channel-scoped ERROR from the service.
    pub fn on_error(&mut self, conn: &mut Connection, error: ErrorInfo) {
        match RealtimeError::classify(error.clone()) {
            err @ RealtimeError::Capacity(_) => {
                warn!(channel = %self.name, error = %error, "channel operation rejected for capacity");
                self.fail_pending_attach(err.clone());
                self.fail_pending_detach(err);
            }
            err @ (RealtimeError::Transport(_) | RealtimeError::Timeout(_)) => {
                warn!(channel = %self.name, error = %error, "channel error, will retry");
                self.suspend_with_retry(conn, error, err);
            }
            err @ (RealtimeError::Auth(_) | RealtimeError::Protocol(_) | RealtimeError::Closed(_)) => {
                warn!(channel = %self.name, error = %error, "channel failed");
                conn.timers.cancel_channel(&self.name);
                self.emit_error(error.clone());
                self.fail(err, error);
            }
        }
    }

    // ---- connection propagation ----

    /// The connection (re)connected. `lost` is set when continuity was not
    /// kept and the loss is to be reported.
    pub fn on_connection_connected(
        &mut self,
        conn: &mut Connection,
        resumed: bool,
        lost: Option<ErrorInfo>,
    ) {
        match self.state {
            ChannelState::Suspended => {
                self.send_attach(conn);
                self.set_state(ChannelState::Attaching, lost, false);
            }
            ChannelState::Attaching => self.send_attach(conn),
            ChannelState::Attached if resumed => self.flush_queue(conn),
            ChannelState::Attached => {
                if let Some(error) = &lost {
                    self.emit_error(error.clone());
                }
                self.send_attach(conn);
                self.set_state(ChannelState::Attaching, lost, false);
            }
            ChannelState::Detaching if resumed => self.send_detach(conn),
            ChannelState::Detaching => {
                // The service no longer knows the channel.
                conn.timers.cancel(&TimerKind::Detach(self.name.clone()));
                self.set_state(ChannelState::Detached, None, false);
                for done in self.pending_detach.drain(..) {
                    done.complete(Ok(()));
                }
            }
            ChannelState::Initialized | ChannelState::Detached | ChannelState::Failed => {}
        }
    }

    pub fn on_connection_suspended(&mut self, conn: &mut Connection) {
        match self.state {
            ChannelState::Attached | ChannelState::Attaching => {
                conn.timers.cancel_channel(&self.name);
                let reason = local::connection_suspended();
                self.fail_pending_attach(RealtimeError::classify(reason.clone()));
                self.set_state(ChannelState::Suspended, Some(reason), false);
            }
            ChannelState::Detaching => {
                conn.timers.cancel_channel(&self.name);
                self.set_state(ChannelState::Detached, None, false);
                for done in self.pending_detach.drain(..) {
                    done.complete(Ok(()));
                }
            }
            ChannelState::Initialized
            | ChannelState::Detached
            | ChannelState::Suspended
            | ChannelState::Failed => {}
        }
    }

    pub fn on_connection_failed(&mut self, conn: &mut Connection, error: &ErrorInfo) {
        if self.state.is_active() {
            conn.timers.cancel_channel(&self.name);
            self.fail(RealtimeError::classify(error.clone()), error.clone());
        } else {
            self.queue
                .fail_all(Err(RealtimeError::classify(error.clone())));
        }
    }

    pub fn on_connection_closed(&mut self, conn: &mut Connection) {
        let closed = RealtimeError::Closed(local::connection_closed());
        conn.timers.cancel_channel(&self.name);
        self.queue.fail_all(Err(closed.clone()));
        self.fail_pending_attach(closed);
        for done in self.pending_detach.drain(..) {
            done.complete(Ok(()));
        }
        if self.state.is_active() {
            self.set_state(ChannelState::Detached, None, false);
        }
    }

    /// Messages the service never acknowledged on a connection that could
    /// not be resumed; they go out again once re-attached.
    pub fn requeue(&mut self, items: Vec<QueuedMessage>) {
        self.queue.requeue_front(items);
    }

    // ---- timers ----

    pub fn on_attach_timeout(&mut self, conn: &mut Connection) {
        if self.state != ChannelState::Attaching {
            return;
        }
        let error = local::attach_timeout(&self.name);
        warn!(channel = %self.name, "attach timed out");
        self.suspend_with_retry(conn, error.clone(), RealtimeError::classify(error));
    }

    pub fn on_detach_timeout(&mut self, conn: &mut Connection) {
        if self.state != ChannelState::Detaching {
            return;
        }
        let error = local::detach_timeout(&self.name);
        warn!(channel = %self.name, "detach timed out");
        self.fail_pending_detach(RealtimeError::classify(error.clone()));
        self.set_state(ChannelState::Attached, Some(error), false);
        self.flush_queue(conn);
    }

    pub fn on_retry(&mut self, conn: &mut Connection) {
        if self.state == ChannelState::Suspended && conn.is_connected() {
            debug!(channel = %self.name, "retrying attach");
            self.send_attach(conn);
            self.set_state(ChannelState::Attaching, None, false);
        }
    }

    /// Fails everything still waiting; the client is going away.
    pub fn dispose(&mut self) {
        let dropped = RealtimeError::Closed(local::client_dropped());
        self.queue.fail_all(Err(dropped.clone()));
        self.fail_pending_attach(dropped.clone());
        self.fail_pending_detach(dropped);
        self.subscriptions.clear();
        self.presence.clear();
        self.events.clear();
    }

    // ---- internals ----

    fn send_attach(&mut self, conn: &mut Connection) {
        conn.timers.arm(
            TimerKind::Attach(self.name.clone()),
            conn.options.realtime_request_timeout,
        );
        if conn.outbox_contains(Action::Attach, &self.name) {
            trace!(channel = %self.name, "ATTACH already waiting in the outbox");
            return;
        }
        conn.send(Outbound::control(ProtocolMessage::for_channel(
            Action::Attach,
            self.name.clone(),
        )));
    }

    fn send_detach(&mut self, conn: &mut Connection) {
        conn.timers.arm(
            TimerKind::Detach(self.name.clone()),
            conn.options.realtime_request_timeout,
        );
        if conn.outbox_contains(Action::Detach, &self.name) {
            return;
        }
        conn.send(Outbound::control(ProtocolMessage::for_channel(
            Action::Detach,
            self.name.clone(),
        )));
    }

    fn flush_queue(&mut self, conn: &mut Connection) {
        if self.state != ChannelState::Attached || !conn.is_connected() || self.queue.is_empty() {
            return;
        }
        for envelope in self.queue.drain_envelopes(&self.name, conn.max_frame_size()) {
            conn.send(envelope);
        }
    }

    fn suspend_with_retry(&mut self, conn: &mut Connection, reason: ErrorInfo, err: RealtimeError) {
        conn.timers.cancel(&TimerKind::Attach(self.name.clone()));
        self.fail_pending_attach(err);
        self.set_state(ChannelState::Suspended, Some(reason), false);
        conn.timers.arm(
            TimerKind::ChannelRetry(self.name.clone()),
            conn.options.channel_retry_timeout,
        );
    }

    fn fail(&mut self, err: RealtimeError, reason: ErrorInfo) {
        self.queue.fail_all(Err(err.clone()));
        self.fail_pending_attach(err.clone());
        self.fail_pending_detach(err);
        self.set_state(ChannelState::Failed, Some(reason), false);
    }

    fn failure(&self) -> RealtimeError {
        let reason = self
            .error_reason
            .clone()
            .unwrap_or_else(|| local::channel_failed(&self.name));
        RealtimeError::classify(reason)
    }

    fn fail_pending_attach(&mut self, err: RealtimeError) {
        for done in self.pending_attach.drain(..) {
            done.complete(Err(err.clone()));
        }
    }

    fn fail_pending_detach(&mut self, err: RealtimeError) {
        for done in self.pending_detach.drain(..) {
            done.complete(Err(err.clone()));
        }
    }

    fn emit_error(&self, error: ErrorInfo) {
        self.events
            .emit(Some(&ChannelEventKind::Error), &ChannelEvent::Error(error));
    }

    fn set_state(&mut self, state: ChannelState, reason: Option<ErrorInfo>, resumed: bool) {
        let previous = self.state;
        self.state = state;
        self.error_reason = reason.clone();
        self.publish_snapshot();
        if previous == state {
            return;
        }
        debug!(channel = %self.name, %previous, current = %state, "channel state changed");
        let change = ChannelStateChange {
            previous,
            current: state,
            reason,
            resumed,
        };
        self.events.emit(
            Some(&ChannelEventKind::State(state)),
            &ChannelEvent::StateChanged(change),
        );
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(ChannelSnapshot {
            state: self.state,
            error_reason: self.error_reason.clone(),
        });
    }
}

fn complete(done: Option<Completer>, result: CompletionResult) {
    if let Some(done) = done {
        done.complete(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tidewire_protocol::constants::codes;

    use crate::config::ClientOptions;
    use crate::event_loop::Command;
    use crate::testing::Harness;

    fn attached(channel: &str) -> ProtocolMessage {
        ProtocolMessage::for_channel(Action::Attached, channel)
    }

    fn attached_harness() -> Harness {
        let mut h = Harness::new();
        h.establish("c1");
        let mut done = h.attach("room");
        h.server(attached("room"));
        assert_eq!(done.try_result(), Some(Ok(())));
        h.mock.clear_sent();
        h
    }

    #[tokio::test]
    async fn publishes_before_attach_flush_in_order_with_sequential_ids() {
        let mut h = Harness::new();
        h.establish("c1");
        let mut a = h.publish("room", "a");
        let _b = h.publish("room", "b");
        let _c = h.publish("room", "c");

        // The first publish attached implicitly; nothing goes out yet.
        assert_eq!(h.channel_state("room"), ChannelState::Attaching);
        assert!(h.sent_data().is_empty());
        assert_eq!(h.manager.channel("room").unwrap().queued(), 3);

        h.server(attached("room"));
        let sent = h.sent_data();
        assert_eq!(sent.len(), 1);
        let envelope = &sent[0];
        assert_eq!(envelope.id.as_deref(), Some("c1:0"));
        let names: Vec<_> = envelope.messages.iter().map(|m| m.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        let ids: Vec<_> = envelope.messages.iter().map(|m| m.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["c1:0:0", "c1:0:1", "c1:0:2"]);

        assert!(a.try_result().is_none());
        h.server(ProtocolMessage::new(Action::Ack).with_ack_range(0, 1));
        assert_eq!(a.try_result(), Some(Ok(())));
    }

    #[tokio::test]
    async fn attach_when_attached_sends_nothing() {
        let mut h = attached_harness();
        let mut again = h.attach("room");
        assert_eq!(again.try_result(), Some(Ok(())));
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn pending_attaches_resolve_together() {
        let mut h = Harness::new();
        h.establish("c1");
        let mut first = h.attach("room");
        let mut second = h.attach("room");
        let attaches = h.sent().iter().filter(|m| m.action == Action::Attach).count();
        assert_eq!(attaches, 1);

        h.server(attached("room"));
        assert_eq!(first.try_result(), Some(Ok(())));
        assert_eq!(second.try_result(), Some(Ok(())));
    }

    #[tokio::test]
    async fn attach_before_connect_waits_in_outbox() {
        let mut h = Harness::new();
        let _connect = h.connect();
        let _attach = h.attach("room");
        assert!(h.sent().is_empty());

        h.server(ProtocolMessage::connected("c1", "k1"));
        let attaches = h.sent().iter().filter(|m| m.action == Action::Attach).count();
        assert_eq!(attaches, 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_exact_registrations() {
        let mut h = attached_harness();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let listener = Listener::new(move |_: &Message| *counter.lock().unwrap() += 1);
        for name in ["click", "move", "press"] {
            h.command(Command::Subscribe {
                channel: "room".into(),
                name: Some(name.into()),
                listener: listener.clone(),
            });
        }
        for name in ["click", "move"] {
            h.command(Command::Unsubscribe {
                channel: "room".into(),
                name: Some(name.into()),
                listener: Some(listener.clone()),
            });
        }

        h.server(attached_message(&["click", "move", "press"]));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    fn attached_message(names: &[&str]) -> ProtocolMessage {
        ProtocolMessage::for_channel(Action::Message, "room")
            .with_id("svc:5")
            .with_messages(names.iter().map(|n| Message::new(*n, 1)).collect())
    }

    #[tokio::test]
    async fn delivery_fills_ids_and_respects_names() {
        let mut h = attached_harness();
        let ticks = h.subscribe("room", Some("tick"));
        let all = h.subscribe("room", None);

        h.server(attached_message(&["tick", "tock"]));

        let ticks = ticks.lock().unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].id.as_deref(), Some("svc:5:0"));
        let all: Vec<_> = all.lock().unwrap().iter().map(|m| m.id.clone()).collect();
        assert_eq!(all, vec![Some("svc:5:0".into()), Some("svc:5:1".into())]);
    }

    #[tokio::test]
    async fn no_delivery_after_detach() {
        let mut h = attached_harness();
        let received = h.subscribe("room", None);
        let mut detach = h.detach("room");
        assert_eq!(h.channel_state("room"), ChannelState::Detaching);
        assert_eq!(h.sent().last().map(|m| m.action), Some(Action::Detach));

        h.server(ProtocolMessage::for_channel(Action::Detached, "room"));
        assert_eq!(detach.try_result(), Some(Ok(())));
        assert_eq!(h.channel_state("room"), ChannelState::Detached);

        h.server(attached_message(&["late"]));
        assert!(received.lock().unwrap().is_empty());

        // Registrations survive a detach.
        let _ = h.attach("room");
        h.server(attached("room"));
        h.server(attached_message(&["again"]));
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribe_does_not_attach() {
        let mut h = Harness::new();
        h.establish("c1");
        let _ = h.subscribe("room", None);
        assert_eq!(h.channel_state("room"), ChannelState::Initialized);
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn detach_while_attaching_fails_pending_attach() {
        let mut h = Harness::new();
        h.establish("c1");
        let mut attach = h.attach("room");
        let mut detach = h.detach("room");

        assert!(matches!(attach.try_result(), Some(Err(RealtimeError::Protocol(_)))));
        assert_eq!(h.channel_state("room"), ChannelState::Detaching);
        h.server(ProtocolMessage::for_channel(Action::Detached, "room"));
        assert_eq!(detach.try_result(), Some(Ok(())));
    }

    #[tokio::test]
    async fn detach_resolves_immediately_when_not_attached() {
        let mut h = Harness::new();
        h.establish("c1");
        let mut done = h.detach("room");
        assert_eq!(done.try_result(), Some(Ok(())));
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn server_detach_triggers_reattach() {
        let mut h = attached_harness();
        h.server(ProtocolMessage::for_channel(Action::Detached, "room"));
        assert_eq!(h.channel_state("room"), ChannelState::Attaching);
        assert_eq!(h.sent().last().map(|m| m.action), Some(Action::Attach));
    }

    #[tokio::test]
    async fn unauthorized_attach_fails_channel_with_both_events() {
        let mut h = Harness::new();
        h.establish("c1");
        let events = h.channel_events("room");
        let mut attach = h.attach("room");

        let denied = ErrorInfo::new(codes::NOT_PERMITTED, 401, "not permitted");
        h.server(ProtocolMessage::for_channel(Action::Error, "room").with_error(denied.clone()));

        assert_eq!(h.channel_state("room"), ChannelState::Failed);
        let reason = h.manager.channel("room").unwrap().error_reason().cloned();
        assert_eq!(reason.map(|e| e.status_code), Some(401));
        assert!(matches!(attach.try_result(), Some(Err(RealtimeError::Auth(_)))));
        // Channel errors stay local.
        assert_eq!(h.state(), ConnectionState::Connected);

        let events = events.lock().unwrap();
        assert!(events.contains(&ChannelEvent::Error(denied.clone())));
        assert!(events.iter().any(|e| matches!(
            e,
            ChannelEvent::StateChanged(change)
                if change.current == ChannelState::Failed && change.reason == Some(denied.clone())
        )));
    }

    #[tokio::test]
    async fn failed_channel_rejects_publish() {
        let mut h = attached_harness();
        let denied = ErrorInfo::new(codes::NOT_PERMITTED, 401, "not permitted");
        h.server(ProtocolMessage::for_channel(Action::Error, "room").with_error(denied));
        let mut publish = h.publish("room", "a");
        assert!(matches!(publish.try_result(), Some(Err(RealtimeError::Auth(_)))));
    }

    #[tokio::test]
    async fn capacity_error_is_per_call_only() {
        let mut h = Harness::new();
        h.establish("c1");
        let mut attach = h.attach("room");
        let limited = ErrorInfo::new(codes::RATE_LIMITED, 429, "slow down");
        h.server(ProtocolMessage::for_channel(Action::Error, "room").with_error(limited));

        assert!(matches!(attach.try_result(), Some(Err(RealtimeError::Capacity(_)))));
        assert_eq!(h.channel_state("room"), ChannelState::Attaching);
    }

    #[tokio::test]
    async fn retryable_channel_error_suspends_and_retries() {
        let mut h = attached_harness();
        let glitch = ErrorInfo::new(codes::INTERNAL, 500, "try later");
        h.server(ProtocolMessage::for_channel(Action::Error, "room").with_error(glitch));
        assert_eq!(h.channel_state("room"), ChannelState::Suspended);

        h.fire(TimerKind::ChannelRetry("room".into()));
        assert_eq!(h.channel_state("room"), ChannelState::Attaching);
        h.server(attached("room"));
        assert_eq!(h.channel_state("room"), ChannelState::Attached);
    }

    #[tokio::test]
    async fn attach_timeout_suspends_then_retries() {
        let mut h = Harness::new();
        h.establish("c1");
        let mut attach = h.attach("room");

        h.fire(TimerKind::Attach("room".into()));
        assert!(matches!(attach.try_result(), Some(Err(RealtimeError::Timeout(_)))));
        assert_eq!(h.channel_state("room"), ChannelState::Suspended);

        h.mock.clear_sent();
        h.fire(TimerKind::ChannelRetry("room".into()));
        assert_eq!(h.channel_state("room"), ChannelState::Attaching);
        assert_eq!(h.sent().last().map(|m| m.action), Some(Action::Attach));
    }

    #[tokio::test]
    async fn detach_timeout_returns_to_attached() {
        let mut h = attached_harness();
        let mut detach = h.detach("room");
        h.fire(TimerKind::Detach("room".into()));

        assert!(matches!(detach.try_result(), Some(Err(RealtimeError::Timeout(_)))));
        assert_eq!(h.channel_state("room"), ChannelState::Attached);
        let reason = h.manager.channel("room").unwrap().error_reason().cloned();
        assert_eq!(reason.map(|e| e.code), Some(codes::CHANNEL_DETACH_TIMEOUT));
    }

    #[tokio::test]
    async fn oversized_publish_fails_only_that_call() {
        let mut options = ClientOptions::default();
        options.max_message_size = 16;
        let mut h = Harness::with_options(options);
        h.establish("c1");
        let _ = h.attach("room");
        h.server(attached("room"));

        let mut big = h.publish_message("room", Message::new("big", "x".repeat(64)));
        let mut small = h.publish_message("room", Message::new("s", 1));

        match big.try_result() {
            Some(Err(RealtimeError::Protocol(info))) => {
                assert_eq!(info.code, codes::MESSAGE_TOO_LARGE)
            }
            other => panic!("unexpected completion: {other:?}"),
        }
        assert!(small.try_result().is_none());
        assert_eq!(h.sent_data().len(), 1);
        assert_eq!(h.channel_state("room"), ChannelState::Attached);
    }

    #[tokio::test]
    async fn transient_disconnect_resumes_attached_channel() {
        let mut h = attached_harness();
        h.transport_closed();
        assert_eq!(h.state(), ConnectionState::Disconnected);
        // Still attached while the connection may be resumed.
        assert_eq!(h.channel_state("room"), ChannelState::Attached);

        let _a = h.publish("room", "a");
        let _b = h.publish("room", "b");
        assert!(h.sent_data().is_empty());

        h.fire(TimerKind::Retry);
        h.server(ProtocolMessage::connected("c1", "c1-key"));
        assert_eq!(h.channel_state("room"), ChannelState::Attached);

        let sent = h.sent_data();
        let names: Vec<_> = sent
            .iter()
            .flat_map(|m| m.messages.iter())
            .map(|m| m.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn connection_suspension_suspends_and_reattaches() {
        let mut options = ClientOptions::default();
        options.max_disconnected_retries = 0;
        let mut h = Harness::with_options(options);
        h.establish("c1");
        let _ = h.attach("room");
        h.server(attached("room"));
        let received = h.subscribe("room", None);

        h.transport_closed();
        assert_eq!(h.state(), ConnectionState::Suspended);
        assert_eq!(h.channel_state("room"), ChannelState::Suspended);

        let mut waiting = h.attach("room");
        assert!(waiting.try_result().is_none());
        assert_eq!(h.channel_state("room"), ChannelState::Suspended);

        h.fire(TimerKind::SuspendedRetry);
        h.server(ProtocolMessage::connected("c2", "c2-key"));
        assert_eq!(h.channel_state("room"), ChannelState::Attaching);
        h.server(attached("room"));
        assert_eq!(waiting.try_result(), Some(Ok(())));

        h.server(attached_message(&["back"]));
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn presence_reaches_action_listeners() {
        let mut h = attached_harness();
        let entered = Arc::new(Mutex::new(Vec::new()));
        let sink = entered.clone();
        h.command(Command::SubscribePresence {
            channel: "room".into(),
            action: Some(PresenceAction::Enter),
            listener: Listener::new(move |p: &PresenceMessage| {
                sink.lock().unwrap().push(p.client_id.clone());
            }),
        });

        h.server(
            ProtocolMessage::for_channel(Action::Presence, "room").with_presence(vec![
                PresenceMessage::new(PresenceAction::Enter, "ann"),
                PresenceMessage::new(PresenceAction::Leave, "bob"),
            ]),
        );
        assert_eq!(*entered.lock().unwrap(), vec![Some("ann".to_string())]);
    }
}
