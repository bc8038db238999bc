//! Per-channel outbound message queue and envelope packing.

use std::collections::VecDeque;

use tidewire_protocol::{Action, Message, ProtocolMessage};

use crate::completion::{Completer, CompletionResult};

/// A published message waiting to be sent.
#[derive(Debug)]
pub(crate) struct QueuedMessage {
    pub message: Message,
    pub done: Option<Completer>,
}

/// An envelope on its way to the transport, with the completions of the
/// messages it carries in message order.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub message: ProtocolMessage,
    pub completions: Vec<Option<Completer>>,
}

impl Outbound {
    /// A control envelope; nothing waits on it.
    pub fn control(message: ProtocolMessage) -> Self {
        Self {
            message,
            completions: Vec::new(),
        }
    }

    fn push(&mut self, item: QueuedMessage) {
        self.message.messages.push(item.message);
        self.completions.push(item.done);
    }

    /// MESSAGE and PRESENCE envelopes are acknowledged by the service.
    pub fn needs_ack(&self) -> bool {
        self.message.action.needs_ack()
    }

    pub fn complete(self, result: CompletionResult) {
        for done in self.completions.into_iter().flatten() {
            done.complete(result.clone());
        }
    }

    /// Splits a data envelope back into queue entries, keeping message ids.
    pub fn into_queued(self) -> Vec<QueuedMessage> {
        self.message
            .messages
            .into_iter()
            .zip(self.completions)
            .map(|(message, done)| QueuedMessage { message, done })
            .collect()
    }
}

/// FIFO of messages published while the channel could not send.
#[derive(Debug, Default)]
pub(crate) struct MessageQueue {
    items: VecDeque<QueuedMessage>,
}

impl MessageQueue {
    pub fn push(&mut self, message: Message, done: Option<Completer>) {
        self.items.push_back(QueuedMessage { message, done });
    }

    /// Puts messages back at the head, ahead of anything queued since.
    pub fn requeue_front(&mut self, items: Vec<QueuedMessage>) {
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn fail_all(&mut self, result: CompletionResult) {
        for item in self.items.drain(..) {
            if let Some(done) = item.done {
                done.complete(result.clone());
            }
        }
    }

    /// Empties the queue into MESSAGE envelopes for `channel`.
    ///
    /// Order is preserved. A new envelope starts when the next message would
    /// push the current one past `max_frame_size`; a single message larger
    /// than the limit still goes out alone.
    pub fn drain_envelopes(&mut self, channel: &str, max_frame_size: usize) -> Vec<Outbound> {
        let mut envelopes = Vec::new();
        let mut current: Option<Outbound> = None;
        let mut size = 0;

        while let Some(item) = self.items.pop_front() {
            let item_size = item.message.size();
            if current.is_some() && size + item_size > max_frame_size {
                envelopes.extend(current.take());
                size = 0;
            }
            current
                .get_or_insert_with(|| {
                    Outbound::control(ProtocolMessage::for_channel(Action::Message, channel))
                })
                .push(item);
            size += item_size;
        }

        envelopes.extend(current);
        envelopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Completion;

    fn names(envelope: &Outbound) -> Vec<&str> {
        envelope
            .message
            .messages
            .iter()
            .filter_map(|m| m.name.as_deref())
            .collect()
    }

    #[test]
    fn drain_preserves_publish_order() {
        let mut queue = MessageQueue::default();
        for name in ["a", "b", "c"] {
            queue.push(Message::new(name, 1), None);
        }

        let envelopes = queue.drain_envelopes("room", 1024);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].message.channel.as_deref(), Some("room"));
        assert_eq!(envelopes[0].message.action, Action::Message);
        assert_eq!(names(&envelopes[0]), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_splits_at_frame_limit() {
        let mut queue = MessageQueue::default();
        // Each message is 1 (name) + 4 (data) = 5 bytes.
        for name in ["a", "b", "c", "d", "e"] {
            queue.push(Message::new(name, "xxxx"), None);
        }

        let envelopes = queue.drain_envelopes("room", 10);
        let packed: Vec<Vec<&str>> = envelopes.iter().map(names).collect();
        assert_eq!(packed, vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]);
    }

    #[test]
    fn oversized_message_travels_alone() {
        let mut queue = MessageQueue::default();
        queue.push(Message::new("a", "x"), None);
        queue.push(Message::new("big", "x".repeat(50)), None);
        queue.push(Message::new("c", "x"), None);

        let envelopes = queue.drain_envelopes("room", 10);
        let packed: Vec<Vec<&str>> = envelopes.iter().map(names).collect();
        assert_eq!(packed, vec![vec!["a"], vec!["big"], vec!["c"]]);
    }

    #[test]
    fn requeue_front_keeps_relative_order() {
        let mut queue = MessageQueue::default();
        queue.push(Message::new("c", 1), None);
        queue.requeue_front(vec![
            QueuedMessage {
                message: Message::new("a", 1),
                done: None,
            },
            QueuedMessage {
                message: Message::new("b", 1),
                done: None,
            },
        ]);

        let envelopes = queue.drain_envelopes("room", 1024);
        assert_eq!(names(&envelopes[0]), vec!["a", "b", "c"]);
    }

    #[test]
    fn outbound_completions_follow_messages() {
        let mut queue = MessageQueue::default();
        let (done_a, mut a) = Completion::pair();
        let (done_b, mut b) = Completion::pair();
        queue.push(Message::new("a", 1), Some(done_a));
        queue.push(Message::new("b", 1), Some(done_b));

        let mut envelopes = queue.drain_envelopes("room", 1024);
        let envelope = envelopes.remove(0);
        assert!(envelope.needs_ack());

        let items = envelope.into_queued();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].message.name.as_deref(), Some("b"));

        queue.requeue_front(items);
        queue.fail_all(Err(crate::RealtimeError::Closed(
            crate::error::local::connection_closed(),
        )));
        assert!(matches!(a.try_result(), Some(Err(_))));
        assert!(matches!(b.try_result(), Some(Err(_))));
    }
}
