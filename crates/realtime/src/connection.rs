//! Connection data model: identity, limits, timers and the send path.
//!
//! Outbound envelopes wait in the outbox until the connection is usable.
//! MESSAGE and PRESENCE envelopes get their `msg_serial` and ids when they
//! are transmitted and then wait in the acknowledgement list until the
//! service ACKs or NACKs them.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use tidewire_protocol::{Action, Codec, ConnectionDetails, ErrorInfo};

use crate::completion::CompletionResult;
use crate::config::ClientOptions;
use crate::error::{RealtimeError, local};
use crate::queue::Outbound;
use crate::timers::Timers;
use crate::transport::TransportHandle;
use crate::types::ConnectionState;

pub(crate) struct Connection {
    pub state: ConnectionState,
    pub id: Option<String>,
    pub key: Option<String>,
    /// Last processed connection serial.
    pub serial: Option<i64>,
    pub error_reason: Option<ErrorInfo>,
    pub details: ConnectionDetails,
    pub options: Arc<ClientOptions>,
    pub timers: Timers,
    codec: Box<dyn Codec>,
    handle: Option<Box<dyn TransportHandle>>,
    outbox: VecDeque<Outbound>,
    awaiting_ack: VecDeque<Outbound>,
    msg_serial: u64,
}

impl Connection {
    pub fn new(options: Arc<ClientOptions>, codec: Box<dyn Codec>) -> Self {
        Self {
            state: ConnectionState::Initialized,
            id: None,
            key: None,
            serial: None,
            error_reason: None,
            details: ConnectionDetails::default(),
            options,
            timers: Timers::default(),
            codec,
            handle: None,
            outbox: VecDeque::new(),
            awaiting_ack: VecDeque::new(),
            msg_serial: 0,
        }
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Connected with a live transport.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.handle.is_some()
    }

    pub fn max_message_size(&self) -> usize {
        self.details
            .max_message_size
            .unwrap_or(self.options.max_message_size)
    }

    pub fn max_frame_size(&self) -> usize {
        self.details
            .max_frame_size
            .unwrap_or(self.options.max_frame_size)
    }

    /// Error for operations rejected because of the connection state.
    pub fn rejection(&self) -> RealtimeError {
        match (self.state, &self.error_reason) {
            (ConnectionState::Failed, Some(reason)) => RealtimeError::classify(reason.clone()),
            (ConnectionState::Failed, None) => {
                RealtimeError::Protocol(local::connection_failed("connection failed"))
            }
            _ => RealtimeError::Closed(local::connection_closed()),
        }
    }

    pub fn set_handle(&mut self, handle: Box<dyn TransportHandle>) {
        self.drop_transport();
        self.handle = Some(handle);
    }

    /// Closes and forgets the current transport, if any.
    pub fn drop_transport(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
    }

    /// Forgets the identity used for resumption.
    pub fn clear_identity(&mut self) {
        self.id = None;
        self.key = None;
        self.serial = None;
    }

    /// Queues an envelope, sending it right away when connected.
    pub fn send(&mut self, outbound: Outbound) {
        if self.state.is_terminal() {
            outbound.complete(Err(self.rejection()));
            return;
        }
        self.outbox.push_back(outbound);
        self.flush_outbox();
    }

    /// Transmits everything in the outbox, in order, while connected.
    pub fn flush_outbox(&mut self) {
        while self.is_connected() {
            let Some(outbound) = self.outbox.pop_front() else {
                break;
            };
            if let Err(outbound) = self.transmit(outbound) {
                self.outbox.push_front(outbound);
                break;
            }
        }
    }

    /// Sends an envelope bypassing the outbox. Returns it back if the
    /// transport refused it.
    pub fn transmit(&mut self, mut outbound: Outbound) -> Result<(), Outbound> {
        if outbound.needs_ack() {
            self.assign_ids(&mut outbound);
        }

        let frame = match self.codec.encode(&outbound.message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(action = ?outbound.message.action, error = %e, "dropping unencodable envelope");
                outbound.complete(Err(RealtimeError::Protocol(local::decode_failed(e))));
                return Ok(());
            }
        };

        let Some(handle) = &self.handle else {
            return Err(outbound);
        };
        if let Err(e) = handle.send(frame) {
            debug!(error = %e, "transport refused frame");
            return Err(outbound);
        }

        trace!(
            action = ?outbound.message.action,
            channel = outbound.message.channel.as_deref().unwrap_or(""),
            msg_serial = outbound.message.msg_serial,
            "sent"
        );
        if outbound.needs_ack() {
            self.awaiting_ack.push_back(outbound);
        }
        Ok(())
    }

    /// Assigns `msg_serial`, the envelope id and message ids. Values already
    /// present are kept so retransmissions carry the same ids.
    fn assign_ids(&mut self, outbound: &mut Outbound) {
        let envelope = &mut outbound.message;
        let serial = match envelope.msg_serial {
            Some(serial) => serial,
            None => {
                let serial = self.msg_serial;
                self.msg_serial += 1;
                envelope.msg_serial = Some(serial);
                serial
            }
        };
        let envelope_id = envelope.id.get_or_insert_with(|| match &self.id {
            Some(connection_id) => format!("{connection_id}:{serial}"),
            None => uuid::Uuid::new_v4().to_string(),
        });
        for (index, message) in envelope.messages.iter_mut().enumerate() {
            if message.id.is_none() {
                message.id = Some(format!("{envelope_id}:{index}"));
            }
        }
    }

    /// Resolves the completions of envelopes in `[msg_serial, msg_serial + count)`.
    pub fn acknowledge(&mut self, msg_serial: u64, count: u32, result: CompletionResult) {
        let end = msg_serial.saturating_add(u64::from(count));
        let mut remaining = VecDeque::with_capacity(self.awaiting_ack.len());
        let mut resolved = 0;
        for outbound in self.awaiting_ack.drain(..) {
            match outbound.message.msg_serial {
                Some(serial) if (msg_serial..end).contains(&serial) => {
                    outbound.complete(result.clone());
                    resolved += 1;
                }
                _ => remaining.push_back(outbound),
            }
        }
        self.awaiting_ack = remaining;
        if resolved == 0 {
            debug!(msg_serial, count, "acknowledgement matched nothing");
        }
    }

    /// Moves unacknowledged envelopes to the head of the outbox for
    /// retransmission on the next connection.
    pub fn requeue_unacked(&mut self) {
        while let Some(outbound) = self.awaiting_ack.pop_back() {
            self.outbox.push_front(outbound);
        }
    }

    /// Removes every data envelope, acknowledged-pending ones first, and
    /// restarts serial numbering. Envelope and message ids are cleared so
    /// the envelopes they are packed into next derive fresh ones. Control
    /// envelopes stay in the outbox.
    pub fn take_data_envelopes(&mut self) -> Vec<Outbound> {
        let mut data: Vec<Outbound> = self.awaiting_ack.drain(..).collect();
        let mut control = VecDeque::with_capacity(self.outbox.len());
        for outbound in self.outbox.drain(..) {
            if outbound.needs_ack() {
                data.push(outbound);
            } else {
                control.push_back(outbound);
            }
        }
        self.outbox = control;
        self.msg_serial = 0;
        for outbound in &mut data {
            outbound.message.msg_serial = None;
            outbound.message.id = None;
            for message in &mut outbound.message.messages {
                message.id = None;
            }
        }
        data
    }

    /// Whether a channel envelope with `action` is waiting in the outbox.
    pub fn outbox_contains(&self, action: Action, channel: &str) -> bool {
        self.outbox
            .iter()
            .any(|o| o.message.action == action && o.message.channel.as_deref() == Some(channel))
    }

    /// Fails everything queued or awaiting acknowledgement.
    pub fn fail_pending(&mut self, error: RealtimeError) {
        for outbound in self.awaiting_ack.drain(..).chain(self.outbox.drain(..)) {
            outbound.complete(Err(error.clone()));
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> (usize, usize) {
        (self.outbox.len(), self.awaiting_ack.len())
    }
}
