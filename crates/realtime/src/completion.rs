//! Completion futures handed back by client operations.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::{RealtimeError, local};

pub type CompletionResult = Result<(), RealtimeError>;

/// Resolves once the operation it was returned from succeeds or fails.
///
/// Resolves with [`RealtimeError::Closed`] if the client goes away first.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited or polled"]
pub struct Completion {
    rx: oneshot::Receiver<CompletionResult>,
}

impl Completion {
    pub(crate) fn pair() -> (Completer, Completion) {
        let (tx, rx) = oneshot::channel();
        (Completer(tx), Completion { rx })
    }

    /// A completion that is already resolved.
    #[cfg(test)]
    pub(crate) fn ready(result: CompletionResult) -> Completion {
        let (done, completion) = Self::pair();
        done.complete(result);
        completion
    }

    /// Returns the outcome if the operation already finished.
    ///
    /// Once this returns `Some`, the outcome has been consumed.
    pub fn try_result(&mut self) -> Option<CompletionResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

impl Future for Completion {
    type Output = CompletionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(dropped())))
    }
}

fn dropped() -> RealtimeError {
    RealtimeError::Closed(local::client_dropped())
}

/// Sending half of a [`Completion`].
#[derive(Debug)]
pub(crate) struct Completer(oneshot::Sender<CompletionResult>);

impl Completer {
    pub(crate) fn complete(self, result: CompletionResult) {
        let _ = self.0.send(result);
    }
}
