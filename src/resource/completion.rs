//! Completion handles for asynchronous resource operations.
//!
//! A partition resolves every accepted operation exactly once by sending the
//! encoded result (or error) through a [`Responder`]. The client side holds a
//! [`CompletionHandle`], a future that decodes the result into the
//! operation's typed output. Dropping the handle does not cancel the
//! operation: once submitted, a command either commits or is abandoned by a
//! leader change, and the client can no longer tell which.

use crate::core::error::{TrellisError, TrellisResult};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Sleep;

/// Sending half owned by the partition until the operation resolves.
pub type Responder = oneshot::Sender<TrellisResult<Bytes>>;

/// Decoder from the encoded result to the typed output.
pub type Decoder<T> = fn(&[u8]) -> TrellisResult<T>;

/// Create a responder and the handle that observes it.
pub fn completion_pair<T>(decode: Decoder<T>) -> (Responder, CompletionHandle<T>) {
    let (tx, rx) = oneshot::channel();
    (tx, CompletionHandle::new(rx, decode))
}

/// Pass-through decoder for callers that want the raw result.
pub fn raw(bytes: &[u8]) -> TrellisResult<Bytes> {
    Ok(Bytes::copy_from_slice(bytes))
}

/// Decoder for operations that only report success.
pub fn unit(_: &[u8]) -> TrellisResult<()> {
    Ok(())
}

enum HandleState {
    Pending(oneshot::Receiver<TrellisResult<Bytes>>),
    Failed(TrellisError),
    Done,
}

/// Future resolving to the outcome of one operation.
pub struct CompletionHandle<T> {
    state: HandleState,
    decode: Decoder<T>,
    timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<T> CompletionHandle<T> {
    pub fn new(rx: oneshot::Receiver<TrellisResult<Bytes>>, decode: Decoder<T>) -> Self {
        Self {
            state: HandleState::Pending(rx),
            decode,
            timeout: None,
            deadline: None,
        }
    }

    /// A handle that is already resolved with `error`.
    pub fn failed(error: TrellisError) -> Self {
        Self {
            state: HandleState::Failed(error),
            decode: |_| Err(TrellisError::internal("decoder of a failed handle was invoked")),
            timeout: None,
            deadline: None,
        }
    }

    /// Resolve to [`TrellisError::Timeout`] if no result arrives within
    /// `timeout` of the first poll.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the handle has already produced its output.
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, HandleState::Done)
    }

    /// Non-blocking check for a result.
    ///
    /// Returns `None` while the operation is still pending.
    pub fn try_result(&mut self) -> Option<TrellisResult<T>> {
        match std::mem::replace(&mut self.state, HandleState::Done) {
            HandleState::Pending(mut rx) => match rx.try_recv() {
                Ok(result) => Some(result.and_then(|bytes| (self.decode)(&bytes))),
                Err(oneshot::error::TryRecvError::Empty) => {
                    self.state = HandleState::Pending(rx);
                    None
                }
                Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
            },
            HandleState::Failed(error) => Some(Err(error)),
            HandleState::Done => None,
        }
    }
}

fn dropped() -> TrellisError {
    TrellisError::internal("operation dropped before completion")
}

impl<T> std::fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            HandleState::Pending(_) => "pending",
            HandleState::Failed(_) => "failed",
            HandleState::Done => "done",
        };
        f.debug_struct("CompletionHandle")
            .field("state", &state)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T> Future for CompletionHandle<T> {
    type Output = TrellisResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let rx = match &mut this.state {
            HandleState::Pending(rx) => rx,
            _ => {
                return Poll::Ready(match std::mem::replace(&mut this.state, HandleState::Done) {
                    HandleState::Failed(error) => Err(error),
                    _ => Err(TrellisError::internal(
                        "completion handle polled after resolution",
                    )),
                });
            }
        };

        if let Poll::Ready(received) = Pin::new(rx).poll(cx) {
            this.state = HandleState::Done;
            this.deadline = None;
            let outcome = received
                .unwrap_or_else(|_| Err(dropped()))
                .and_then(|bytes| (this.decode)(&bytes));
            return Poll::Ready(outcome);
        }

        if let Some(timeout) = this.timeout {
            let deadline = this
                .deadline
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
            if deadline.as_mut().poll(cx).is_ready() {
                this.state = HandleState::Done;
                this.deadline = None;
                return Poll::Ready(Err(TrellisError::Timeout));
            }
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::state_machine::{decode, encode};

    #[tokio::test]
    async fn resolves_with_decoded_value() {
        let (tx, handle) = completion_pair::<bool>(decode::<bool>);
        tx.send(encode(&true)).unwrap();
        assert_eq!(handle.await, Ok(true));
    }

    #[tokio::test]
    async fn delivers_errors_unchanged() {
        let (tx, handle) = completion_pair::<Bytes>(raw);
        tx.send(Err(TrellisError::not_leader(None))).unwrap();
        assert_eq!(handle.await, Err(TrellisError::not_leader(None)));
    }

    #[tokio::test]
    async fn dropped_responder_is_internal() {
        let (tx, handle) = completion_pair::<Bytes>(raw);
        drop(tx);
        assert!(matches!(handle.await, Err(TrellisError::Internal { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_unresolved() {
        let (_tx, handle) = completion_pair::<Bytes>(raw);
        let result = handle.with_timeout(Duration::from_millis(50)).await;
        assert_eq!(result, Err(TrellisError::Timeout));
    }

    #[test]
    fn try_result_is_non_blocking_and_single_shot() {
        let (tx, mut handle) = completion_pair::<u64>(decode::<u64>);
        assert!(handle.try_result().is_none());
        tx.send(encode(&7u64)).unwrap();
        assert_eq!(handle.try_result(), Some(Ok(7)));
        assert!(handle.try_result().is_none());
        assert!(handle.is_terminated());
    }

    #[test]
    fn failed_handle_resolves_immediately() {
        let mut handle =
            CompletionHandle::<u64>::failed(TrellisError::invalid_command("empty key"));
        assert!(matches!(
            handle.try_result(),
            Some(Err(TrellisError::InvalidCommand { .. }))
        ));
    }
}
