//! I/O pumps: the shared loop that drives an [`crate::io::IoPattern`] against a concrete
//! transport, and the concrete transports themselves.
//!
//! Every backend implements [`IoBackend`]; [`run_io_loop`] is the one driver loop shape all of
//! them share, per the unification called out for the stream- and message-oriented drivers.

mod blocking_driver;
mod datagram_driver;
mod paced_driver;
#[cfg(feature = "registered-io")]
mod registered_driver;
mod stream_driver;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{event, Level};

use crate::config::{BoxFuture, FunctorResult, Options};
use crate::error::SocketError;
use crate::io::{Action, CompletionVerdict};
use crate::socket::ConnectionSocket;

pub use blocking_driver::{accept_fn, connect_fn};
pub(crate) use datagram_driver::is_message_too_large;
pub use datagram_driver::DatagramBackend;
pub use paced_driver::paced_send_io_fn;
#[cfg(feature = "registered-io")]
pub use registered_driver::RegisteredIoBackend;
pub use stream_driver::StreamBackend;

/// The transport-specific half of a driver: how to actually move bytes, independent of the
/// pattern-driven loop in [`run_io_loop`].
#[async_trait]
pub trait IoBackend: Send + Sync {
    async fn send(&self, socket: &ConnectionSocket, data: &[u8]) -> Result<usize, SocketError>;
    async fn recv(&self, socket: &ConnectionSocket, max_len: usize) -> Result<Vec<u8>, SocketError>;
    async fn shutdown(&self, socket: &ConnectionSocket, force: bool) -> Result<(), SocketError>;
}

/// Wraps `backend` into a `Settings::io` functor: the closure `SocketState` calls on entry to
/// `InitiatingIo`.
///
/// `options` controls whether the loop yields to the scheduler between steps
/// (`Options::INLINE_COMPLETIONS` unset, the default) or re-enters immediately on the same task
/// (`Options::INLINE_COMPLETIONS` set, trading fairness for latency on the fast path).
pub fn io_fn(
    backend: Arc<dyn IoBackend>,
    options: Options,
) -> impl Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static {
    move |weak| {
        let backend = Arc::clone(&backend);
        Box::pin(run_io_loop(weak, backend, options))
    }
}

/// Drives `pattern.initiate_io()`/`complete_io()` against `backend` until the pattern reports
/// `CompletedIo`/`FailedIo` or the socket disappears out from under us.
pub async fn run_io_loop(
    socket: Weak<ConnectionSocket>,
    backend: Arc<dyn IoBackend>,
    options: Options,
) -> FunctorResult {
    let inline = options.contains(Options::INLINE_COMPLETIONS);
    loop {
        let Some(socket) = socket.upgrade() else {
            return Ok(());
        };
        let pattern = socket
            .io_pattern()
            .expect("pattern must be set before the io functor runs");

        let task = pattern.initiate_io();
        match task.action {
            Action::None => return Ok(()),

            Action::GracefulShutdown => {
                let result = backend.shutdown(&socket, false).await;
                match finish_step(&*pattern, &task, 0, result)? {
                    Some(outcome) => return outcome,
                    None => {
                        if !inline {
                            tokio::task::yield_now().await;
                        }
                        continue;
                    }
                }
            }

            Action::HardShutdown | Action::Abort | Action::FatalAbort => {
                let result = backend.shutdown(&socket, true).await;
                match finish_step(&*pattern, &task, 0, result)? {
                    Some(outcome) => return outcome,
                    None => {
                        if !inline {
                            tokio::task::yield_now().await;
                        }
                        continue;
                    }
                }
            }

            Action::Send => {
                if task.track_io {
                    socket.increment_io();
                }
                let bytes = task.buffer.send_slice(task.buffer_offset, task.buffer_length);
                let result = backend.send(&socket, &bytes).await;
                let transferred = result.as_ref().copied().unwrap_or(0);
                let outcome = finish_step(&*pattern, &task, transferred, result);
                if task.track_io {
                    socket.decrement_io();
                }
                match outcome? {
                    Some(result) => return result,
                    None => {
                        if !inline {
                            tokio::task::yield_now().await;
                        }
                        continue;
                    }
                }
            }

            Action::Recv => {
                if task.track_io {
                    socket.increment_io();
                }
                let received = backend.recv(&socket, task.buffer_length).await;
                let (transferred, result) = match received {
                    Ok(data) => {
                        task.buffer.recv_into(task.buffer_offset, &data);
                        (data.len(), Ok(data.len()))
                    }
                    Err(e) => (0, Err(e)),
                };
                let outcome = finish_step(&*pattern, &task, transferred, result);
                if task.track_io {
                    socket.decrement_io();
                }
                match outcome? {
                    Some(result) => return result,
                    None => {
                        if !inline {
                            tokio::task::yield_now().await;
                        }
                        continue;
                    }
                }
            }
        }
    }
}

/// Reports a completed step to the pattern and translates its verdict into either "keep looping"
/// (`None`) or a final result for `run_io_loop` to return (`Some`).
fn finish_step(
    pattern: &dyn crate::io::IoPattern,
    task: &crate::io::Task,
    bytes_transferred: usize,
    result: Result<usize, SocketError>,
) -> Result<Option<FunctorResult>, SocketError> {
    let error = result.as_ref().err();
    let verdict = pattern.complete_io(task, bytes_transferred, error);
    event!(
        Level::TRACE,
        action = ?task.action,
        bytes_transferred,
        verdict = ?verdict,
        "io step completed"
    );
    match verdict {
        CompletionVerdict::ContinueIo => Ok(None),
        CompletionVerdict::CompletedIo => Ok(Some(Ok(()))),
        CompletionVerdict::FailedIo => {
            Ok(Some(Err(pattern.last_pattern_error().unwrap_or(SocketError::Aborted))))
        }
    }
}
