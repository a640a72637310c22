//! Test fixtures: a scriptable [`IoPattern`] and a zero-network [`IoBackend`], for exercising the
//! broker/state machine/drivers without a real socket on the wire.
//!
//! Kept behind the `fakes` feature so embedders writing their own integration tests against this
//! crate can reuse the same fixtures rather than hand-rolling their own mocks.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::drivers::IoBackend;
use crate::error::SocketError;
use crate::io::{Action, CompletionVerdict, IoPattern, NoopGuard, Task, TaskBuffer};
use crate::socket::ConnectionSocket;

/// An [`IoPattern`] whose tasks and verdicts are scripted ahead of time rather than computed
/// from protocol state. `initiate_io` hands out the queued tasks in order and then idles;
/// `complete_io` hands out the queued verdicts in order and then continues forever.
pub struct FakeIoPattern {
    tasks: Mutex<Vec<Task>>,
    verdicts: Mutex<Vec<CompletionVerdict>>,
    sticky_error: Option<SocketError>,
    initiate_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl FakeIoPattern {
    /// A pattern with no work: the very first `initiate_io` call returns `Action::None`, which
    /// drives a connection straight through `InitiatingIo` to `Closed` with no error.
    pub fn immediately_done() -> Arc<Self> {
        Self::new(Vec::new(), Vec::new(), None)
    }

    /// A pattern that hands out `tasks` in order, reporting `verdicts[n]` for the nth
    /// `complete_io` call (or `ContinueIo` if the verdict queue runs out before the task queue
    /// does). `sticky_error` is what `last_pattern_error` reports once a `FailedIo` verdict is
    /// returned.
    pub fn new(
        tasks: Vec<Task>,
        verdicts: Vec<CompletionVerdict>,
        sticky_error: Option<SocketError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(tasks),
            verdicts: Mutex::new(verdicts),
            sticky_error,
            initiate_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        })
    }

    pub fn initiate_calls(&self) -> usize {
        self.initiate_calls.load(Ordering::Acquire)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::Acquire)
    }
}

impl IoPattern for FakeIoPattern {
    fn initiate_io(&self) -> Task {
        self.initiate_calls.fetch_add(1, Ordering::AcqRel);
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            Task::idle()
        } else {
            tasks.remove(0)
        }
    }

    fn complete_io(
        &self,
        _task: &Task,
        _bytes_transferred: usize,
        _error: Option<&SocketError>,
    ) -> CompletionVerdict {
        self.complete_calls.fetch_add(1, Ordering::AcqRel);
        let mut verdicts = self.verdicts.lock();
        if verdicts.is_empty() {
            CompletionVerdict::ContinueIo
        } else {
            verdicts.remove(0)
        }
    }

    fn print_statistics(&self, _local: SocketAddr, _remote: SocketAddr) {}

    fn acquire_pattern_lock(&self) -> Box<dyn Drop + '_> {
        Box::new(NoopGuard)
    }

    fn last_pattern_error(&self) -> Option<SocketError> {
        match &self.sticky_error {
            Some(SocketError::AlreadySet) => Some(SocketError::AlreadySet),
            Some(SocketError::NotSet) => Some(SocketError::NotSet),
            Some(SocketError::Aborted) => Some(SocketError::Aborted),
            Some(SocketError::Reset) => Some(SocketError::Reset),
            Some(SocketError::NoBufferSpace) => Some(SocketError::NoBufferSpace),
            Some(SocketError::MessageTooLarge) => Some(SocketError::MessageTooLarge),
            Some(SocketError::AddressInUse) => Some(SocketError::AddressInUse),
            Some(SocketError::Io(e)) => Some(SocketError::Io(std::io::Error::new(e.kind(), e.to_string()))),
            Some(SocketError::Protocol(msg)) => Some(SocketError::Protocol(msg.clone())),
            None => None,
        }
    }
}

/// Helper for building a `Send` task carrying `payload`, at `time_offset_ms`, tagged with
/// `sequence_number` for patterns that verify ordering (the paced driver stamps this into the
/// wire header when it has to fragment).
pub fn send_task(payload: &[u8], time_offset_ms: u64, sequence_number: u64) -> Task {
    Task {
        action: Action::Send,
        buffer: TaskBuffer::Static(Arc::from(payload)),
        buffer_offset: 0,
        buffer_length: payload.len(),
        rio_buffer_id: None,
        track_io: true,
        time_offset_ms,
        expected_pattern_offset: sequence_number,
    }
}

/// An [`IoBackend`] that never touches a network: sends report every byte transferred
/// immediately, recvs return an empty buffer, shutdowns are no-ops. Every call is recorded with
/// the moment it ran, letting pacing tests assert on elapsed time without a real socket.
pub struct FakeIoBackend {
    pub sends: Mutex<Vec<(tokio::time::Instant, Vec<u8>)>>,
}

impl FakeIoBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sends: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl IoBackend for FakeIoBackend {
    async fn send(&self, _socket: &ConnectionSocket, data: &[u8]) -> Result<usize, SocketError> {
        self.sends.lock().push((tokio::time::Instant::now(), data.to_vec()));
        Ok(data.len())
    }

    async fn recv(&self, _socket: &ConnectionSocket, _max_len: usize) -> Result<Vec<u8>, SocketError> {
        Ok(Vec::new())
    }

    async fn shutdown(&self, _socket: &ConnectionSocket, _force: bool) -> Result<(), SocketError> {
        Ok(())
    }
}

/// A `Settings` functor (create/connect/accept/closing) that always succeeds immediately.
pub fn always_ok() -> impl Fn(std::sync::Weak<ConnectionSocket>) -> crate::config::BoxFuture<'static, crate::config::FunctorResult>
       + Send
       + Sync
       + 'static {
    |_weak| Box::pin(async { Ok(()) })
}

/// A `Settings::connect`/`accept` functor that always fails with an I/O error of `kind`.
pub fn always_fails_with_io(
    kind: std::io::ErrorKind,
) -> impl Fn(std::sync::Weak<ConnectionSocket>) -> crate::config::BoxFuture<'static, crate::config::FunctorResult>
       + Send
       + Sync
       + 'static {
    move |_weak| {
        Box::pin(async move { Err(SocketError::Io(std::io::Error::new(kind, "refused"))) })
    }
}
