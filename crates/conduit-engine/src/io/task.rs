use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// What a [`Task`] asks a driver to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No work is available right now; the driver should stop its loop.
    None,
    Send,
    Recv,
    /// Shut down the send side and let any in-flight reads drain.
    GracefulShutdown,
    /// Close the socket immediately (forcing an RST on TCP).
    HardShutdown,
    /// Abandon the connection; treated the same as `HardShutdown` by the drivers, but kept
    /// distinct so the pattern can report *why* it gave up.
    Abort,
    /// Like `Abort`, but the error is considered unrecoverable at the process level; the
    /// pattern is signalling that something has gone fundamentally wrong, not just this one
    /// connection.
    FatalAbort,
}

/// The data a [`Task`] carries for a `Send` or `Recv` action.
///
/// This is the engine's view of the source's `buffer_type` distinction: static buffers are
/// shared read-only content (typically sent repeatedly), tracked buffers are a per-task
/// allocation the driver writes into, and `UdpConnectionId` carries the fixed connection-id
/// value the media-stream server sends once per client instead of pattern bytes.
#[derive(Clone)]
pub enum TaskBuffer {
    Static(Arc<[u8]>),
    Tracked(Arc<Mutex<Vec<u8>>>),
    UdpConnectionId(u64),
}

impl fmt::Debug for TaskBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskBuffer::Static(b) => f.debug_tuple("Static").field(&b.len()).finish(),
            TaskBuffer::Tracked(b) => f.debug_tuple("Tracked").field(&b.lock().len()).finish(),
            TaskBuffer::UdpConnectionId(id) => f.debug_tuple("UdpConnectionId").field(id).finish(),
        }
    }
}

/// Which kind of buffer a task carries; mirrors [`TaskBuffer`]'s variants without requiring a
/// match on the data itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Static,
    Tracked,
    UdpConnectionId,
}

impl TaskBuffer {
    pub fn kind(&self) -> BufferKind {
        match self {
            TaskBuffer::Static(_) => BufferKind::Static,
            TaskBuffer::Tracked(_) => BufferKind::Tracked,
            TaskBuffer::UdpConnectionId(_) => BufferKind::UdpConnectionId,
        }
    }

    /// Copies out the bytes this task should send, honoring `offset`/`length`.
    ///
    /// `UdpConnectionId` buffers ignore offset/length and always return the 8-byte big-endian
    /// encoding of the id: there is nothing to slice.
    pub fn send_slice(&self, offset: usize, length: usize) -> Vec<u8> {
        match self {
            TaskBuffer::Static(b) => b[offset..offset + length].to_vec(),
            TaskBuffer::Tracked(b) => {
                let guard = b.lock();
                guard[offset..offset + length].to_vec()
            }
            TaskBuffer::UdpConnectionId(id) => id.to_be_bytes().to_vec(),
        }
    }

    /// Copies `data` into the tracked buffer at `offset`. Only meaningful for `Tracked`
    /// buffers; a `Recv` task must never carry anything else.
    pub fn recv_into(&self, offset: usize, data: &[u8]) {
        if let TaskBuffer::Tracked(buf) = self {
            let mut guard = buf.lock();
            if guard.len() < offset + data.len() {
                guard.resize(offset + data.len(), 0);
            }
            guard[offset..offset + data.len()].copy_from_slice(data);
        }
    }
}

/// A single unit of work an [`crate::io::IoPattern`] hands a driver.
///
/// Short-lived: owned by the driver for the duration of one I/O call and its completion.
#[derive(Debug, Clone)]
pub struct Task {
    pub action: Action,
    pub buffer: TaskBuffer,
    pub buffer_offset: usize,
    pub buffer_length: usize,
    /// Slot id into a registered-IO buffer pool, when the registered-IO driver is in use.
    pub rio_buffer_id: Option<u32>,
    /// Whether this task should be counted toward the socket's in-flight I/O counter. Almost
    /// always `true`; patterns may set this `false` for bookkeeping tasks that never touch the
    /// network (rare, but mirrors the source's field of the same name).
    pub track_io: bool,
    /// Delay, in milliseconds, before this task should be executed. Used by the paced
    /// datagram driver; ignored by the others.
    pub time_offset_ms: u64,
    /// The byte offset the pattern expects this task to represent within its overall stream,
    /// used by patterns that verify ordering.
    pub expected_pattern_offset: u64,
}

impl Task {
    pub fn buffer_kind(&self) -> BufferKind {
        self.buffer.kind()
    }

    /// A task requesting no work, matching `Action::None`.
    pub fn idle() -> Self {
        Self {
            action: Action::None,
            buffer: TaskBuffer::UdpConnectionId(0),
            buffer_offset: 0,
            buffer_length: 0,
            rio_buffer_id: None,
            track_io: false,
            time_offset_ms: 0,
            expected_pattern_offset: 0,
        }
    }
}
