use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{event, Level};

use crate::error::SocketError;
use crate::io::IoPattern;
use crate::socket::guard::SocketGuard;

/// The concrete network handle a [`ConnectionSocket`] wraps. `None` until `set_socket` is
/// called, and again once `close_socket` has run.
pub enum SocketHandle {
    None,
    Tcp(TcpStream),
    /// Shared because the media-stream server demultiplexes many connections over one bound
    /// UDP socket; each per-client `ConnectionSocket` holds a handle to the same underlying
    /// socket rather than owning it.
    Udp(Arc<UdpSocket>),
}

impl SocketHandle {
    pub fn is_none(&self) -> bool {
        matches!(self, SocketHandle::None)
    }
}

/// Callback boundary a [`ConnectionSocket`] uses to report a stage's completion back to its
/// owning state machine, without the socket module depending on the state module's concrete
/// type. Implemented by `SocketState`.
pub trait StateNotifier: Send + Sync {
    fn complete_state(&self, error: Option<SocketError>);
}

/// A single connection's socket handle, reference-counted I/O counter, and associated
/// application pattern.
///
/// Grounded on the source's safe-socket container: the handle itself is guarded by a lock since
/// `close_socket` may run concurrently with in-flight I/O, while the I/O counter is a plain
/// atomic so functors can cheaply track how many operations they've pended without taking that
/// lock.
pub struct ConnectionSocket {
    handle: AsyncMutex<SocketHandle>,
    io_count: AtomicU32,
    parent: Weak<dyn StateNotifier>,
    pattern: Mutex<Option<Arc<dyn IoPattern>>>,
    local_address: Mutex<Option<SocketAddr>>,
    target_address: Mutex<Option<SocketAddr>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSocket {
    pub fn new(parent: Weak<dyn StateNotifier>) -> Self {
        Self {
            handle: AsyncMutex::new(SocketHandle::None),
            io_count: AtomicU32::new(0),
            parent,
            pattern: Mutex::new(None),
            local_address: Mutex::new(None),
            target_address: Mutex::new(None),
            timer: Mutex::new(None),
        }
    }

    /// Installs the connected/accepted socket. Must only be called once; a second call
    /// overwrites a handle that should already have gone through `close_socket`, which would be
    /// a state-machine bug, so this panics rather than silently leaking the old handle.
    pub async fn set_socket(&self, handle: SocketHandle) {
        let mut guard = self.handle.lock().await;
        assert!(guard.is_none(), "set_socket called on an already-assigned socket");
        *guard = handle;
    }

    /// Drops the handle, closing the socket. Safe to call more than once; a second call is a
    /// no-op. This is the only sanctioned way to close a connection's socket — closing it
    /// through any other path would leave this container's notion of the handle's state stale.
    pub async fn close_socket(&self) {
        let mut guard = self.handle.lock().await;
        if !guard.is_none() {
            event!(Level::TRACE, "closing connection socket");
            *guard = SocketHandle::None;
        }
    }

    /// Locks the handle for the duration of the returned guard.
    pub async fn lock(&self) -> SocketGuard<'_> {
        SocketGuard::new(self.handle.lock().await)
    }

    pub fn increment_io(&self) -> u32 {
        self.io_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decrement_io(&self) -> u32 {
        let previous = self.io_count.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "decrement_io dropped the I/O counter below zero");
        previous - 1
    }

    pub fn pended_io(&self) -> u32 {
        self.io_count.load(Ordering::Acquire)
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        *self.local_address.lock()
    }

    pub fn set_local_address(&self, addr: SocketAddr) {
        *self.local_address.lock() = Some(addr);
    }

    pub fn target_address(&self) -> Option<SocketAddr> {
        *self.target_address.lock()
    }

    pub fn set_target_address(&self, addr: SocketAddr) {
        *self.target_address.lock() = Some(addr);
    }

    pub fn io_pattern(&self) -> Option<Arc<dyn IoPattern>> {
        self.pattern.lock().clone()
    }

    pub fn set_io_pattern(&self, pattern: Arc<dyn IoPattern>) {
        *self.pattern.lock() = Some(pattern);
    }

    /// Reports this stage's completion to the owning state machine, if it still exists.
    ///
    /// Per the upgrade-or-abandon convention used throughout this crate: a socket whose parent
    /// state machine has already been torn down simply has nothing left to notify.
    pub fn complete_state(&self, error: Option<SocketError>) {
        if let Some(parent) = self.parent.upgrade() {
            parent.complete_state(error);
        }
    }

    /// Asks the connection's pattern to print whatever summary it keeps, using this socket's
    /// addresses.
    pub fn print_pattern_results(&self) {
        let (local, target) = (self.local_address(), self.target_address());
        if let (Some(pattern), Some(local), Some(target)) =
            (self.pattern.lock().clone(), local, target)
        {
            pattern.print_statistics(local, target);
        }
    }

    /// Schedules `task` to run after its requested delay, keeping only a weak reference to
    /// `self` alive in the scheduled work so a closed connection's timer can't keep the socket
    /// resident.
    pub fn set_timer<F>(self: &Arc<Self>, delay_ms: u64, on_fire: F)
    where
        F: FnOnce(Weak<ConnectionSocket>) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let mut guard = self.timer.lock();
        if let Some(previous) = guard.take() {
            previous.abort();
        }
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            on_fire(weak);
        }));
    }
}

impl Drop for ConnectionSocket {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}
