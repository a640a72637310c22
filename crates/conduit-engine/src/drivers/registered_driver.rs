//! The registered-IO backend: one process-global completion queue, a small pool of worker tasks
//! draining it, and a per-connection request-queue reservation that grows on demand.
//!
//! A real registered-IO API pins reusable buffers with the kernel once and reuses them across
//! calls; the async runtime already gives every backend a reactor-managed buffer of its own, so
//! what this backend actually reproduces is the *bookkeeping* shape: a bounded number of
//! concurrently outstanding requests per socket, a shared completion queue sized to the sum of
//! every socket's reservation, and a dedicated worker pool that performs UDP sends/recvs (the
//! only handle type that can be moved onto another task without taking ownership away from the
//! connection — a `TcpStream` can't be cloned, so stream sockets run their I/O inline instead,
//! still gated by the same admission semaphore).

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Semaphore};
use tracing::{event, Level};

use crate::drivers::IoBackend;
use crate::error::SocketError;
use crate::socket::{ConnectionSocket, SocketHandle};

/// Default worker-pool size draining the global completion queue.
const WORKER_COUNT: usize = 4;

enum RegisteredOp {
    Send {
        udp: Arc<UdpSocket>,
        data: Vec<u8>,
        reply: oneshot::Sender<io::Result<usize>>,
    },
    Recv {
        udp: Arc<UdpSocket>,
        max_len: usize,
        reply: oneshot::Sender<io::Result<Vec<u8>>>,
    },
}

/// The process-wide completion queue. Every `RegisteredIoBackend` UDP call posts one
/// [`RegisteredOp`] here; a fixed pool of worker tasks dequeues them, performs the real socket
/// call, and reports the result back through the op's oneshot reply channel.
struct CompletionQueue {
    sender: mpsc::UnboundedSender<RegisteredOp>,
    /// Sum of every socket's currently reserved send+recv slots. There's no fixed-size kernel
    /// buffer to actually resize once the queue is backed by an unbounded channel, but the
    /// reservation accounting still mirrors the source's grow-CQ-then-grow-RQ ordering.
    reserved: AtomicUsize,
}

impl CompletionQueue {
    fn new(worker_count: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let queue = Arc::new(Self {
            sender,
            reserved: AtomicUsize::new(0),
        });
        for worker_id in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            tokio::spawn(Self::worker_loop(worker_id, receiver));
        }
        queue
    }

    async fn worker_loop(
        worker_id: usize,
        receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RegisteredOp>>>,
    ) {
        loop {
            let op = {
                let mut guard = receiver.lock().await;
                guard.recv().await
            };
            let Some(op) = op else {
                // The queue's last sender was dropped; nothing left to ever dequeue.
                return;
            };
            event!(Level::TRACE, worker_id, "registered-io worker dequeued a completion");
            match op {
                RegisteredOp::Send { udp, data, reply } => {
                    let _ = reply.send(udp.send(&data).await);
                }
                RegisteredOp::Recv { udp, max_len, reply } => {
                    let mut buf = vec![0u8; max_len];
                    let result = udp.recv(&mut buf).await.map(|n| {
                        buf.truncate(n);
                        buf
                    });
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn grow(&self, by: usize) {
        self.reserved.fetch_add(by, Ordering::AcqRel);
    }
}

static GLOBAL_COMPLETION_QUEUE: OnceLock<Arc<CompletionQueue>> = OnceLock::new();

fn global_completion_queue() -> Arc<CompletionQueue> {
    Arc::clone(GLOBAL_COMPLETION_QUEUE.get_or_init(|| CompletionQueue::new(WORKER_COUNT)))
}

/// One connection's reserved send/recv slots, grown by `growth_factor` whenever a post would
/// exceed the current reservation.
struct RequestQueue {
    send_permits: Semaphore,
    recv_permits: Semaphore,
    growth_factor: usize,
}

impl RequestQueue {
    fn new(growth_factor: usize) -> Self {
        let initial = (growth_factor / 2).max(1);
        Self {
            send_permits: Semaphore::new(initial),
            recv_permits: Semaphore::new(initial),
            growth_factor,
        }
    }

    /// Grows the send side by `growth_factor`, enlarging the global completion queue's
    /// reservation first, matching the source's CQ-before-RQ growth order.
    fn grow_send(&self, cq: &CompletionQueue) {
        cq.grow(self.growth_factor);
        self.send_permits.add_permits(self.growth_factor);
    }

    fn grow_recv(&self, cq: &CompletionQueue) {
        cq.grow(self.growth_factor);
        self.recv_permits.add_permits(self.growth_factor);
    }
}

/// The registered-IO backend. One instance may be shared across every connection using this
/// driver; per-connection state (the request queue) is keyed by the connection's address and
/// created lazily on first use.
///
/// Per-connection entries are never evicted — acceptable for the lifetime of a single engine run,
/// noted as a known limitation rather than built out into a full eviction scheme.
pub struct RegisteredIoBackend {
    growth_factor: usize,
    queues: Mutex<HashMap<usize, Arc<RequestQueue>>>,
}

impl RegisteredIoBackend {
    pub fn new(growth_factor: u32) -> Self {
        Self {
            growth_factor: growth_factor.max(1) as usize,
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn request_queue(&self, socket: &ConnectionSocket) -> Arc<RequestQueue> {
        let key = socket as *const ConnectionSocket as usize;
        let mut queues = self.queues.lock();
        Arc::clone(
            queues
                .entry(key)
                .or_insert_with(|| Arc::new(RequestQueue::new(self.growth_factor))),
        )
    }
}

#[async_trait]
impl IoBackend for RegisteredIoBackend {
    async fn send(&self, socket: &ConnectionSocket, data: &[u8]) -> Result<usize, SocketError> {
        let cq = global_completion_queue();
        let rq = self.request_queue(socket);
        let permit = match rq.send_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                rq.grow_send(&cq);
                rq.send_permits
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("request queue semaphore is never closed")
            }
        };

        let mut guard = socket.lock().await;
        match &mut *guard {
            SocketHandle::Udp(udp) => {
                let udp = Arc::clone(udp);
                drop(guard);
                let (reply_tx, reply_rx) = oneshot::channel();
                cq.sender
                    .send(RegisteredOp::Send {
                        udp,
                        data: data.to_vec(),
                        reply: reply_tx,
                    })
                    .map_err(|_| SocketError::Aborted)?;
                let result = reply_rx
                    .await
                    .map_err(|_| SocketError::Aborted)?
                    .map_err(SocketError::Io);
                drop(permit);
                result
            }
            // A `TcpStream` can't be cloned onto a worker task without taking ownership away
            // from the connection, so stream sends just run on the caller's own task, still
            // gated by the same admission semaphore the UDP path uses for the whole operation.
            SocketHandle::Tcp(stream) => {
                let result = stream.write_all(data).await.map_err(SocketError::Io);
                drop(permit);
                result?;
                Ok(data.len())
            }
            SocketHandle::None => Err(SocketError::NotSet),
        }
    }

    async fn recv(&self, socket: &ConnectionSocket, max_len: usize) -> Result<Vec<u8>, SocketError> {
        let cq = global_completion_queue();
        let rq = self.request_queue(socket);
        let permit = match rq.recv_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                rq.grow_recv(&cq);
                rq.recv_permits
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("request queue semaphore is never closed")
            }
        };

        let mut guard = socket.lock().await;
        match &mut *guard {
            SocketHandle::Udp(udp) => {
                let udp = Arc::clone(udp);
                drop(guard);
                let (reply_tx, reply_rx) = oneshot::channel();
                cq.sender
                    .send(RegisteredOp::Recv {
                        udp,
                        max_len,
                        reply: reply_tx,
                    })
                    .map_err(|_| SocketError::Aborted)?;
                let result = reply_rx
                    .await
                    .map_err(|_| SocketError::Aborted)?
                    .map_err(SocketError::Io);
                drop(permit);
                result
            }
            SocketHandle::Tcp(stream) => {
                let mut buf = vec![0u8; max_len];
                let read = stream.read(&mut buf).await.map_err(SocketError::Io);
                drop(permit);
                let n = read?;
                if n == 0 {
                    return Err(SocketError::Reset);
                }
                buf.truncate(n);
                Ok(buf)
            }
            SocketHandle::None => Err(SocketError::NotSet),
        }
    }

    async fn shutdown(&self, socket: &ConnectionSocket, force: bool) -> Result<(), SocketError> {
        let mut guard = socket.lock().await;
        match &mut *guard {
            SocketHandle::Tcp(stream) => {
                if force {
                    stream.set_linger(Some(std::time::Duration::from_secs(0))).ok();
                }
                stream.shutdown().await.map_err(SocketError::Io)
            }
            SocketHandle::Udp(_) => {
                drop(guard);
                socket.close_socket().await;
                Ok(())
            }
            SocketHandle::None => Ok(()),
        }
    }
}
