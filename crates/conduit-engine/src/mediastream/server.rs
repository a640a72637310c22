//! The UDP media-stream demultiplexer: matches client handshakes to `SocketState`s waiting to
//! accept, and routes removal back when a connection's pattern finishes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::{event, Level};

use crate::config::{BoxFuture, FunctorResult};
use crate::error::{MediaStreamError, SocketError};
use crate::mediastream::connected_socket::ConnectedSocket;
use crate::mediastream::listening_socket::ListeningSocket;
use crate::socket::{ConnectionSocket, SocketHandle};

/// A client handshake that arrived before any accept slot was waiting for it.
struct UnmatchedHandshake {
    listener: Arc<UdpSocket>,
    local_addr: SocketAddr,
    remote: SocketAddr,
}

struct ServerInner {
    connected: HashMap<SocketAddr, ConnectedSocket>,
    /// Accept slots waiting for a handshake, most-recently-queued last (a LIFO stack, matching
    /// the source's "pop from the back" matching order).
    pending_accepts: Vec<(Weak<ConnectionSocket>, oneshot::Sender<FunctorResult>)>,
    /// Handshakes that arrived with no accept slot waiting, same LIFO ordering.
    unmatched: Vec<UnmatchedHandshake>,
}

/// The UDP demultiplexer tying every listen address to the set of currently connected clients.
///
/// One shared instance drives every `SocketState` created for this server: its `accept` functor
/// (registered via [`MediaStreamServer::accept_fn`]) either completes immediately against an
/// already-arrived handshake or waits for one to arrive; its `closing` functor (via
/// [`MediaStreamServer::closing_fn`]) removes the entry once a connection's pattern finishes.
pub struct MediaStreamServer {
    listeners: Vec<ListeningSocket>,
    inner: Mutex<ServerInner>,
    duplicate_handshakes: AtomicU64,
}

impl MediaStreamServer {
    /// Binds one UDP socket per address. Fails if `addrs` is empty, matching the source's refusal
    /// to start with no listen addresses configured.
    pub async fn bind(addrs: &[SocketAddr]) -> Result<Arc<Self>, MediaStreamError> {
        if addrs.is_empty() {
            return Err(MediaStreamError::NoListenAddresses);
        }
        let mut listeners = Vec::with_capacity(addrs.len());
        for addr in addrs {
            listeners.push(ListeningSocket::bind(*addr).await?);
        }
        Ok(Arc::new(Self {
            listeners,
            inner: Mutex::new(ServerInner {
                connected: HashMap::new(),
                pending_accepts: Vec::new(),
                unmatched: Vec::new(),
            }),
            duplicate_handshakes: AtomicU64::new(0),
        }))
    }

    /// Starts every listener's recv loop. Call once, after `bind`.
    pub fn start(self: &Arc<Self>) {
        for listener in &self.listeners {
            listener.spawn_recv_loop(Arc::clone(self));
        }
    }

    pub fn duplicate_handshakes(&self) -> u64 {
        self.duplicate_handshakes.load(Ordering::Relaxed)
    }

    /// The bound address of every listener, in the order `addrs` was given to `bind`. Useful
    /// when a caller binds to an ephemeral port and needs to learn what it actually got.
    pub fn listen_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(ListeningSocket::local_addr).collect()
    }

    /// A no-op `Settings::create` functor: the socket handle isn't installed until a handshake
    /// is actually matched, in `accept`/`handle_start`.
    pub fn create_fn() -> impl Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static
    {
        |_weak| Box::pin(async { Ok(()) })
    }

    /// Builds the `Settings::accept` functor for this server.
    pub fn accept_fn(
        self: &Arc<Self>,
    ) -> impl Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static
    {
        let this = Arc::clone(self);
        move |weak| {
            let this = Arc::clone(&this);
            Box::pin(async move { this.accept(weak).await })
        }
    }

    /// Builds the `Settings::closing` functor for this server.
    pub fn closing_fn(
        self: &Arc<Self>,
    ) -> impl Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static
    {
        let this = Arc::clone(self);
        move |weak| {
            let this = Arc::clone(&this);
            Box::pin(async move { this.remove(weak).await })
        }
    }

    async fn accept(self: &Arc<Self>, weak: Weak<ConnectionSocket>) -> FunctorResult {
        enum Outcome {
            Matched(Arc<UdpSocket>, SocketAddr, SocketAddr),
            Pending(oneshot::Receiver<FunctorResult>),
        }

        let outcome = {
            let mut inner = self.inner.lock();
            if let Some(handshake) = inner.unmatched.pop() {
                inner.connected.insert(
                    handshake.remote,
                    ConnectedSocket::new(Arc::clone(&handshake.listener), handshake.remote),
                );
                Outcome::Matched(handshake.listener, handshake.local_addr, handshake.remote)
            } else {
                let (tx, rx) = oneshot::channel();
                inner.pending_accepts.push((Weak::clone(&weak), tx));
                Outcome::Pending(rx)
            }
        };

        match outcome {
            Outcome::Matched(listener, local_addr, remote) => {
                let Some(socket) = weak.upgrade() else {
                    return Ok(());
                };
                install_matched_socket(&socket, listener, local_addr, remote).await;
                Ok(())
            }
            Outcome::Pending(rx) => rx.await.unwrap_or(Err(SocketError::Aborted)),
        }
    }

    /// Called by a listening socket's recv loop when a `START` datagram arrives.
    pub(crate) async fn handle_start(
        self: &Arc<Self>,
        listener: Arc<UdpSocket>,
        local_addr: SocketAddr,
        remote: SocketAddr,
    ) {
        let matched = {
            let mut inner = self.inner.lock();
            if inner.connected.contains_key(&remote)
                || inner.unmatched.iter().any(|h| h.remote == remote)
            {
                self.duplicate_handshakes.fetch_add(1, Ordering::Relaxed);
                event!(Level::DEBUG, %remote, "duplicate media-stream start request, discarding");
                return;
            }

            let mut found = None;
            while let Some((weak, tx)) = inner.pending_accepts.pop() {
                if weak.upgrade().is_some() {
                    found = Some((weak, tx));
                    break;
                }
            }

            match found {
                Some((weak, tx)) => {
                    inner
                        .connected
                        .insert(remote, ConnectedSocket::new(Arc::clone(&listener), remote));
                    Some((weak, tx, Arc::clone(&listener)))
                }
                None => {
                    inner.unmatched.push(UnmatchedHandshake {
                        listener,
                        local_addr,
                        remote,
                    });
                    None
                }
            }
        };

        if let Some((weak, tx, listener)) = matched {
            if let Some(socket) = weak.upgrade() {
                install_matched_socket(&socket, listener, local_addr, remote).await;
            }
            let _ = tx.send(Ok(()));
            event!(Level::DEBUG, %local_addr, %remote, "media-stream client connected");
        }
    }

    async fn remove(self: &Arc<Self>, weak: Weak<ConnectionSocket>) -> FunctorResult {
        let Some(socket) = weak.upgrade() else {
            return Ok(());
        };
        let Some(remote) = socket.target_address() else {
            return Ok(());
        };
        let removed = self.inner.lock().connected.remove(&remote);
        if removed.is_none() {
            event!(Level::DEBUG, %remote, "no connected media-stream client to remove");
        }
        Ok(())
    }
}

async fn install_matched_socket(
    socket: &Arc<ConnectionSocket>,
    listener: Arc<UdpSocket>,
    local_addr: SocketAddr,
    remote: SocketAddr,
) {
    socket.set_local_address(local_addr);
    socket.set_target_address(remote);
    if matches!(*socket.lock().await, SocketHandle::None) {
        socket.set_socket(SocketHandle::Udp(listener)).await;
    }
}
