use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{event, Level};

use crate::config::{Settings, UNLIMITED};
use crate::executor::FlatQueue;
use crate::state::{BrokerNotifier, InternalState, SocketState};
use crate::stats::Stats;

/// A snapshot of the broker's quota counters, useful for status reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerQuota {
    pub pending_sockets: u32,
    pub active_sockets: u32,
    pub total_connections_remaining: u64,
}

struct BrokerInner {
    socket_pool: Vec<Arc<SocketState>>,
    total_connections_remaining: u64,
    pending_limit: u32,
    pending_sockets: u32,
    active_sockets: u32,
}

/// Admits connections up to the configured quota and keeps the pending/active pool topped up
/// as connections complete, throttling outgoing connection attempts per
/// [`Settings::connection_throttle_limit`].
///
/// Grounded directly on the source's socket broker: one flat refill queue collapses the bursts
/// of refill requests `initiating_io`/`closing` generate into a single rescan, and a scavenging
/// pass removes `Closed` entries from the pool before considering whether to admit more.
pub struct Broker {
    self_weak: Weak<Broker>,
    inner: Mutex<BrokerInner>,
    settings: Arc<Settings>,
    stats: Arc<Stats>,
    refill: FlatQueue,
    notify: Notify,
    done: AtomicBool,
    shutdown_requested: AtomicBool,
}

impl Broker {
    pub fn new(settings: Arc<Settings>, stats: Arc<Stats>) -> Arc<Self> {
        let (mut total_connections_remaining, mut pending_limit) = if settings.is_server() {
            (settings.server_exit_limit, settings.accept_limit)
        } else if settings.iterations == UNLIMITED {
            (UNLIMITED, settings.connection_limit)
        } else {
            (
                settings.iterations * u64::from(settings.connection_limit),
                settings.connection_limit,
            )
        };
        if u64::from(pending_limit) > total_connections_remaining {
            pending_limit = total_connections_remaining as u32;
        }

        event!(
            Level::DEBUG,
            total_connections_remaining,
            pending_limit,
            "starting broker"
        );

        Arc::new_cyclic(|self_weak| {
            let refill_weak = self_weak.clone();
            Broker {
                self_weak: self_weak.clone(),
                inner: Mutex::new(BrokerInner {
                    socket_pool: Vec::new(),
                    total_connections_remaining,
                    pending_limit,
                    pending_sockets: 0,
                    active_sockets: 0,
                }),
                settings,
                stats,
                refill: FlatQueue::new(move || {
                    let weak = refill_weak.clone();
                    async move {
                        if let Some(broker) = weak.upgrade() {
                            broker.refresh_sockets().await;
                        }
                    }
                }),
                notify: Notify::new(),
                done: AtomicBool::new(false),
                shutdown_requested: AtomicBool::new(false),
            }
        })
    }

    /// Admits the initial batch of connections, up to the pending limit (and the outgoing
    /// throttle limit for client configurations).
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        self.admit_while_room(&mut inner);
    }

    fn admit_while_room(self: &Arc<Self>, inner: &mut BrokerInner) {
        while inner.total_connections_remaining > 0 && inner.pending_sockets < inner.pending_limit
        {
            // Only client configurations throttle on the overall connection count; a server's
            // accept loop is bounded by `pending_limit` (the accept limit) alone.
            if !self.settings.is_server() {
                if inner.pending_sockets + inner.active_sockets >= self.settings.connection_limit {
                    break;
                }
                if inner.pending_sockets >= self.settings.connection_throttle_limit {
                    break;
                }
            }

            let state = SocketState::new(
                Weak::clone(&self.self_weak) as Weak<dyn BrokerNotifier>,
                Arc::clone(&self.settings),
                Arc::clone(&self.stats),
            );
            state.start();
            inner.socket_pool.push(state);
            inner.pending_sockets += 1;
            inner.total_connections_remaining -= 1;
        }
    }

    /// Blocks until every admitted connection has finished and no more remain to admit, or
    /// until [`Self::request_shutdown`] is called.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.done.load(Ordering::Acquire) || self.shutdown_requested.load(Ordering::Acquire)
            {
                return;
            }
            notified.await;
        }
    }

    /// Asks the broker to stop admitting new connections and report itself done once the
    /// already-admitted ones drain. Connections already in flight are not forcibly aborted.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.refill.submit();
    }

    pub fn quota(&self) -> BrokerQuota {
        let inner = self.inner.lock();
        BrokerQuota {
            pending_sockets: inner.pending_sockets,
            active_sockets: inner.active_sockets,
            total_connections_remaining: inner.total_connections_remaining,
        }
    }

    async fn refresh_sockets(self: Arc<Self>) {
        let mut removed = Vec::new();
        let exiting;
        {
            let mut inner = self.inner.lock();
            exiting = inner.total_connections_remaining == 0
                && inner.pending_sockets == 0
                && inner.active_sockets == 0;

            if exiting {
                removed = std::mem::take(&mut inner.socket_pool);
            } else {
                let mut remaining = Vec::with_capacity(inner.socket_pool.len());
                for entry in std::mem::take(&mut inner.socket_pool) {
                    if entry.current_state() == InternalState::Closed {
                        entry.detach();
                        removed.push(entry);
                    } else {
                        remaining.push(entry);
                    }
                }
                inner.socket_pool = remaining;

                if !self.shutdown_requested.load(Ordering::Acquire) {
                    self.admit_while_room(&mut inner);
                }
            }
        }

        // Dropping the removed `SocketState`s outside the lock matches the source's care to
        // never run a socket's destructor while holding the broker's lock.
        drop(removed);

        if exiting {
            self.done.store(true, Ordering::Release);
            self.notify.notify_waiters();
        }
    }
}

impl BrokerNotifier for Broker {
    fn initiating_io(&self) {
        {
            let mut inner = self.inner.lock();
            assert!(
                inner.pending_sockets > 0,
                "initiating_io observed pending_sockets == 0 (active_sockets == {})",
                inner.active_sockets
            );
            inner.pending_sockets -= 1;
            inner.active_sockets += 1;
        }
        self.refill.submit();
    }

    fn closing(&self, was_active: bool) {
        {
            let mut inner = self.inner.lock();
            if was_active {
                assert!(
                    inner.active_sockets > 0,
                    "closing observed active_sockets == 0 (pending_sockets == {})",
                    inner.pending_sockets
                );
                inner.active_sockets -= 1;
            } else {
                assert!(
                    inner.pending_sockets > 0,
                    "closing observed pending_sockets == 0 (active_sockets == {})",
                    inner.active_sockets
                );
                inner.pending_sockets -= 1;
            }
        }
        self.refill.submit();
    }
}
