use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{event, Level};

use crate::config::Settings;
use crate::error::SocketError;
use crate::executor::SerialQueue;
use crate::socket::{ConnectionSocket, StateNotifier};
use crate::stats::Stats;

/// The lifecycle a connection moves through from creation to teardown.
///
/// Mirrors the source's `InternalState` exactly; the four transitory states
/// (`Creating`/`Connecting`/`InitiatingIo`/`Closing`) are the ones the worker itself executes,
/// while `Created`/`Connected`/`InitiatedIo` are the states `complete_state` observes when a
/// functor reports success and decides what runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalState {
    Creating,
    Created,
    Connecting,
    Connected,
    InitiatingIo,
    InitiatedIo,
    Closing,
    Closed,
}

/// Callback boundary a [`SocketState`] uses to notify its owning broker of quota-relevant
/// transitions, without this module depending on the broker module's concrete type.
pub trait BrokerNotifier: Send + Sync {
    /// A connection just moved from pending to active.
    fn initiating_io(&self);
    /// A connection just moved to `Closing`. `was_active` is whether it had ever reached
    /// `InitiatingIo` (and so had been counted against the broker's active quota).
    fn closing(&self, was_active: bool);
}

/// Drives one connection through [`InternalState`], dispatching the configured functors at each
/// transition and reporting quota-relevant events back to the broker.
///
/// Every transition runs on this instance's own [`SerialQueue`], so two stages of the same
/// connection's lifecycle are never executing concurrently — the same guarantee the source gets
/// from handing one thread-pool work object to one `ctsSocketState`.
pub struct SocketState {
    self_weak: Weak<SocketState>,
    state: Mutex<InternalState>,
    socket: Mutex<Option<Arc<ConnectionSocket>>>,
    broker: Mutex<Option<Weak<dyn BrokerNotifier>>>,
    settings: Arc<Settings>,
    stats: Arc<Stats>,
    queue: SerialQueue,
    last_error: Mutex<Option<SocketError>>,
    initiated_io: AtomicBool,
}

impl SocketState {
    pub fn new(
        broker: Weak<dyn BrokerNotifier>,
        settings: Arc<Settings>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            state: Mutex::new(InternalState::Creating),
            socket: Mutex::new(None),
            broker: Mutex::new(Some(broker)),
            settings,
            stats,
            queue: SerialQueue::new(),
            last_error: Mutex::new(None),
            initiated_io: AtomicBool::new(false),
        })
    }

    pub fn current_state(&self) -> InternalState {
        *self.state.lock()
    }

    pub fn last_error(&self) -> Option<SocketError> {
        // SocketError doesn't implement Clone (it wraps io::Error), so callers only ever get to
        // ask *whether* one occurred and what kind, not take ownership of the original.
        self.last_error.lock().as_ref().map(Self::clone_marker)
    }

    fn clone_marker(error: &SocketError) -> SocketError {
        match error {
            SocketError::AlreadySet => SocketError::AlreadySet,
            SocketError::NotSet => SocketError::NotSet,
            SocketError::Aborted => SocketError::Aborted,
            SocketError::Reset => SocketError::Reset,
            SocketError::NoBufferSpace => SocketError::NoBufferSpace,
            SocketError::MessageTooLarge => SocketError::MessageTooLarge,
            SocketError::AddressInUse => SocketError::AddressInUse,
            SocketError::Io(e) => SocketError::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }

    /// Detaches this connection from its broker, so later transitions stop reporting quota
    /// events. Used once a socket has been removed from the broker's pool.
    pub fn detach(&self) {
        *self.broker.lock() = None;
    }

    /// Begins driving the connection. Must only be called once, immediately after construction.
    pub fn start(self: &Arc<Self>) {
        assert_eq!(
            self.current_state(),
            InternalState::Creating,
            "SocketState::start must only be called once at the initial state"
        );
        self.schedule_current_state();
    }

    fn schedule_current_state(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.queue.submit(async move { this.run_current_state().await });
    }

    async fn run_current_state(self: Arc<Self>) {
        let current = self.current_state();
        match current {
            InternalState::Creating => self.run_creating().await,
            InternalState::Connecting => self.run_connecting().await,
            InternalState::InitiatingIo => self.run_initiating_io().await,
            InternalState::Closing => self.run_closing().await,
            other => unreachable!("socket state worker observed a transitory state {other:?}"),
        }
    }

    async fn run_creating(self: &Arc<Self>) {
        let socket = Arc::new(ConnectionSocket::new(
            Arc::downgrade(self) as Weak<dyn StateNotifier>
        ));
        *self.socket.lock() = Some(Arc::clone(&socket));
        *self.state.lock() = InternalState::Created;
        event!(Level::TRACE, "socket state Created");

        let result = (self.settings.create)(Arc::downgrade(&socket)).await;
        self.complete_state(result.err());
    }

    async fn run_connecting(self: &Arc<Self>) {
        *self.state.lock() = InternalState::Connected;
        event!(Level::TRACE, "socket state Connected");

        let socket = self.socket.lock().clone().expect("socket set before Connecting");
        let weak = Arc::downgrade(&socket);
        let result = if self.settings.is_server() {
            (self
                .settings
                .accept
                .as_ref()
                .expect("accept functor present for server configuration"))(weak)
            .await
        } else {
            (self
                .settings
                .connect
                .as_ref()
                .expect("connect functor present for client configuration"))(weak)
            .await
        };
        self.complete_state(result.err());
    }

    async fn run_initiating_io(self: &Arc<Self>) {
        let socket = self.socket.lock().clone().expect("socket set before InitiatingIo");
        let pattern_result = (self.settings.pattern_factory)();
        let error = match pattern_result {
            Ok(pattern) => {
                socket.set_io_pattern(pattern);
                *self.state.lock() = InternalState::InitiatedIo;
                event!(Level::TRACE, "socket state InitiatedIO");
                let weak = Arc::downgrade(&socket);
                (self.settings.io)(weak).await.err()
            }
            Err(e) => Some(e),
        };
        self.complete_state(error);
    }

    async fn run_closing(self: &Arc<Self>) {
        let initiated_io = self.initiated_io.load(Ordering::Acquire);

        if let Some(closing) = self.settings.closing.as_ref() {
            let socket = self.socket.lock().clone();
            if let Some(socket) = socket {
                if let Err(e) = (closing)(Arc::downgrade(&socket)).await {
                    event!(Level::DEBUG, error = %e, "closing functor reported an error");
                }
            }
        }

        if let Some(broker) = self.broker.lock().as_ref().and_then(Weak::upgrade) {
            broker.closing(initiated_io);
        }

        if initiated_io {
            let last_error = self.last_error.lock();
            match last_error.as_ref() {
                None => self.stats.record_success(),
                Some(e) if e.is_protocol_error() => self.stats.record_protocol_error(true),
                Some(_) => self.stats.record_connection_error(true),
            }
        } else {
            self.stats.record_connection_error(false);
        }

        let socket = self.socket.lock().clone();
        if let Some(socket) = socket {
            socket.close_socket().await;
            socket.print_pattern_results();
        }

        *self.state.lock() = InternalState::Closed;
        event!(Level::TRACE, "socket state Closed");
    }
}

impl StateNotifier for SocketState {
    fn complete_state(&self, error: Option<SocketError>) {
        let mut notify_initiating_io = false;
        {
            let mut state = self.state.lock();
            match error {
                None => match *state {
                    InternalState::Created => {
                        if self.settings.connect.is_some() || self.settings.accept.is_some() {
                            *state = InternalState::Connecting;
                        } else {
                            notify_initiating_io = true;
                            *state = InternalState::InitiatingIo;
                            self.stats.record_active();
                        }
                    }
                    InternalState::Connected => {
                        notify_initiating_io = true;
                        *state = InternalState::InitiatingIo;
                        self.stats.record_active();
                    }
                    InternalState::InitiatedIo => {
                        self.initiated_io.store(true, Ordering::Release);
                        *state = InternalState::Closing;
                    }
                    other => unreachable!(
                        "complete_state observed an invalid internal state {other:?}"
                    ),
                },
                Some(e) => {
                    if *state == InternalState::InitiatedIo {
                        self.initiated_io.store(true, Ordering::Release);
                    }
                    *self.last_error.lock() = Some(e);
                    *state = InternalState::Closing;
                }
            }
        }

        // Notifying the broker must happen outside the state lock: the broker's own refill scan
        // re-enters this socket's state machine indirectly (by spawning more connections), and
        // holding a lock across that would risk a lock-ordering cycle.
        if notify_initiating_io {
            if let Some(broker) = self.broker.lock().as_ref().and_then(Weak::upgrade) {
                broker.initiating_io();
            }
        }

        if let Some(this) = self.self_weak.upgrade() {
            this.schedule_current_state();
        }
    }
}
