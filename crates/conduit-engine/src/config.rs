//! The engine's typed configuration model.
//!
//! `Settings` is a plain data/builder type: it is the engine's view of the knobs described in
//! the external interfaces, not a CLI or config-file loader. An embedding application is
//! expected to construct one of these programmatically (typically from its own argv/TOML
//! parsing, which is outside this crate).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use bitflags::bitflags;

use crate::error::ConfigError;
use crate::io::IoPattern;
use crate::socket::ConnectionSocket;

/// A sentinel meaning "no limit" for `iterations` and `server_exit_limit`, matching the
/// source's use of `MAXULONGLONG` for an unbounded run.
pub const UNLIMITED: u64 = u64::MAX;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome type returned by the user-supplied functors.
pub type FunctorResult = Result<(), crate::error::SocketError>;

pub type CreateFn = Arc<dyn Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync>;
pub type ConnectFn = Arc<dyn Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync>;
pub type AcceptFn = Arc<dyn Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync>;
pub type IoFn = Arc<dyn Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync>;
pub type ClosingFn = Arc<dyn Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync>;

/// Builds the per-connection [`IoPattern`]; invoked by `SocketState` on entry to `InitiatingIo`.
pub type PatternFactory = Arc<dyn Fn() -> Result<Arc<dyn IoPattern>, crate::error::SocketError> + Send + Sync>;

bitflags! {
    /// The `options` bitset carried globally in `Settings`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Options: u32 {
        /// Prefer the loopback fast path when both endpoints are local.
        const LOOPBACK_FAST_PATH = 1 << 0;
        /// Enable TCP keep-alive probes on stream sockets.
        const KEEP_ALIVE = 1 << 1;
        /// Put the socket in non-blocking mode explicitly (the async runtime already implies
        /// this, but some embedders set the option on the raw handle for inspection tools).
        const NON_BLOCKING = 1 << 2;
        /// Handle synchronous ("inline") I/O completions directly on the calling task instead
        /// of going through a scheduler round-trip.
        const INLINE_COMPLETIONS = 1 << 3;
        /// Allow multiple outgoing connections to share a local port (`SO_REUSE_UNICASTPORT`
        /// equivalent).
        const REUSE_UNICAST_PORT = 1 << 4;
        /// Apply `pre_post_recvs`/`pre_post_sends`-driven buffer size overrides.
        const OVERRIDE_BUFFER_SIZES = 1 << 5;
        /// Use a circular (ring) queueing discipline for pre-posted operations instead of a
        /// strict FIFO refill.
        const CIRCULAR_QUEUEING = 1 << 6;
        /// Require full-buffer reads (`MSG_WAITALL` equivalent) on stream sockets.
        const WAIT_ALL = 1 << 7;
        /// Enable port-scalability mode (ephemeral port reuse across many short connections).
        const PORT_SCALABILITY = 1 << 8;
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::empty()
    }
}

/// Engine-wide configuration, analogous to the source's global `Settings` object.
///
/// Construct with [`SettingsBuilder`]; `Settings` itself is immutable and cheaply `Clone`-able
/// (all functors are `Arc`-wrapped) so it can be shared across every `SocketState` the broker
/// spawns.
#[derive(Clone)]
pub struct Settings {
    pub iterations: u64,
    pub connection_limit: u32,
    pub connection_throttle_limit: u32,
    pub accept_limit: u32,
    pub server_exit_limit: u64,
    pub options: Options,
    pub tcp_bytes_per_second: Option<u64>,
    pub tcp_bytes_per_second_period_ms: u64,
    pub pre_post_recvs: u32,
    pub pre_post_sends: u32,
    pub listen_backlog: u32,
    pub local_port_low: Option<u16>,
    pub local_port_high: Option<u16>,
    pub outgoing_if_index: Option<u32>,
    pub should_verify_buffers: bool,

    pub(crate) create: CreateFn,
    pub(crate) connect: Option<ConnectFn>,
    pub(crate) accept: Option<AcceptFn>,
    pub(crate) io: IoFn,
    pub(crate) closing: Option<ClosingFn>,
    pub(crate) pattern_factory: PatternFactory,
}

impl Settings {
    /// `true` when this is a server configuration (an `accept` functor was provided).
    pub fn is_server(&self) -> bool {
        self.accept.is_some()
    }

    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }
}

/// Fluent builder for [`Settings`], in the same style as the teacher's `TcpServerBuilder`.
pub struct SettingsBuilder {
    iterations: u64,
    connection_limit: u32,
    connection_throttle_limit: u32,
    accept_limit: u32,
    server_exit_limit: u64,
    options: Options,
    tcp_bytes_per_second: Option<u64>,
    tcp_bytes_per_second_period_ms: u64,
    pre_post_recvs: u32,
    pre_post_sends: u32,
    listen_backlog: u32,
    local_port_low: Option<u16>,
    local_port_high: Option<u16>,
    outgoing_if_index: Option<u32>,
    should_verify_buffers: bool,

    create: Option<CreateFn>,
    connect: Option<ConnectFn>,
    accept: Option<AcceptFn>,
    io: Option<IoFn>,
    closing: Option<ClosingFn>,
    pattern_factory: Option<PatternFactory>,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self {
            iterations: 1,
            connection_limit: 1,
            connection_throttle_limit: u32::MAX,
            accept_limit: 1,
            server_exit_limit: UNLIMITED,
            options: Options::empty(),
            tcp_bytes_per_second: None,
            tcp_bytes_per_second_period_ms: 100,
            pre_post_recvs: 1,
            pre_post_sends: 1,
            listen_backlog: 128,
            local_port_low: None,
            local_port_high: None,
            outgoing_if_index: None,
            should_verify_buffers: false,
            create: None,
            connect: None,
            accept: None,
            io: None,
            closing: None,
            pattern_factory: None,
        }
    }
}

impl SettingsBuilder {
    pub fn iterations(mut self, value: u64) -> Self {
        self.iterations = value;
        self
    }

    pub fn connection_limit(mut self, value: u32) -> Self {
        self.connection_limit = value;
        self
    }

    pub fn connection_throttle_limit(mut self, value: u32) -> Self {
        self.connection_throttle_limit = value;
        self
    }

    pub fn accept_limit(mut self, value: u32) -> Self {
        self.accept_limit = value;
        self
    }

    pub fn server_exit_limit(mut self, value: u64) -> Self {
        self.server_exit_limit = value;
        self
    }

    pub fn options(mut self, value: Options) -> Self {
        self.options = value;
        self
    }

    pub fn tcp_bytes_per_second(mut self, value: u64) -> Self {
        self.tcp_bytes_per_second = Some(value);
        self
    }

    pub fn tcp_bytes_per_second_period_ms(mut self, value: u64) -> Self {
        self.tcp_bytes_per_second_period_ms = value;
        self
    }

    pub fn pre_post_recvs(mut self, value: u32) -> Self {
        self.pre_post_recvs = value;
        self
    }

    pub fn pre_post_sends(mut self, value: u32) -> Self {
        self.pre_post_sends = value;
        self
    }

    pub fn listen_backlog(mut self, value: u32) -> Self {
        self.listen_backlog = value;
        self
    }

    pub fn local_port_range(mut self, low: u16, high: u16) -> Self {
        self.local_port_low = Some(low);
        self.local_port_high = Some(high);
        self
    }

    pub fn outgoing_if_index(mut self, value: u32) -> Self {
        self.outgoing_if_index = Some(value);
        self
    }

    pub fn should_verify_buffers(mut self, value: bool) -> Self {
        self.should_verify_buffers = value;
        self
    }

    pub fn create<F>(mut self, f: F) -> Self
    where
        F: Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static,
    {
        self.create = Some(Arc::new(f));
        self
    }

    pub fn connect<F>(mut self, f: F) -> Self
    where
        F: Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static,
    {
        self.connect = Some(Arc::new(f));
        self
    }

    pub fn accept<F>(mut self, f: F) -> Self
    where
        F: Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static,
    {
        self.accept = Some(Arc::new(f));
        self
    }

    pub fn io<F>(mut self, f: F) -> Self
    where
        F: Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static,
    {
        self.io = Some(Arc::new(f));
        self
    }

    pub fn closing<F>(mut self, f: F) -> Self
    where
        F: Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static,
    {
        self.closing = Some(Arc::new(f));
        self
    }

    pub fn pattern_factory<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn IoPattern>, crate::error::SocketError> + Send + Sync + 'static,
    {
        self.pattern_factory = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Settings, ConfigError> {
        if self.connect.is_some() == self.accept.is_some() {
            return Err(ConfigError::ModeAmbiguous);
        }
        let create = self.create.ok_or(ConfigError::MissingCreate)?;
        let io = self.io.ok_or(ConfigError::MissingIo)?;
        if self.connection_limit == 0 {
            return Err(ConfigError::ZeroConnectionLimit);
        }
        if self.accept.is_some() && self.accept_limit == 0 {
            return Err(ConfigError::ZeroAcceptLimit);
        }

        Ok(Settings {
            iterations: self.iterations,
            connection_limit: self.connection_limit,
            connection_throttle_limit: self.connection_throttle_limit,
            accept_limit: self.accept_limit,
            server_exit_limit: self.server_exit_limit,
            options: self.options,
            tcp_bytes_per_second: self.tcp_bytes_per_second,
            tcp_bytes_per_second_period_ms: self.tcp_bytes_per_second_period_ms,
            pre_post_recvs: self.pre_post_recvs,
            pre_post_sends: self.pre_post_sends,
            listen_backlog: self.listen_backlog,
            local_port_low: self.local_port_low,
            local_port_high: self.local_port_high,
            outgoing_if_index: self.outgoing_if_index,
            should_verify_buffers: self.should_verify_buffers,
            create,
            connect: self.connect,
            accept: self.accept,
            io,
            closing: self.closing,
            pattern_factory: self.pattern_factory.unwrap_or_else(|| {
                Arc::new(|| {
                    Err(crate::error::SocketError::NotSet)
                })
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_fn() -> impl Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + Clone + 'static
    {
        |_weak| Box::pin(async { Ok(()) })
    }

    #[test]
    fn rejects_both_connect_and_accept() {
        let err = Settings::builder()
            .create(noop_fn())
            .io(noop_fn())
            .connect(noop_fn())
            .accept(noop_fn())
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ModeAmbiguous);
    }

    #[test]
    fn rejects_neither_connect_nor_accept() {
        let err = Settings::builder()
            .create(noop_fn())
            .io(noop_fn())
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ModeAmbiguous);
    }

    #[test]
    fn builds_a_valid_client_config() {
        let settings = Settings::builder()
            .create(noop_fn())
            .connect(noop_fn())
            .io(noop_fn())
            .connection_limit(4)
            .build()
            .expect("valid client config should build");
        assert!(!settings.is_server());
        assert_eq!(settings.connection_limit, 4);
    }

    #[test]
    fn builds_a_valid_server_config() {
        let settings = Settings::builder()
            .create(noop_fn())
            .accept(noop_fn())
            .io(noop_fn())
            .accept_limit(10)
            .build()
            .expect("valid server config should build");
        assert!(settings.is_server());
    }
}
