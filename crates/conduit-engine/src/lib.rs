//! A quota-governed, async connection-lifecycle engine for driving high volumes of TCP and UDP
//! traffic against configurable targets.
//!
//! The four tightly coupled subsystems are, leaves-first:
//!
//! - [`executor`] — the logical worker queues ([`executor::SerialQueue`], [`executor::FlatQueue`])
//!   every other module serializes its own transitions on.
//! - [`socket`] — [`socket::ConnectionSocket`], the per-connection handle/lock/I/O-counter/timer
//!   container.
//! - [`state`] — [`state::SocketState`], the per-connection Create → Connect/Accept → InitiateIO →
//!   Close lifecycle.
//! - [`broker`] — [`broker::Broker`], the quota and throttle controller that spawns socket states
//!   and tracks global completion.
//! - [`drivers`] — the interchangeable I/O pumps ([`drivers::StreamBackend`],
//!   [`drivers::DatagramBackend`], [`drivers::RegisteredIoBackend`], blocking connect/accept,
//!   the paced UDP sender) that drive an external [`io::IoPattern`].
//! - [`mediastream`] — [`mediastream::MediaStreamServer`], the UDP demultiplexer binding inbound
//!   client handshakes to accepted connection slots.
//!
//! [`io::IoPattern`] itself — the application protocol that decides what to send/recv next and
//! validates what comes back — is an external collaborator this crate drives but never
//! implements; embedders supply one through [`config::Settings`].

pub mod broker;
pub mod config;
pub mod drivers;
pub mod error;
pub mod executor;
#[cfg(any(test, feature = "fakes"))]
pub mod fakes;
pub mod io;
pub mod mediastream;
pub mod socket;
pub mod state;
pub mod stats;

#[cfg(test)]
mod integration_tests;

pub use broker::{Broker, BrokerQuota};
pub use config::{Options, Settings, SettingsBuilder, UNLIMITED};
pub use drivers::{accept_fn, connect_fn, io_fn, paced_send_io_fn, DatagramBackend, IoBackend, StreamBackend};
#[cfg(feature = "registered-io")]
pub use drivers::RegisteredIoBackend;
pub use error::{ConfigError, EngineError, MediaStreamError, SocketError};
pub use executor::{FlatQueue, JobOutcome, SerialQueue};
pub use io::{Action, BufferKind, CompletionVerdict, IoPattern, NoopGuard, Task, TaskBuffer};
pub use mediastream::{ControlAction, DataFrameHeader, MediaStreamBackend, MediaStreamServer, MIN_FRAME_SIZE};
pub use socket::{ConnectionSocket, SocketGuard, SocketHandle, StateNotifier};
pub use state::{BrokerNotifier, InternalState, SocketState};
pub use stats::{ConnectionStatusDetails, HistoricConnectionDetails, Stats};
