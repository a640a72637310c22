//! The per-connection lifecycle state machine.

mod socket_state;

pub use socket_state::{BrokerNotifier, InternalState, SocketState};
