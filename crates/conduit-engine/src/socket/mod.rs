//! The per-connection socket container: a guarded handle, I/O counter, and attached pattern.

mod connection_socket;
mod guard;

pub use connection_socket::{ConnectionSocket, SocketHandle, StateNotifier};
pub use guard::SocketGuard;
