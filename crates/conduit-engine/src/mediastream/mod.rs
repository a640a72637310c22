//! The UDP media-stream server: demultiplexes one bound socket per listen address across many
//! logical client connections, matching each client's handshake to a waiting `SocketState`.

mod connected_socket;
mod listening_socket;
mod server;
pub(crate) mod wire;

pub use connected_socket::MediaStreamBackend;
pub use server::MediaStreamServer;
pub use wire::{ControlAction, DataFrameHeader, MIN_FRAME_SIZE};
