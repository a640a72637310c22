//! A client the server has matched to a `SocketState`, and the backend that sends to it.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::drivers::{is_message_too_large, IoBackend};
use crate::error::SocketError;
use crate::socket::{ConnectionSocket, SocketHandle};

/// One client matched against a listening socket: which shared socket it arrived on, and its
/// remote address. Kept in the server's connected map purely so `remove` can find it again by
/// address; the actual send path lives in [`MediaStreamBackend`].
pub struct ConnectedSocket {
    pub listener: Arc<UdpSocket>,
    pub remote: SocketAddr,
}

impl ConnectedSocket {
    pub fn new(listener: Arc<UdpSocket>, remote: SocketAddr) -> Self {
        Self { listener, remote }
    }
}

/// The per-client send backend: every call targets `socket.target_address()` over the shared
/// listening socket installed as this connection's handle, rather than a dedicated per-client
/// socket. Receiving is not supported here — incoming datagrams are demultiplexed by remote
/// address at the listening socket itself, never read per-client.
pub struct MediaStreamBackend;

#[async_trait]
impl IoBackend for MediaStreamBackend {
    async fn send(&self, socket: &ConnectionSocket, data: &[u8]) -> Result<usize, SocketError> {
        let target = socket.target_address().ok_or(SocketError::NotSet)?;
        let guard = socket.lock().await;
        match &*guard {
            SocketHandle::Udp(listener) => listener.send_to(data, target).await.map_err(|e| {
                match e.raw_os_error() {
                    Some(code) if is_message_too_large(code) => SocketError::MessageTooLarge,
                    _ => SocketError::Io(e),
                }
            }),
            SocketHandle::Tcp(_) => panic!("MediaStreamBackend used on a stream socket"),
            SocketHandle::None => Err(SocketError::NotSet),
        }
    }

    async fn recv(&self, _socket: &ConnectionSocket, _max_len: usize) -> Result<Vec<u8>, SocketError> {
        // Demultiplexing happens in the listening socket's own recv loop; a per-client pattern
        // that asks this backend to recv directly is misconfigured.
        Err(SocketError::NotSet)
    }

    async fn shutdown(&self, socket: &ConnectionSocket, _force: bool) -> Result<(), SocketError> {
        // The handle is a shared Arc<UdpSocket>; dropping this connection's reference to it never
        // closes the listening socket other clients still use.
        socket.close_socket().await;
        Ok(())
    }
}
