use async_trait::async_trait;

use crate::drivers::IoBackend;
use crate::error::SocketError;
use crate::socket::{ConnectionSocket, SocketHandle};

/// The message-oriented backend: a UDP socket driven with one buffer per call.
///
/// Assumes the socket was connected to its peer with `UdpSocket::connect` (standard for this
/// engine's client-side UDP connections — the media-stream server's demultiplexed sockets use
/// their own send/recv path instead, since one OS socket serves many peers there).
pub struct DatagramBackend;

#[async_trait]
impl IoBackend for DatagramBackend {
    async fn send(&self, socket: &ConnectionSocket, data: &[u8]) -> Result<usize, SocketError> {
        let guard = socket.lock().await;
        match &*guard {
            SocketHandle::Udp(udp) => {
                let sent = udp.send(data).await.map_err(|e| match e.raw_os_error() {
                    Some(code) if is_message_too_large(code) => SocketError::MessageTooLarge,
                    _ => SocketError::Io(e),
                })?;
                Ok(sent)
            }
            SocketHandle::Tcp(_) => panic!("DatagramBackend used on a stream socket"),
            SocketHandle::None => Err(SocketError::NotSet),
        }
    }

    async fn recv(&self, socket: &ConnectionSocket, max_len: usize) -> Result<Vec<u8>, SocketError> {
        let guard = socket.lock().await;
        match &*guard {
            SocketHandle::Udp(udp) => {
                let mut buf = vec![0u8; max_len];
                let n = udp.recv(&mut buf).await.map_err(SocketError::Io)?;
                buf.truncate(n);
                Ok(buf)
            }
            SocketHandle::Tcp(_) => panic!("DatagramBackend used on a stream socket"),
            SocketHandle::None => Err(SocketError::NotSet),
        }
    }

    async fn shutdown(&self, socket: &ConnectionSocket, _force: bool) -> Result<(), SocketError> {
        // UDP has no half-close; dropping the handle (via close_socket) is the only shutdown.
        socket.close_socket().await;
        Ok(())
    }
}

/// Best-effort cross-platform check for `EMSGSIZE`/`WSAEMSGSIZE`.
pub(crate) fn is_message_too_large(code: i32) -> bool {
    #[cfg(unix)]
    {
        code == libc_emsgsize()
    }
    #[cfg(windows)]
    {
        code == 10040 // WSAEMSGSIZE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = code;
        false
    }
}

#[cfg(unix)]
fn libc_emsgsize() -> i32 {
    // EMSGSIZE is 90 on Linux and 40 on most BSD-derived platforms (notably macOS); only Linux
    // is a supported target for this crate's CI today.
    90
}
