use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::drivers::IoBackend;
use crate::error::SocketError;
use crate::socket::{ConnectionSocket, SocketHandle};

/// The stream-oriented backend: a TCP socket driven through `AsyncRead`/`AsyncWrite`.
///
/// Corresponds to the source's overlapped read/write driver, minus the explicit overlapped
/// bookkeeping — `tokio::net::TcpStream` already gives us a single in-flight read and a single
/// in-flight write multiplexed onto the runtime's reactor.
pub struct StreamBackend;

#[async_trait]
impl IoBackend for StreamBackend {
    async fn send(&self, socket: &ConnectionSocket, data: &[u8]) -> Result<usize, SocketError> {
        let mut guard = socket.lock().await;
        match &mut *guard {
            SocketHandle::Tcp(stream) => {
                stream.write_all(data).await.map_err(SocketError::Io)?;
                Ok(data.len())
            }
            SocketHandle::Udp(_) => panic!("StreamBackend used on a datagram socket"),
            SocketHandle::None => Err(SocketError::NotSet),
        }
    }

    async fn recv(&self, socket: &ConnectionSocket, max_len: usize) -> Result<Vec<u8>, SocketError> {
        let mut guard = socket.lock().await;
        match &mut *guard {
            SocketHandle::Tcp(stream) => {
                let mut buf = vec![0u8; max_len];
                let n = stream.read(&mut buf).await.map_err(SocketError::Io)?;
                if n == 0 {
                    return Err(SocketError::Reset);
                }
                buf.truncate(n);
                Ok(buf)
            }
            SocketHandle::Udp(_) => panic!("StreamBackend used on a datagram socket"),
            SocketHandle::None => Err(SocketError::NotSet),
        }
    }

    async fn shutdown(&self, socket: &ConnectionSocket, force: bool) -> Result<(), SocketError> {
        let mut guard = socket.lock().await;
        match &mut *guard {
            SocketHandle::Tcp(stream) => {
                if force {
                    stream.set_linger(Some(std::time::Duration::from_secs(0))).ok();
                }
                stream.shutdown().await.map_err(SocketError::Io)
            }
            SocketHandle::Udp(_) => panic!("StreamBackend used on a datagram socket"),
            SocketHandle::None => Ok(()),
        }
    }
}
