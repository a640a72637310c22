use std::sync::{Arc, Weak};

use tokio::net::{TcpListener, TcpStream};
use tracing::{event, Level};

use crate::config::{BoxFuture, FunctorResult};
use crate::error::SocketError;
use crate::socket::{ConnectionSocket, SocketHandle};

/// Builds a `Settings::connect` functor that performs a single connect to the socket's
/// previously-set target address.
///
/// The "blocking" in the source's naming refers to the connect being a single synchronous-style
/// call rather than an overlapped one with its own completion callback; here that's just an
/// `.await` on the connect future, same as every other async call in the engine.
pub fn connect_fn(
) -> impl Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static {
    |weak| {
        Box::pin(async move {
            let Some(socket) = weak.upgrade() else {
                return Ok(());
            };
            let target = socket.target_address().ok_or(SocketError::NotSet)?;
            let stream = TcpStream::connect(target).await.map_err(SocketError::Io)?;
            let local = stream.local_addr().map_err(SocketError::Io)?;
            socket.set_local_address(local);
            socket.set_socket(SocketHandle::Tcp(stream)).await;
            event!(Level::TRACE, %target, "connected");
            Ok(())
        })
    }
}

/// Builds a `Settings::accept` functor that accepts one connection from `listener`.
///
/// `listener` is shared across every `SocketState` the broker spawns for a server
/// configuration; each accept step pulls the next pending connection off the same listener.
pub fn accept_fn(
    listener: Arc<TcpListener>,
) -> impl Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static {
    move |weak| {
        let listener = Arc::clone(&listener);
        Box::pin(async move {
            let Some(socket) = weak.upgrade() else {
                return Ok(());
            };
            let (stream, remote) = listener.accept().await.map_err(SocketError::Io)?;
            let local = stream.local_addr().map_err(SocketError::Io)?;
            socket.set_local_address(local);
            socket.set_target_address(remote);
            socket.set_socket(SocketHandle::Tcp(stream)).await;
            event!(Level::TRACE, %remote, "accepted");
            Ok(())
        })
    }
}
