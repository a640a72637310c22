//! A single bound UDP socket dedicated to receiving client handshakes on one listen address.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{event, Level};

use crate::error::MediaStreamError;
use crate::mediastream::server::MediaStreamServer;
use crate::mediastream::wire::ControlAction;

/// Datagrams shorter than this can't even carry the one-byte action code.
const MIN_CONTROL_DATAGRAM: usize = 1;
const RECV_BUFFER_SIZE: usize = 512;

pub struct ListeningSocket {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl ListeningSocket {
    pub async fn bind(addr: SocketAddr) -> Result<Self, MediaStreamError> {
        let socket = UdpSocket::bind(addr).await.map_err(MediaStreamError::Io)?;
        let local_addr = socket.local_addr().map_err(MediaStreamError::Io)?;
        event!(Level::DEBUG, %local_addr, "media-stream server receiving datagrams");
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    /// Spawns this listener's recv loop on the runtime. The loop runs until the socket errors or
    /// an unknown control action arrives (fatal to this one listener, not the whole server).
    pub fn spawn_recv_loop(&self, server: Arc<MediaStreamServer>) {
        let socket = Arc::clone(&self.socket);
        let local_addr = self.local_addr;
        tokio::spawn(recv_loop(server, socket, local_addr));
    }
}

async fn recv_loop(server: Arc<MediaStreamServer>, socket: Arc<UdpSocket>, local_addr: SocketAddr) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let (len, remote) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                event!(Level::ERROR, %local_addr, error = %e, "media-stream listening socket recv failed");
                return;
            }
        };
        if len < MIN_CONTROL_DATAGRAM {
            continue;
        }
        match ControlAction::decode(buf[0]) {
            Ok(ControlAction::Start) => {
                server
                    .handle_start(Arc::clone(&socket), local_addr, remote)
                    .await;
            }
            Err(e) => {
                event!(
                    Level::ERROR,
                    %remote,
                    error = %e,
                    "media-stream listener received an unrecognized control action; stopping this listener"
                );
                return;
            }
        }
    }
}
