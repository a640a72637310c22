use std::ops::{Deref, DerefMut};

use tokio::sync::MutexGuard;

use crate::socket::connection_socket::SocketHandle;

/// A scoped lock on a [`crate::socket::ConnectionSocket`]'s handle.
///
/// Obtained only through [`crate::socket::ConnectionSocket::lock`]; there is no way to reach the
/// underlying handle without holding this guard, mirroring the source's restriction that only
/// its own guard type may lock or unlock the socket's critical section.
///
/// Backed by `tokio::sync::Mutex` rather than a spinlock: drivers routinely hold this guard
/// across the `.await` of the actual send/recv call, which a non-async-aware lock can't do
/// safely on a multi-threaded runtime.
pub struct SocketGuard<'a> {
    inner: MutexGuard<'a, SocketHandle>,
}

impl<'a> SocketGuard<'a> {
    pub(super) fn new(inner: MutexGuard<'a, SocketHandle>) -> Self {
        Self { inner }
    }
}

impl Deref for SocketGuard<'_> {
    type Target = SocketHandle;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for SocketGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
