use std::net::SocketAddr;

use crate::error::SocketError;
use crate::io::task::Task;

/// The pattern's reply to a completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionVerdict {
    /// The pattern wants another task initiated.
    ContinueIo,
    /// The pattern has nothing more to do; the connection can proceed to close cleanly.
    CompletedIo,
    /// The pattern treats this as a failure; the caller should surface its sticky error.
    FailedIo,
}

/// The application-protocol boundary the engine drives but never implements itself.
///
/// An `IoPattern` is the external collaborator described in the specification's §6: it decides
/// what bytes to send/recv next and validates what comes back. The engine's drivers only know
/// how to pump whatever [`Task`]s this trait hands them; they have no opinion on the wire
/// format of the application protocol itself.
///
/// Implementors are responsible for their own interior synchronization — `initiate_io` and
/// `complete_io` may be called concurrently with each other from different driver tasks (e.g.
/// one task processing a send completion while another initiates the next recv), and an
/// implementation that needs to serialize "produce next task" with "observe a completion" must
/// do so itself. [`IoPattern::acquire_pattern_lock`] exists for drivers that want to hold such a
/// lock across a task's full initiate→complete round trip.
pub trait IoPattern: Send + Sync {
    /// Returns the next task to perform, or a `Action::None` task if the pattern has nothing to
    /// do right now (e.g. waiting on a future send to complete before issuing the next).
    fn initiate_io(&self) -> Task;

    /// Reports that `task` finished with `bytes_transferred` bytes moved and an optional error.
    fn complete_io(
        &self,
        task: &Task,
        bytes_transferred: usize,
        error: Option<&SocketError>,
    ) -> CompletionVerdict;

    /// Called once, at connection close, so the pattern can report what it observed.
    fn print_statistics(&self, local: SocketAddr, remote: SocketAddr);

    /// A scoped lock a driver may hold across an initiate→complete round trip when it needs to
    /// serialize task production with completion handling. Patterns that don't need this may
    /// return a no-op guard.
    fn acquire_pattern_lock(&self) -> Box<dyn Drop + '_>;

    /// Maximum number of I/O operations this pattern expects to have outstanding at once; used
    /// to size the registered-IO driver's per-socket task pool.
    fn rio_buffer_id_count(&self) -> usize {
        1
    }

    /// The first non-zero error this pattern has observed, if any (sticky: never overwritten
    /// once set).
    fn last_pattern_error(&self) -> Option<SocketError> {
        None
    }
}

/// Trivial no-op guard for patterns that have no internal lock to hold.
pub struct NoopGuard;
impl Drop for NoopGuard {
    fn drop(&mut self) {}
}
