//! The paced datagram driver used for UDP media-stream traffic: sends are scheduled at the
//! pattern's requested offset rather than issued back-to-back, and frames too large for one
//! datagram are sliced into sequenced fragments.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{event, Level};

use super::{finish_step, IoBackend};
use crate::config::{BoxFuture, FunctorResult};
use crate::error::SocketError;
use crate::io::{Action, Task};
use crate::mediastream::wire::DataFrameHeader;
use crate::socket::ConnectionSocket;

/// Sends below this delay run inline rather than going through `tokio::time::sleep`, since the
/// scheduling overhead of a timer for a sub-2ms gap would dwarf the gap itself.
const INLINE_DELAY_THRESHOLD_MS: u64 = 2;

/// Builds a `Settings::io` functor that paces `Send` tasks by `task.time_offset_ms` and
/// fragments any payload larger than `fragment_size` into sequence-numbered slices, one
/// datagram per slice.
pub fn paced_send_io_fn(
    backend: Arc<dyn IoBackend>,
    fragment_size: usize,
) -> impl Fn(Weak<ConnectionSocket>) -> BoxFuture<'static, FunctorResult> + Send + Sync + 'static {
    move |weak| {
        let backend = Arc::clone(&backend);
        Box::pin(run_paced_loop(weak, backend, fragment_size))
    }
}

async fn run_paced_loop(
    socket: Weak<ConnectionSocket>,
    backend: Arc<dyn IoBackend>,
    fragment_size: usize,
) -> FunctorResult {
    loop {
        let Some(socket) = socket.upgrade() else {
            return Ok(());
        };
        let pattern = socket
            .io_pattern()
            .expect("pattern must be set before the io functor runs");

        let task = pattern.initiate_io();
        match task.action {
            Action::None => return Ok(()),

            Action::GracefulShutdown | Action::HardShutdown | Action::Abort | Action::FatalAbort => {
                let force = task.action != Action::GracefulShutdown;
                let result = backend.shutdown(&socket, force).await;
                match finish_step(&*pattern, &task, 0, result)? {
                    Some(outcome) => return outcome,
                    None => continue,
                }
            }

            Action::Recv => {
                if task.track_io {
                    socket.increment_io();
                }
                let received = backend.recv(&socket, task.buffer_length).await;
                let (transferred, result) = match received {
                    Ok(data) => {
                        task.buffer.recv_into(task.buffer_offset, &data);
                        (data.len(), Ok(data.len()))
                    }
                    Err(e) => (0, Err(e)),
                };
                let outcome = finish_step(&*pattern, &task, transferred, result);
                if task.track_io {
                    socket.decrement_io();
                }
                match outcome? {
                    Some(result) => return result,
                    None => continue,
                }
            }

            Action::Send => {
                if task.time_offset_ms >= INLINE_DELAY_THRESHOLD_MS {
                    tokio::time::sleep(Duration::from_millis(task.time_offset_ms)).await;
                }

                if task.track_io {
                    socket.increment_io();
                }
                let bytes = task.buffer.send_slice(task.buffer_offset, task.buffer_length);
                let result = send_paced(&backend, &socket, &task, &bytes, fragment_size).await;
                let transferred = result.as_ref().copied().unwrap_or(0);
                let outcome = finish_step(&*pattern, &task, transferred, result);
                if task.track_io {
                    socket.decrement_io();
                }
                match outcome? {
                    Some(result) => return result,
                    None => continue,
                }
            }
        }
    }
}

/// Sends `payload` as a single datagram if it fits in `fragment_size`, otherwise slices it into
/// sequenced fragments and sends one datagram per slice.
async fn send_paced(
    backend: &Arc<dyn IoBackend>,
    socket: &ConnectionSocket,
    task: &Task,
    payload: &[u8],
    fragment_size: usize,
) -> Result<usize, SocketError> {
    if payload.len() <= fragment_size {
        return backend.send(socket, payload).await;
    }

    let fragment_count = payload.len().div_ceil(fragment_size) as u32;
    let mut total_sent = 0;
    for (index, chunk) in payload.chunks(fragment_size).enumerate() {
        let header = DataFrameHeader {
            sequence_number: task.expected_pattern_offset,
            fragment_index: index as u32,
            fragment_count,
        };
        let framed = header.encode(chunk).map_err(|_| SocketError::MessageTooLarge)?;
        event!(
            Level::TRACE,
            fragment_index = index,
            fragment_count,
            "sending paced fragment"
        );
        total_sent += backend.send(socket, &framed).await?;
    }
    Ok(total_sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DatagramBackend;

    #[test]
    fn fragment_size_zero_would_never_be_configured() {
        // Sanity check only: div_ceil panics on a zero divisor, so callers must never pass 0.
        let backend: Arc<dyn IoBackend> = Arc::new(DatagramBackend);
        let _ = backend;
        assert!(INLINE_DELAY_THRESHOLD_MS > 0);
    }
}
