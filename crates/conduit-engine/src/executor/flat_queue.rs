use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// A refill-style work queue with at most one pending run: a run already queued but not yet
/// started absorbs any further submissions rather than queueing a second one.
///
/// This is the collapsing behavior the broker's refill scan needs — every `InitiatingIo` or
/// `Closing` transition wants to trigger a rescan of the socket pool, but a storm of those
/// transitions should still only cause one rescan per already-pending request, since the scan
/// itself re-reads the broker's current counters rather than capturing them at submit time.
pub struct FlatQueue {
    sender: mpsc::Sender<()>,
    cancelled: Arc<AtomicBool>,
}

impl FlatQueue {
    /// Spawns the worker that will run `job` once per collapsed batch of submissions.
    pub fn new<F, Fut>(job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<()>(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_worker = Arc::clone(&cancelled);
        tokio::spawn(async move {
            while receiver.recv().await.is_some() {
                if cancelled_worker.load(Ordering::Acquire) {
                    break;
                }
                job().await;
            }
        });
        Self { sender, cancelled }
    }

    /// Requests a run. Collapses onto an already-queued request if one hasn't started yet.
    pub fn submit(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        // `try_send` on a capacity-1 channel is exactly the collapse we want: a full buffer
        // means a request is already waiting to run, so this one is redundant.
        let _ = self.sender.try_send(());
    }

    /// Stops the worker from running again. A run already in progress finishes normally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn collapses_bursts_into_one_run() {
        let runs = Arc::new(AtomicU32::new(0));
        let runs_job = Arc::clone(&runs);
        let queue = FlatQueue::new(move || {
            let runs_job = Arc::clone(&runs_job);
            async move {
                runs_job.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
            }
        });

        for _ in 0..10 {
            queue.submit();
        }
        sleep(Duration::from_millis(60)).await;

        // At most two runs: the first one started immediately, and possibly one more picking up
        // the burst of submissions that landed while it was executing.
        assert!(runs.load(Ordering::SeqCst) <= 2);
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn cancel_stops_future_runs() {
        let runs = Arc::new(AtomicU32::new(0));
        let runs_job = Arc::clone(&runs);
        let queue = FlatQueue::new(move || {
            let runs_job = Arc::clone(&runs_job);
            async move {
                runs_job.fetch_add(1, Ordering::SeqCst);
            }
        });

        queue.submit();
        sleep(Duration::from_millis(10)).await;
        queue.cancel();
        queue.submit();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
