//! Aggregate connection statistics.
//!
//! Mirrors the split the source makes between `ConnectionStatusDetails` (live gauges an
//! external status printer polls on an interval) and `HistoricConnectionDetails` (monotonic
//! totals used for the final summary and exit code). Printing either is external to this
//! crate; `Stats` only maintains the counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Live gauges, valid at any instant while the broker is running.
#[derive(Default)]
pub struct ConnectionStatusDetails {
    pub pending_connections: AtomicI64,
    pub active_connections: AtomicI64,
    pub successful_completions: AtomicU64,
    pub connection_errors: AtomicU64,
    pub protocol_errors: AtomicU64,
}

/// Monotonic totals accumulated over the lifetime of the process.
#[derive(Default)]
pub struct HistoricConnectionDetails {
    pub successful_connections: AtomicU64,
    pub connection_errors: AtomicU64,
    pub protocol_errors: AtomicU64,
}

/// The counters the broker and socket state machine update as connections progress.
#[derive(Default)]
pub struct Stats {
    pub status: ConnectionStatusDetails,
    pub historic: HistoricConnectionDetails,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_active(&self) {
        self.status.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.status.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.status
            .successful_completions
            .fetch_add(1, Ordering::Relaxed);
        self.historic
            .successful_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_error(&self, was_active: bool) {
        if was_active {
            self.status.active_connections.fetch_sub(1, Ordering::Relaxed);
        }
        self.status.connection_errors.fetch_add(1, Ordering::Relaxed);
        self.historic.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self, was_active: bool) {
        if was_active {
            self.status.active_connections.fetch_sub(1, Ordering::Relaxed);
        }
        self.status.protocol_errors.fetch_add(1, Ordering::Relaxed);
        self.historic.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// The value an external `main` would return from the process, saturated to a positive
    /// 31-bit integer the way the source saturates its exit code.
    pub fn exit_code(&self) -> i32 {
        let total = self.historic.connection_errors.load(Ordering::Relaxed)
            + self.historic.protocol_errors.load(Ordering::Relaxed);
        total.min(i32::MAX as u64) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_sums_errors_and_saturates() {
        let stats = Stats::new();
        stats.historic.connection_errors.store(5, Ordering::Relaxed);
        stats.historic.protocol_errors.store(3, Ordering::Relaxed);
        assert_eq!(stats.exit_code(), 8);

        stats
            .historic
            .connection_errors
            .store(u64::MAX, Ordering::Relaxed);
        assert_eq!(stats.exit_code(), i32::MAX);
    }

    #[test]
    fn record_success_moves_active_to_successful() {
        let stats = Stats::new();
        stats.record_active();
        stats.record_success();
        assert_eq!(stats.status.active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(
            stats.status.successful_completions.load(Ordering::Relaxed),
            1
        );
    }
}
