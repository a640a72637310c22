//! Logical worker queues the socket state machine and broker use to serialize their own
//! transitions without requiring a dedicated OS thread per connection.

mod flat_queue;
mod worker_queue;

pub use flat_queue::FlatQueue;
pub use worker_queue::{JobOutcome, SerialQueue};
