//! The I/O task/pattern vocabulary shared between drivers and the external protocol module.

mod pattern;
mod task;

pub use pattern::{CompletionVerdict, IoPattern, NoopGuard};
pub use task::{Action, BufferKind, Task, TaskBuffer};
