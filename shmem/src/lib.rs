//! A bounded FIFO of short text messages shared by unrelated processes.
//!
//! The queue lives in a named shared memory segment (or, degraded, a plain
//! file) and is guarded by two named counting semaphores, a process-shared
//! lock and a readiness latch, all derived from one filesystem path.

pub mod core;
mod errors;
pub mod identity;
pub mod queue;
pub mod reader;
pub mod shutdown;
pub mod store;
pub mod sync;
pub mod writer;

#[cfg(test)]
mod tests;

pub use crate::core::{
    check_message, truncate_message, Backend, QueueConfig, Timeout, MAX_MESSAGE_LEN,
    SLOT_TEXT_SIZE,
};
pub use errors::QueueError;
pub use identity::QueueIdentity;
pub use queue::{Queue, QueueStatus};
pub use shutdown::ShutdownFlag;
pub use store::{BackingStore, FileStore, ShmemStore};
