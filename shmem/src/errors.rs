use std::io;

use thiserror::Error;

use crate::sync::semaphore::SemaphoreError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid queue identity {path}: {reason}")]
    InvalidIdentity { path: String, reason: String },

    #[error("Invalid queue capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Failed to create store {name}: {reason}")]
    StoreCreationFailed { name: String, reason: String },

    #[error("Store not found: {name}")]
    StoreNotFound { name: String },

    #[error("Failed to create synchronization primitive {name}: {reason}")]
    SyncCreationFailed { name: String, reason: String },

    #[error("Synchronization primitive not found: {name}")]
    SyncNotFound { name: String },

    #[error("Synchronization primitive {name} failed: {reason}")]
    SyncFailed { name: String, reason: String },

    #[error("Message is {length} bytes, at most {max} fit in a slot")]
    MessageTooLong { length: usize, max: usize },

    #[error("Message contains a NUL byte")]
    InvalidMessage,

    #[error("Queue is full")]
    WouldBlock,

    #[error("Timed out acquiring the queue lock")]
    LockTimeout,

    #[error("Queue consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Queue is closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Semaphore error: {0}")]
    Semaphore(#[from] SemaphoreError),
}

impl QueueError {
    /// Timing conditions a caller is expected to retry or back off from.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QueueError::WouldBlock | QueueError::LockTimeout)
    }
}
