use super::core::*;
use super::queue::{locked_header, Queue};
use super::store::BackingStore;
use super::QueueError;

impl<S: BackingStore> Queue<S> {
    /// Appends `message` at the tail.
    ///
    /// Blocks up to `timeout` for a free slot and again for the lock. On
    /// `WouldBlock` or `LockTimeout` nothing in the queue has changed.
    pub fn write(&self, message: &str, timeout: Timeout) -> Result<(), QueueError> {
        check_message(message)?;
        let inner = self.inner()?;

        if !inner.sync.empty.wait(timeout)? {
            tracing::debug!(identity = %self.identity(), "write found the queue full");
            return Err(QueueError::WouldBlock);
        }

        match inner.with_lock(timeout, |store| put(store, message)) {
            None => {
                inner.sync.empty.post()?;
                tracing::warn!(identity = %self.identity(), "write timed out on the queue lock");
                Err(QueueError::LockTimeout)
            }
            Some(Ok(index)) => {
                // Only after the slot and header are published.
                inner.sync.full.post()?;
                tracing::debug!(identity = %self.identity(), slot = index, "message written");
                Ok(())
            }
            Some(Err(QueueError::ConsistencyViolation(reason))) => {
                inner.sync.empty.post()?;
                Err(self.violation(reason))
            }
            Some(Err(e)) => {
                inner.sync.empty.post()?;
                Err(e)
            }
        }
    }
}

/// Stores `message` at the tail. Caller holds the lock and an empty permit.
fn put<S: BackingStore>(store: &S, message: &str) -> Result<usize, QueueError> {
    let mut header = locked_header(store)?;
    if header.count >= header.capacity {
        return Err(QueueError::ConsistencyViolation(format!(
            "count {} at capacity {} although a free slot was reserved",
            header.count, header.capacity
        )));
    }
    let tail = header.tail as usize;
    if store.slot(tail)?.is_occupied() {
        return Err(QueueError::ConsistencyViolation(format!(
            "slot {} at tail is still occupied (count {})",
            tail, header.count
        )));
    }

    store.store_slot(tail, &Slot::with_text(message))?;
    header.tail = header.next_index(header.tail);
    header.count += 1;
    // The header is the commit point. Undo the slot so the two still agree.
    if let Err(e) = store.store_header(&header) {
        if let Err(undo) = store.store_slot(tail, &Slot::EMPTY) {
            tracing::error!(slot = tail, error = %undo, "could not clear slot after failed header update");
        }
        return Err(e);
    }
    Ok(tail)
}
