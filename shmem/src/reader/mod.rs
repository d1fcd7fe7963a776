use super::core::*;
use super::queue::{locked_header, Queue};
use super::store::BackingStore;
use super::QueueError;

impl<S: BackingStore> Queue<S> {
    /// Takes the message at the head.
    ///
    /// `Ok(None)` means nothing could be read within `timeout`. That is a
    /// normal outcome, as is a read abandoned because the header and slots
    /// disagree; the latter is also logged and counted in
    /// [`Queue::consistency_violations`].
    pub fn read(&self, timeout: Timeout) -> Result<Option<String>, QueueError> {
        let inner = self.inner()?;

        if !inner.sync.full.wait(timeout)? {
            return Ok(None);
        }

        match inner.with_lock(timeout, take) {
            None => {
                inner.sync.full.post()?;
                tracing::warn!(identity = %self.identity(), "read timed out on the queue lock");
                Ok(None)
            }
            Some(Ok((index, message))) => {
                inner.sync.empty.post()?;
                tracing::debug!(identity = %self.identity(), slot = index, "message read");
                Ok(Some(message))
            }
            Some(Err(QueueError::ConsistencyViolation(reason))) => {
                // The message was not consumed; give the permit back.
                inner.sync.full.post()?;
                self.violation(reason);
                Ok(None)
            }
            Some(Err(e)) => {
                inner.sync.full.post()?;
                Err(e)
            }
        }
    }
}

/// Removes the message at the head. Caller holds the lock and a full permit.
fn take<S: BackingStore>(store: &S) -> Result<(usize, String), QueueError> {
    let mut header = locked_header(store)?;
    if header.count <= 0 {
        return Err(QueueError::ConsistencyViolation(format!(
            "count {} although a message was signaled",
            header.count
        )));
    }
    let head = header.head as usize;
    let slot = store.slot(head)?;
    if !slot.is_occupied() {
        return Err(QueueError::ConsistencyViolation(format!(
            "slot {} at head is empty (count {})",
            head, header.count
        )));
    }

    let message = slot.text();
    store.store_slot(head, &Slot::EMPTY)?;
    header.head = header.next_index(header.head);
    header.count -= 1;
    // The message stays queued unless the header moves past it.
    if let Err(e) = store.store_header(&header) {
        if let Err(undo) = store.store_slot(head, &slot) {
            tracing::error!(slot = head, error = %undo, "could not restore slot after failed header update");
        }
        return Err(e);
    }
    Ok((head, message))
}
