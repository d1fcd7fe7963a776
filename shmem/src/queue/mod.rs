use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use raw_sync::locks::LockGuard;
use serde_derive::Serialize;

use crate::core::{SegmentHeader, Timeout};
use crate::identity::QueueIdentity;
use crate::store::{BackingStore, FileStore, ShmemStore};
use crate::sync::SyncGroup;
use crate::QueueError;

/// Point-in-time view of the header. Advisory only: other processes may
/// change it as soon as it is taken.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub capacity: usize,
    pub count: usize,
    pub is_empty: bool,
    pub is_full: bool,
}

pub(crate) struct QueueInner<S> {
    pub(crate) store: S,
    pub(crate) sync: SyncGroup,
}

/// A bounded FIFO of short text messages shared between processes.
///
/// Handles are created by one process with [`Queue::create`] and joined by
/// others with [`Queue::attach`] using the same path.
pub struct Queue<S: BackingStore = ShmemStore> {
    identity: QueueIdentity,
    inner: Option<QueueInner<S>>,
    violations: AtomicU64,
}

impl Queue<ShmemStore> {
    pub fn create(path: impl AsRef<Path>, capacity: usize) -> Result<Self, QueueError> {
        Self::create_with(path, capacity)
    }

    pub fn attach(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        Self::attach_with(path)
    }

    /// Removes a shared memory store and primitives left behind by a
    /// process that died without closing. Missing names are ignored.
    pub fn unlink(path: impl AsRef<Path>) -> Result<(), QueueError> {
        let identity = QueueIdentity::resolve(path)?;
        ShmemStore::unlink(&identity)?;
        SyncGroup::unlink(&identity)?;
        tracing::info!(identity = %identity, "stale queue resources unlinked");
        Ok(())
    }
}

impl Queue<FileStore> {
    pub fn create_file_backed(path: impl AsRef<Path>, capacity: usize) -> Result<Self, QueueError> {
        Self::create_with(path, capacity)
    }

    pub fn attach_file_backed(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        Self::attach_with(path)
    }

    /// Reopens a file queue whose creator has gone. The file is left as it
    /// is and new primitives are seeded from its header, so the messages it
    /// holds are read in their original order. The returned handle owns the
    /// primitives like a creator does.
    pub fn open_file_backed(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let identity = QueueIdentity::resolve(path)?;
        let store = FileStore::attach(&identity)?;
        let header = locked_header(&store)?;
        let sync = SyncGroup::create_seeded(&identity, store.capacity(), header.count as usize)?;
        tracing::info!(identity = %identity, capacity = store.capacity(), count = header.count, "file queue reopened");
        Ok(Queue {
            identity,
            inner: Some(QueueInner { store, sync }),
            violations: AtomicU64::new(0),
        })
    }
}

impl<S: BackingStore> Queue<S> {
    pub fn create_with(path: impl AsRef<Path>, capacity: usize) -> Result<Self, QueueError> {
        let identity = QueueIdentity::resolve(path)?;
        // The store is fully initialized before the primitives exist, so an
        // attacher that finds the primitives finds a valid header.
        let store = S::create(&identity, capacity)?;
        let sync = SyncGroup::create(&identity, capacity)?;
        tracing::info!(identity = %identity, capacity, "queue created");
        Ok(Queue {
            identity,
            inner: Some(QueueInner { store, sync }),
            violations: AtomicU64::new(0),
        })
    }

    pub fn attach_with(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let identity = QueueIdentity::resolve(path)?;
        let sync = SyncGroup::attach(&identity)?;
        let store = S::attach(&identity)?;
        tracing::info!(identity = %identity, capacity = store.capacity(), "queue attached");
        Ok(Queue {
            identity,
            inner: Some(QueueInner { store, sync }),
            violations: AtomicU64::new(0),
        })
    }

    pub fn identity(&self) -> &QueueIdentity {
        &self.identity
    }

    pub(crate) fn inner(&self) -> Result<&QueueInner<S>, QueueError> {
        self.inner.as_ref().ok_or(QueueError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Releases the synchronization handles and unmaps the store. A handle
    /// that created the queue also removes its names.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::info!(identity = %self.identity, "queue closed");
        }
    }

    pub fn signal_ready(&self) -> Result<(), QueueError> {
        self.inner()?.sync.signal_ready()?;
        tracing::debug!(identity = %self.identity, "readiness signaled");
        Ok(())
    }

    pub fn wait_ready(&self, timeout: Timeout) -> Result<bool, QueueError> {
        Ok(self.inner()?.sync.wait_ready(timeout))
    }

    pub fn capacity(&self) -> Result<usize, QueueError> {
        Ok(self.inner()?.store.capacity())
    }

    pub fn count(&self) -> Result<usize, QueueError> {
        Ok(self.status()?.count)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.status()?.is_empty)
    }

    pub fn is_full(&self) -> Result<bool, QueueError> {
        Ok(self.status()?.is_full)
    }

    /// Reads the header without taking the lock. A header that breaks the
    /// bound invariant is reported as a violation, never as "empty".
    pub fn status(&self) -> Result<QueueStatus, QueueError> {
        let header = self.inner()?.store.snapshot()?;
        if let Err(reason) = header.validate() {
            return Err(self.violation(reason));
        }
        let capacity = header.capacity as usize;
        let count = header.count as usize;
        Ok(QueueStatus {
            capacity,
            count,
            is_empty: count == 0,
            is_full: count >= capacity,
        })
    }

    /// Number of consistency violations this handle has observed.
    pub fn consistency_violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    pub(crate) fn violation(&self, reason: String) -> QueueError {
        self.violations.fetch_add(1, Ordering::Relaxed);
        tracing::error!(identity = %self.identity, reason = %reason, "queue consistency violation");
        QueueError::ConsistencyViolation(reason)
    }
}

impl<S: BackingStore> QueueInner<S> {
    /// Runs `f` against the store while holding the cross-process lock.
    /// `None` if the lock was not acquired within `timeout`.
    pub(crate) fn with_lock<R, F>(&self, timeout: Timeout, f: F) -> Option<R>
    where
        F: FnOnce(&S) -> R,
    {
        let _guard: LockGuard<'_> = self.sync.lock(timeout)?;
        Some(f(&self.store))
    }
}

/// Header as seen under the lock, checked against the bound invariant and
/// the capacity the store was opened with.
pub(crate) fn locked_header<S: BackingStore>(store: &S) -> Result<SegmentHeader, QueueError> {
    let header = store.header()?;
    header.validate().map_err(QueueError::ConsistencyViolation)?;
    if header.capacity as usize != store.capacity() {
        return Err(QueueError::ConsistencyViolation(format!(
            "header capacity {} differs from store capacity {}",
            header.capacity,
            store.capacity()
        )));
    }
    Ok(header)
}
