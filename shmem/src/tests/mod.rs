mod concurrency_tests;

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::{SegmentHeader, Slot};
use crate::identity::QueueIdentity;
use crate::store::{BackingStore, FileStore};
use crate::QueueError;

/// File store whose header writes can be made to fail on demand.
pub(crate) struct HeaderFailingStore {
    inner: FileStore,
    fail: AtomicBool,
}

impl HeaderFailingStore {
    pub(crate) fn at(path: impl AsRef<Path>, capacity: usize) -> HeaderFailingStore {
        let identity = QueueIdentity::resolve(path).unwrap();
        <Self as BackingStore>::create(&identity, capacity).unwrap()
    }

    pub(crate) fn fail_header_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl BackingStore for HeaderFailingStore {
    fn create(identity: &QueueIdentity, capacity: usize) -> Result<Self, QueueError> {
        Ok(HeaderFailingStore {
            inner: FileStore::create(identity, capacity)?,
            fail: AtomicBool::new(false),
        })
    }

    fn attach(identity: &QueueIdentity) -> Result<Self, QueueError> {
        Ok(HeaderFailingStore {
            inner: FileStore::attach(identity)?,
            fail: AtomicBool::new(false),
        })
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn header(&self) -> Result<SegmentHeader, QueueError> {
        self.inner.header()
    }

    fn store_header(&self, header: &SegmentHeader) -> Result<(), QueueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "header write refused").into());
        }
        self.inner.store_header(header)
    }

    fn slot(&self, index: usize) -> Result<Slot, QueueError> {
        self.inner.slot(index)
    }

    fn store_slot(&self, index: usize, slot: &Slot) -> Result<(), QueueError> {
        self.inner.store_slot(index, slot)
    }
}
