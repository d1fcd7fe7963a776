mod file;

pub use self::file::FileStore;

use std::ptr;

use nix::errno::Errno;
use shared_memory::{Shmem, ShmemConf, ShmemError};

use crate::core::*;
use crate::identity::QueueIdentity;
use crate::QueueError;

/// The addressable region holding one header followed by `capacity` slots.
///
/// Mutating calls are only made by the queue while it holds the sync
/// group lock. `snapshot` is the one unlocked read.
pub trait BackingStore: Sized {
    fn create(identity: &QueueIdentity, capacity: usize) -> Result<Self, QueueError>;
    fn attach(identity: &QueueIdentity) -> Result<Self, QueueError>;

    fn capacity(&self) -> usize;
    fn header(&self) -> Result<SegmentHeader, QueueError>;
    fn store_header(&self, header: &SegmentHeader) -> Result<(), QueueError>;
    fn slot(&self, index: usize) -> Result<Slot, QueueError>;
    fn store_slot(&self, index: usize, slot: &Slot) -> Result<(), QueueError>;

    /// Advisory header read, possibly stale by the time it returns.
    fn snapshot(&self) -> Result<SegmentHeader, QueueError> {
        self.header()
    }
}

/// Checks a header found in an existing store against the store's size.
pub(crate) fn validate_attached(
    name: &str,
    header: &SegmentHeader,
    store_len: usize,
) -> Result<usize, QueueError> {
    header
        .validate()
        .map_err(|reason| QueueError::ConsistencyViolation(format!("{}: {}", name, reason)))?;
    let capacity = header.capacity as usize;
    if store_len < segment_size(capacity) {
        return Err(QueueError::ConsistencyViolation(format!(
            "{}: {} bytes cannot hold {} slots",
            name, store_len, capacity
        )));
    }
    Ok(capacity)
}

/// Header and slots in a POSIX shared memory segment mapped into every
/// attached process.
pub struct ShmemStore {
    shmem: Shmem,
    capacity: usize,
}

// All access to the mapping goes through raw pointer reads and writes, and
// every mutation is serialized by the cross-process lock.
unsafe impl Send for ShmemStore {}
unsafe impl Sync for ShmemStore {}

impl ShmemStore {
    #[inline]
    fn header_ptr(&self) -> *mut SegmentHeader {
        self.shmem.as_ptr() as *mut SegmentHeader
    }

    #[inline]
    fn slot_ptr(&self, index: usize) -> Result<*mut Slot, QueueError> {
        if index >= self.capacity {
            return Err(QueueError::ConsistencyViolation(format!(
                "slot index {} outside capacity {}",
                index, self.capacity
            )));
        }
        Ok(unsafe { self.shmem.as_ptr().add(slot_offset(index)) as *mut Slot })
    }

    pub fn name(&self) -> &str {
        self.shmem.get_os_id()
    }

    pub fn is_owner(&self) -> bool {
        self.shmem.is_owner()
    }

    /// Removes the segment name left by an owner that never closed.
    pub fn unlink(identity: &QueueIdentity) -> Result<(), QueueError> {
        match nix::sys::mman::shm_unlink(identity.store_name().as_str()) {
            Ok(()) | Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(QueueError::Io(e.into())),
        }
    }
}

impl BackingStore for ShmemStore {
    fn create(identity: &QueueIdentity, capacity: usize) -> Result<Self, QueueError> {
        check_capacity(capacity)?;
        let name = identity.store_name();
        let shmem = ShmemConf::new()
            .os_id(&name)
            .size(segment_size(capacity))
            .create()
            .map_err(|e| QueueError::StoreCreationFailed {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        let store = ShmemStore { shmem, capacity };
        for index in 0..capacity {
            store.store_slot(index, &Slot::EMPTY)?;
        }
        store.store_header(&SegmentHeader::new(capacity))?;
        tracing::info!(name = %name, capacity, size = segment_size(capacity), "shared memory store created");
        Ok(store)
    }

    fn attach(identity: &QueueIdentity) -> Result<Self, QueueError> {
        let name = identity.store_name();
        let shmem = ShmemConf::new().os_id(&name).open().map_err(|e| match e {
            ShmemError::MapOpenFailed(_) | ShmemError::LinkDoesNotExist => QueueError::StoreNotFound { name: name.clone() },
            other => QueueError::StoreCreationFailed {
                name: name.clone(),
                reason: other.to_string(),
            },
        })?;
        if shmem.len() < HEADER_SIZE {
            return Err(QueueError::ConsistencyViolation(format!(
                "{}: {} bytes is smaller than a header",
                name,
                shmem.len()
            )));
        }
        let header = unsafe { ptr::read_volatile(shmem.as_ptr() as *const SegmentHeader) };
        let capacity = validate_attached(&name, &header, shmem.len())?;
        tracing::info!(name = %name, capacity, count = header.count, "shared memory store attached");
        Ok(ShmemStore { shmem, capacity })
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn header(&self) -> Result<SegmentHeader, QueueError> {
        Ok(unsafe { ptr::read_volatile(self.header_ptr()) })
    }

    fn store_header(&self, header: &SegmentHeader) -> Result<(), QueueError> {
        unsafe { ptr::write_volatile(self.header_ptr(), *header) };
        Ok(())
    }

    fn slot(&self, index: usize) -> Result<Slot, QueueError> {
        let slot = self.slot_ptr(index)?;
        Ok(unsafe { ptr::read_volatile(slot) })
    }

    fn store_slot(&self, index: usize, slot: &Slot) -> Result<(), QueueError> {
        let dest = self.slot_ptr(index)?;
        unsafe { ptr::write_volatile(dest, *slot) };
        Ok(())
    }
}
