//! Process-shared lock and readiness latch, each hosted in its own named
//! shared memory segment.

use std::ptr;

use raw_sync::events::{Event, EventImpl, EventInit, EventState};
use raw_sync::locks::{LockGuard, LockImpl, LockInit, Mutex};
use shared_memory::{Shmem, ShmemConf, ShmemError};

use crate::core::Timeout;

fn create_segment(name: &str, size: usize) -> Result<Shmem, ShmemError> {
    ShmemConf::new().os_id(name).size(size).create()
}

fn open_segment(name: &str) -> Result<Shmem, ShmemError> {
    ShmemConf::new().os_id(name).open()
}

/// Mutual exclusion across processes over the header and slot region.
pub struct NamedLock {
    // Field order matters: the lock must be dropped before its memory.
    lock: Box<dyn LockImpl>,
    _shmem: Shmem,
}

impl NamedLock {
    pub fn create(name: &str) -> Result<NamedLock, String> {
        let shmem = create_segment(name, Mutex::size_of(None)).map_err(|e| e.to_string())?;
        let (lock, _) = unsafe { Mutex::new(shmem.as_ptr(), ptr::null_mut()) }.map_err(|e| e.to_string())?;
        Ok(NamedLock {
            lock,
            _shmem: shmem,
        })
    }

    pub fn open(name: &str) -> Result<NamedLock, String> {
        let shmem = open_segment(name).map_err(|e| e.to_string())?;
        let (lock, _) =
            unsafe { Mutex::from_existing(shmem.as_ptr(), ptr::null_mut()) }.map_err(|e| e.to_string())?;
        Ok(NamedLock {
            lock,
            _shmem: shmem,
        })
    }

    /// Holds the lock until the guard is dropped. `None` if it could not be
    /// taken within `timeout`.
    pub fn acquire(&self, timeout: Timeout) -> Option<LockGuard<'_>> {
        let result = match timeout {
            Timeout::Infinite => self.lock.lock(),
            _ => self.lock.try_lock(timeout.to_raw()),
        };
        match result {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::debug!(error = %e, "lock not acquired");
                None
            }
        }
    }
}

// The pthread primitives are initialized process-shared and may be used
// from any thread.
unsafe impl Send for NamedLock {}
unsafe impl Sync for NamedLock {}

/// Single-writer, many-reader latch. Manual reset, so once signaled every
/// waiter, present or future, passes.
pub struct ReadyLatch {
    event: Box<dyn EventImpl>,
    _shmem: Shmem,
}

impl ReadyLatch {
    pub fn create(name: &str) -> Result<ReadyLatch, String> {
        let shmem = create_segment(name, Event::size_of(None)).map_err(|e| e.to_string())?;
        let (event, _) = unsafe { Event::new(shmem.as_ptr(), false) }.map_err(|e| e.to_string())?;
        event.set(EventState::Clear).map_err(|e| e.to_string())?;
        Ok(ReadyLatch {
            event,
            _shmem: shmem,
        })
    }

    pub fn open(name: &str) -> Result<ReadyLatch, String> {
        let shmem = open_segment(name).map_err(|e| e.to_string())?;
        let (event, _) = unsafe { Event::from_existing(shmem.as_ptr()) }.map_err(|e| e.to_string())?;
        Ok(ReadyLatch {
            event,
            _shmem: shmem,
        })
    }

    pub fn signal(&self) -> Result<(), String> {
        self.event.set(EventState::Signaled).map_err(|e| e.to_string())
    }

    pub fn wait(&self, timeout: Timeout) -> bool {
        match self.event.wait(timeout.to_raw()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "readiness wait ended unsignaled");
                false
            }
        }
    }
}

unsafe impl Send for ReadyLatch {}
unsafe impl Sync for ReadyLatch {}
