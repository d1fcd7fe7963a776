pub mod lock;
pub mod semaphore;

use nix::errno::Errno;
use raw_sync::locks::LockGuard;

use crate::core::Timeout;
use crate::identity::{QueueIdentity, SyncKind};
use crate::QueueError;

use self::lock::{NamedLock, ReadyLatch};
use self::semaphore::{Semaphore, SemaphoreError};

/// The four named primitives guarding one queue.
pub struct SyncGroup {
    pub(crate) empty: Semaphore,
    pub(crate) full: Semaphore,
    lock: NamedLock,
    ready: ReadyLatch,
    names: Vec<String>,
    owner: bool,
}

/// Unlinks the semaphore names created so far unless disarmed. The lock
/// and latch segments unlink themselves when their owning handle drops.
struct Rollback {
    semaphores: Vec<String>,
    armed: bool,
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for name in self.semaphores.iter() {
            if let Err(e) = Semaphore::unlink(name) {
                tracing::warn!(name = %name, error = %e, "rollback could not unlink semaphore");
            }
        }
    }
}

impl SyncGroup {
    pub fn create(identity: &QueueIdentity, capacity: usize) -> Result<SyncGroup, QueueError> {
        Self::create_seeded(identity, capacity, 0)
    }

    /// Creates the primitives for a store that already holds `count`
    /// messages, so the permits match what is on disk.
    pub fn create_seeded(identity: &QueueIdentity, capacity: usize, count: usize) -> Result<SyncGroup, QueueError> {
        if count > capacity {
            return Err(QueueError::ConsistencyViolation(format!(
                "count {} exceeds capacity {}",
                count, capacity
            )));
        }
        let failed = |name: &str, reason: String| QueueError::SyncCreationFailed {
            name: name.to_string(),
            reason,
        };
        let mut rollback = Rollback {
            semaphores: Vec::with_capacity(2),
            armed: true,
        };

        let empty_name = identity.sync_name(SyncKind::Empty);
        let empty = Semaphore::create(&empty_name, (capacity - count) as u32).map_err(|e| failed(&empty_name, e.to_string()))?;
        rollback.semaphores.push(empty_name);

        let full_name = identity.sync_name(SyncKind::Full);
        let full = Semaphore::create(&full_name, count as u32).map_err(|e| failed(&full_name, e.to_string()))?;
        rollback.semaphores.push(full_name);

        let mutex_name = identity.sync_name(SyncKind::Mutex);
        let lock = NamedLock::create(&mutex_name).map_err(|e| failed(&mutex_name, e))?;

        let ready_name = identity.sync_name(SyncKind::Ready);
        let ready = ReadyLatch::create(&ready_name).map_err(|e| failed(&ready_name, e))?;

        rollback.armed = false;
        tracing::debug!(identity = %identity, capacity, count, "sync group created");
        Ok(SyncGroup {
            empty,
            full,
            lock,
            ready,
            names: SyncKind::ALL.iter().map(|k| identity.sync_name(*k)).collect(),
            owner: true,
        })
    }

    pub fn attach(identity: &QueueIdentity) -> Result<SyncGroup, QueueError> {
        let not_found = |kind: SyncKind| QueueError::SyncNotFound {
            name: identity.sync_name(kind),
        };

        let empty = Semaphore::open(&identity.sync_name(SyncKind::Empty)).map_err(|_| not_found(SyncKind::Empty))?;
        let full = Semaphore::open(&identity.sync_name(SyncKind::Full)).map_err(|_| not_found(SyncKind::Full))?;
        let lock = NamedLock::open(&identity.sync_name(SyncKind::Mutex)).map_err(|_| not_found(SyncKind::Mutex))?;
        let ready = ReadyLatch::open(&identity.sync_name(SyncKind::Ready)).map_err(|_| not_found(SyncKind::Ready))?;

        tracing::debug!(identity = %identity, "sync group attached");
        Ok(SyncGroup {
            empty,
            full,
            lock,
            ready,
            names: SyncKind::ALL.iter().map(|k| identity.sync_name(*k)).collect(),
            owner: false,
        })
    }

    pub fn lock(&self, timeout: Timeout) -> Option<LockGuard<'_>> {
        self.lock.acquire(timeout)
    }

    pub fn signal_ready(&self) -> Result<(), QueueError> {
        self.ready.signal().map_err(|reason| sync_failed(&self.names[3], reason))
    }

    pub fn wait_ready(&self, timeout: Timeout) -> bool {
        self.ready.wait(timeout)
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Removes every primitive name derived from `identity`, ignoring the
    /// ones that do not exist. Used to clear what a crashed owner left.
    pub fn unlink(identity: &QueueIdentity) -> Result<(), QueueError> {
        for kind in [SyncKind::Empty, SyncKind::Full].iter() {
            match Semaphore::unlink(&identity.sync_name(*kind)) {
                Ok(()) | Err(SemaphoreError::Os(Errno::ENOENT)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for kind in [SyncKind::Mutex, SyncKind::Ready].iter() {
            match nix::sys::mman::shm_unlink(identity.sync_name(*kind).as_str()) {
                Ok(()) | Err(Errno::ENOENT) => {}
                Err(e) => return Err(SemaphoreError::Os(e).into()),
            }
        }
        Ok(())
    }
}

fn sync_failed(name: &str, reason: String) -> QueueError {
    QueueError::SyncFailed {
        name: name.to_string(),
        reason,
    }
}

impl Drop for SyncGroup {
    fn drop(&mut self) {
        // Semaphore names outlive their handles, so the creator removes
        // them. Processes already attached keep working on the open handles.
        if !self.owner {
            return;
        }
        for name in self.names[..2].iter() {
            if let Err(e) = Semaphore::unlink(name) {
                tracing::debug!(name = %name, error = %e, "semaphore already unlinked");
            }
        }
    }
}
