use std::ffi::CString;
use std::os::raw::c_int;
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;

use crate::core::Timeout;

#[derive(Error, Debug)]
pub enum SemaphoreError {
    #[error("Semaphore call failed: {0}")]
    Os(#[from] Errno),
    #[error("Invalid semaphore name")]
    InvalidName,
}

/// A POSIX named counting semaphore, visible to every process that knows
/// its name.
pub struct Semaphore {
    sem: *mut libc::sem_t,
    name: String,
}

impl Semaphore {
    /// Creates a new semaphore. Fails with `EEXIST` if the name is taken.
    pub fn create(name: &str, initial_value: u32) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                initial_value as libc::c_uint,
            )
        };

        if sem == libc::SEM_FAILED {
            return Err(SemaphoreError::Os(Errno::last()));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        if sem == libc::SEM_FAILED {
            return Err(SemaphoreError::Os(Errno::last()));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes one permit. Returns `Ok(false)` if none became available
    /// within `timeout`.
    pub fn wait(&self, timeout: Timeout) -> Result<bool, SemaphoreError> {
        match timeout {
            Timeout::Infinite => loop {
                let ret = unsafe { libc::sem_wait(self.sem) };
                if ret == 0 {
                    return Ok(true);
                }
                match Errno::last() {
                    Errno::EINTR => continue,
                    errno => return Err(SemaphoreError::Os(errno)),
                }
            },
            Timeout::Val(d) if d.is_zero() => self.try_wait(),
            Timeout::Val(d) => self.timed_wait(d),
        }
    }

    pub fn try_wait(&self) -> Result<bool, SemaphoreError> {
        let ret = unsafe { libc::sem_trywait(self.sem) };
        if ret == 0 {
            Ok(true)
        } else {
            let errno = Errno::last();
            if errno == Errno::EAGAIN {
                Ok(false)
            } else {
                Err(SemaphoreError::Os(errno))
            }
        }
    }

    fn timed_wait(&self, timeout: Duration) -> Result<bool, SemaphoreError> {
        let deadline = realtime_deadline(timeout)?;
        loop {
            let ret = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if ret == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::ETIMEDOUT => return Ok(false),
                errno => return Err(SemaphoreError::Os(errno)),
            }
        }
    }

    pub fn post(&self) -> Result<(), SemaphoreError> {
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret != 0 {
            return Err(SemaphoreError::Os(Errno::last()));
        }
        Ok(())
    }

    pub fn value(&self) -> Result<i32, SemaphoreError> {
        let mut val: c_int = 0;
        let ret = unsafe { libc::sem_getvalue(self.sem, &mut val) };
        if ret != 0 {
            return Err(SemaphoreError::Os(Errno::last()));
        }
        Ok(val)
    }

    pub fn unlink(name: &str) -> Result<(), SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if ret != 0 {
            return Err(SemaphoreError::Os(Errno::last()));
        }
        Ok(())
    }
}

/// `sem_timedwait` takes an absolute CLOCK_REALTIME deadline.
fn realtime_deadline(timeout: Duration) -> Result<libc::timespec, SemaphoreError> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };
    if ret != 0 {
        return Err(SemaphoreError::Os(Errno::last()));
    }
    let mut sec = now.tv_sec as i64 + timeout.as_secs() as i64;
    let mut nsec = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
    if nsec >= 1_000_000_000 {
        sec += 1;
        nsec -= 1_000_000_000;
    }
    Ok(libc::timespec {
        tv_sec: sec as libc::time_t,
        tv_nsec: nsec as _,
    })
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

// sem_t handles from sem_open are process-wide and the sem_* calls are
// thread safe.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}
