use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};

/// Set once any termination signal arrives. Long-running loops poll it
/// between queue operations and close their handle instead of exiting in
/// the middle of one.
#[derive(Clone)]
pub struct ShutdownFlag {
    closing: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn install() -> io::Result<ShutdownFlag> {
        let closing = Arc::new(AtomicBool::new(false));
        for signal in [SIGHUP, SIGINT, SIGQUIT, SIGTERM].iter() {
            signal_hook::flag::register(*signal, Arc::clone(&closing))?;
        }
        Ok(ShutdownFlag { closing })
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    pub fn trigger(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_sets_the_flag() {
        let flag = ShutdownFlag::install().unwrap();
        assert!(!flag.is_closing());
        signal_hook::low_level::raise(SIGHUP).unwrap();
        assert!(flag.is_closing());
    }

    #[test]
    fn clones_share_state() {
        let flag = ShutdownFlag::install().unwrap();
        let observer = flag.clone();
        flag.trigger();
        assert!(observer.is_closing());
    }
}
