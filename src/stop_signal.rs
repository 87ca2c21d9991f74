use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Broadcast-once stop flag shared by every worker of one generation.
///
/// Busy workers poll [`StopSignal::is_raised`], which is a single atomic load.
/// Ticking workers park in [`StopSignal::wait_timeout`] and are woken as soon
/// as the signal is raised. A fresh signal is created on every start, so a
/// raised signal never leaks into a later generation.
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Calling it more than once is harmless.
    pub fn raise(&self) {
        // Hold the lock while storing so a waiter cannot miss the wakeup
        // between its check and its park.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.raised.store(true, Ordering::SeqCst);
        self.cvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }

    /// Sleeps up to `timeout`, returning early once the signal is raised.
    /// Returns `true` if the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.raised.load(Ordering::SeqCst) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .cvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_times_out_when_not_raised() {
        let signal = StopSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn raise_wakes_a_parked_waiter() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let start = Instant::now();
                let raised = signal.wait_timeout(Duration::from_secs(30));
                (raised, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.raise();

        let (raised, waited) = waiter.join().unwrap();
        assert!(raised);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn raise_is_idempotent_and_sticky() {
        let signal = StopSignal::new();
        assert!(!signal.is_raised());
        signal.raise();
        signal.raise();
        assert!(signal.is_raised());
        assert!(signal.wait_timeout(Duration::ZERO));
    }
}
