//! Level-triggered signal shared between control and worker threads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A boolean flag that threads can block on with a bounded timeout.
///
/// Used as the stop signal of every loop (set once, observed within one
/// scheduling quantum) and as the client's "playing" gate for the display
/// loop. Cloning shares the same flag.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let (flag, cond) = &*self.inner;
        *flag.lock() = true;
        cond.notify_all();
    }

    pub fn clear(&self) {
        *self.inner.0.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block until the flag is set or `timeout` elapses.
    ///
    /// Returns whether the flag is set on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (flag, cond) = &*self.inner;
        let mut set = flag.lock();
        while !*set {
            if cond.wait_until(&mut set, deadline).timed_out() {
                break;
            }
        }
        *set
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Signal").field(&self.is_set()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_times_out_when_unset() {
        let signal = Signal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn set_wakes_waiter() {
        let signal = Signal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        signal.set();
        assert!(waiter.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn clear_resets() {
        let signal = Signal::new();
        signal.set();
        assert!(signal.wait_timeout(Duration::ZERO));
        signal.clear();
        assert!(!signal.is_set());
    }
}
