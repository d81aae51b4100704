use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A reusable completion latch with bounded waits.
///
/// Maps the kernel `completion` idiom onto a mutex + condvar pair: one side
/// calls [`Completion::complete`], waiters block with an explicit deadline.
/// `reset` rearms the latch before a fresh round trip.
#[derive(Debug, Default)]
pub struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        match self.done.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Rearms the latch. Any completion recorded earlier is forgotten.
    pub fn reset(&self) {
        *self.lock() = false;
    }

    pub fn complete(&self) {
        let mut done = self.lock();
        *done = true;
        self.cond.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        *self.lock()
    }

    /// Blocks until completed. Only for waits the worker itself cannot stall.
    pub fn wait(&self) {
        let mut done = self.lock();
        while !*done {
            done = match self.cond.wait(done) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Blocks until completed or the timeout elapses. Returns `true` when the
    /// latch completed within the budget.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.lock();
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = match self.cond.wait_timeout(done, deadline - now) {
                Ok(pair) => pair,
                Err(poisoned) => {
                    let pair = poisoned.into_inner();
                    (pair.0, pair.1)
                }
            };
            done = guard;
            if result.timed_out() && !*done {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_timeout_observes_completion() {
        let latch = Arc::new(Completion::new());
        let signaller = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaller.complete();
        });
        assert!(latch.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_when_never_completed() {
        let latch = Completion::new();
        assert!(!latch.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn reset_rearms_a_completed_latch() {
        let latch = Completion::new();
        latch.complete();
        assert!(latch.is_complete());
        latch.reset();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }
}
