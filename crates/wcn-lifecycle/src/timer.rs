use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

struct TimerState {
    generation: u64,
    armed: bool,
}

struct Inner {
    state: Mutex<TimerState>,
    cond: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// One-shot deadline timer. Arming spawns a waiter thread that runs the
/// expiry action unless the timer is disarmed or re-armed first; disarming
/// wakes the waiter so it exits promptly.
pub struct EventTimer {
    inner: Arc<Inner>,
    name: &'static str,
}

impl EventTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TimerState {
                    generation: 0,
                    armed: false,
                }),
                cond: Condvar::new(),
            }),
            name,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.lock().armed
    }

    /// Arms the timer, replacing any earlier deadline.
    pub fn arm<F>(&self, after: Duration, on_expiry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.armed = true;
            state.generation
        };
        // Wake a superseded waiter so it notices the new generation.
        self.inner.cond.notify_all();

        let inner = Arc::clone(&self.inner);
        let name = self.name;
        let deadline = Instant::now() + after;
        thread::Builder::new()
            .name(format!("wcn-timer-{name}"))
            .spawn(move || {
                let mut state = inner.lock();
                loop {
                    if !state.armed || state.generation != generation {
                        return;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        state.armed = false;
                        drop(state);
                        debug!(timer = name, "deadline timer expired");
                        on_expiry();
                        return;
                    }
                    state = match inner.cond.wait_timeout(state, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    };
                }
            })
            .expect("failed to spawn timer thread");
    }

    pub fn disarm(&self) {
        let mut state = self.inner.lock();
        state.armed = false;
        state.generation += 1;
        drop(state);
        self.inner.cond.notify_all();
    }
}
