use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// How a posted event is delivered back to the poster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostMode {
    /// Fire-and-forget: the entry is freed by the worker, errors are logged.
    Async,
    /// Block until the worker completes the entry.
    SyncBlocking,
    /// Block until the worker completes the entry or the deadline expires.
    /// Expiry abandons the entry; the worker still runs it to completion.
    Sync { deadline: Duration },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PostError {
    /// The mailbox was closed; the owning context no longer exists.
    #[error("event mailbox is closed")]
    Closed,
    /// A deadline-bounded sync wait expired before the handler completed.
    /// Side effects of the handler are *not* rolled back.
    #[error("sync wait abandoned before completion")]
    Abandoned,
}

enum SlotState<R> {
    Pending,
    Done(R),
    Abandoned,
}

/// Per-entry completion slot shared between a sync poster and the worker.
struct EntrySlot<R> {
    state: Mutex<SlotState<R>>,
    cond: Condvar,
}

impl<R> EntrySlot<R> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<R>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct Entry<E, R> {
    event: E,
    slot: Option<Arc<EntrySlot<R>>>,
}

struct Inner<E, R> {
    queue: Mutex<MailboxState<E, R>>,
    wake: Condvar,
}

struct MailboxState<E, R> {
    entries: VecDeque<Entry<E, R>>,
    closed: bool,
}

/// FIFO mailbox of typed lifecycle events with one draining worker.
///
/// Cloning shares the underlying queue; producers enqueue from any thread.
pub struct Mailbox<E, R> {
    inner: Arc<Inner<E, R>>,
}

impl<E, R> Clone for Mailbox<E, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E, R> Default for Mailbox<E, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, R> Mailbox<E, R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(MailboxState {
                    entries: VecDeque::new(),
                    closed: false,
                }),
                wake: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MailboxState<E, R>> {
        match self.inner.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Closes the mailbox. The worker drains what is already queued, then
    /// exits; subsequent posts fail with [`PostError::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.inner.wake.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn pop_or_park(&self) -> Option<Entry<E, R>> {
        let mut state = self.lock();
        loop {
            if let Some(entry) = state.entries.pop_front() {
                return Some(entry);
            }
            if state.closed {
                return None;
            }
            state = match self.inner.wake.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl<E, R> Mailbox<E, R>
where
    E: fmt::Debug,
{
    /// Enqueues `event` and wakes the worker.
    ///
    /// For the sync modes the caller blocks on the entry's completion slot and
    /// receives the handler result. An expired [`PostMode::Sync`] deadline
    /// detaches the caller from the result, converting the entry to
    /// fire-and-forget from that point.
    pub fn post(&self, event: E, mode: PostMode) -> Result<Option<R>, PostError> {
        debug!(?event, ?mode, "posting lifecycle event");

        let slot = match mode {
            PostMode::Async => None,
            PostMode::SyncBlocking | PostMode::Sync { .. } => Some(Arc::new(EntrySlot::new())),
        };

        {
            let mut state = self.lock();
            if state.closed {
                return Err(PostError::Closed);
            }
            state.entries.push_back(Entry {
                event,
                slot: slot.clone(),
            });
        }
        self.inner.wake.notify_all();

        let Some(slot) = slot else {
            return Ok(None);
        };

        let deadline = match mode {
            PostMode::Sync { deadline } => Some(Instant::now() + deadline),
            _ => None,
        };

        let mut state = slot.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Pending) {
                SlotState::Done(result) => return Ok(Some(result)),
                SlotState::Abandoned => unreachable!("poster observed its own abandonment"),
                SlotState::Pending => {}
            }
            match deadline {
                None => {
                    state = match slot.cond.wait(state) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        *state = SlotState::Abandoned;
                        warn!("sync event wait expired; entry abandoned to the worker");
                        return Err(PostError::Abandoned);
                    }
                    let (guard, _) = match slot.cond.wait_timeout(state, deadline - now) {
                        Ok(pair) => pair,
                        Err(poisoned) => {
                            let pair = poisoned.into_inner();
                            (pair.0, pair.1)
                        }
                    };
                    state = guard;
                }
            }
        }
    }
}

/// The single draining worker. Owns the handler (and through it all mutable
/// lifecycle state), so no lock is needed around the state itself.
pub struct EventWorker {
    handle: Option<JoinHandle<()>>,
}

impl EventWorker {
    /// Spawns the worker thread. `handler` runs once per entry, strictly in
    /// FIFO order; its result is delivered to a sync poster or logged.
    pub fn spawn<E, R, F>(mailbox: Mailbox<E, R>, mut handler: F) -> Self
    where
        E: fmt::Debug + Send + 'static,
        R: Send + 'static,
        F: FnMut(E) -> R + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("wcn-lifecycle".into())
            .spawn(move || {
                while let Some(entry) = mailbox.pop_or_park() {
                    debug!(event = ?entry.event, "processing lifecycle event");
                    let result = handler(entry.event);
                    let Some(slot) = entry.slot else {
                        continue;
                    };
                    let mut state = slot.lock();
                    match *state {
                        SlotState::Abandoned => {
                            // Poster gave up; drop the result on the floor.
                            debug!("completed an abandoned sync entry");
                        }
                        _ => {
                            *state = SlotState::Done(result);
                            slot.cond.notify_all();
                        }
                    }
                }
            })
            .expect("failed to spawn lifecycle worker");
        Self {
            handle: Some(handle),
        }
    }

    /// Waits for the worker to drain and exit. Call after closing the mailbox.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
