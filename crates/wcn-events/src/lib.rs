//! Single-consumer event serialization for the co-processor lifecycle.
//!
//! Every lifecycle-affecting operation (boot, firmware handshake milestones,
//! suspend/resume, crash recovery, shutdown) is funneled through one FIFO
//! mailbox drained by a single worker thread. Producers (interrupt handlers,
//! platform callbacks, blocking API callers) only ever enqueue; all state
//! mutation happens on the worker. Synchronous posters block on a per-entry
//! completion slot, optionally with a deadline after which the entry is
//! *abandoned*: the worker still runs it to completion and discards the
//! result, so an interrupted caller must not assume side effects were skipped.

mod completion;
mod mailbox;

pub use completion::Completion;
pub use mailbox::{EventWorker, Mailbox, PostError, PostMode};
