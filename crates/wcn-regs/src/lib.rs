//! Indirect/windowed register access for the co-processor BAR.
//!
//! The device register space is larger than the mapped aperture; offsets past
//! the unwindowed limit go through a remap window selected by a control
//! register at the top of the BAR. The window is shared hardware state and may
//! be retargeted from interrupt-context debug reads, so window selection plus
//! the dependent access happen under a dedicated short-hold lock, independent
//! of the lifecycle event queue.

mod time_sync;
mod window;

pub use time_sync::{TimeSync, TimeSyncError};
pub use window::{Bar, LinkProbe, RegError, RegisterWindow};
