//! Bus-level power phases of the wireless co-processor (MHI).
//!
//! The device's bus power state is a set of independent bits rather than a
//! single enum because several phases are simultaneously meaningful ("powered
//! on" stays true while "suspended" is set). Every requested transition is
//! gated by an explicit legality table; the underlying hardware call runs only
//! after the check passes, and the bit mutates only after the hardware call
//! succeeds, so the bitmask always reflects the last hardware-confirmed state.

mod controller;
mod state;

pub use controller::{BusError, MemRegion, MhiBus, MhiController, MhiError, MhiStatus, RddmImages};
pub use state::{MhiState, MhiTransition};
