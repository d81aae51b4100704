//! PCI link and power-rail sequencing for the wireless co-processor.
//!
//! The sequencer owns the host-side view of the link (up or down) and walks
//! the suspend/resume choreography in a fixed order. Both directions are
//! idempotent: asking for the state the link is already in is a logged no-op,
//! never an error, since shutdown paths run them unconditionally.

mod sequencer;

pub use sequencer::{DevicePowerState, LinkError, LinkSequencer, LinkState, PciPort, PortError};
