//! Lifecycle orchestration for a PCIe-attached wireless co-processor.
//!
//! A [`Device`] owns the full boot, handshake, recovery, and shutdown story of
//! one attached chip. Hardware and platform services plug in behind traits
//! (the PCI port, the MHI bus controller, the firmware messenger, the client
//! driver); everything that mutates lifecycle state is serialized through a
//! single worker thread, so handlers never race each other and the callback
//! contract to the client driver stays single-threaded.
//!
//! The public methods fall into three groups: event injection from platform
//! glue ([`Device::on_mhi_status`], [`Device::on_link_down`],
//! [`Device::post_event`]), blocking control operations ([`Device::power_up`],
//! [`Device::register_driver`], ...) which post an event and wait on a
//! completion latch, and snapshots ([`Device::driver_state`],
//! [`Device::dump_meta`]).

mod config;
mod device;
mod error;
mod events;
mod family;
mod msi;
mod registry;
mod state;
mod timer;
mod traits;

pub use config::{BoardDataConfig, ControlParams};
pub use device::Device;
pub use error::{LifecycleError, Result};
pub use events::{CalStatus, LifecycleEvent, RecoveryReason};
pub use family::DeviceFamily;
pub use msi::{MsiAssignment, MsiRange, MsiUser};
pub use registry::{DeviceHandle, Registry};
pub use state::{DriverState, Quirks};
pub use traits::{
    BoardDataKind, ClientError, DriverStatus, FirmwareMessenger, FwMode, MessengerError,
    WirelessDriver,
};
