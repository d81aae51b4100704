use thiserror::Error;
use tracing::{debug, error};

use crate::state::{MhiState, MhiTransition};

/// A contiguous region of device memory mirrored into host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegion {
    pub phys_addr: u64,
    pub host_va: u64,
    pub len: u64,
}

/// Firmware and RAM-dump images pulled from the device after it entered the
/// RAM-dump execution environment.
#[derive(Debug, Clone, Default)]
pub struct RddmImages {
    pub fw_image: Vec<MemRegion>,
    pub rddm_image: Vec<MemRegion>,
}

/// Status notifications delivered by the bus controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MhiStatus {
    Idle,
    EnteredRddm,
    SysError,
    FatalError,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus operation timed out")]
    Timeout,
    #[error("bus failure: {0}")]
    Failed(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MhiError {
    /// Precondition of the legality table failed. Recoverable; the request is
    /// rejected and the state is untouched.
    #[error("cannot apply MHI transition {requested:?} in current state {state:?}")]
    InvalidTransition {
        requested: MhiTransition,
        state: MhiState,
    },
    /// The hardware call behind a legal transition failed; the state bit was
    /// not set.
    #[error("MHI bus rejected {requested:?}: {source}")]
    Bus {
        requested: MhiTransition,
        source: BusError,
    },
}

/// The side-band bus controller, as provided by the platform.
pub trait MhiBus: Send {
    fn init(&mut self) -> Result<(), BusError>;
    fn deinit(&mut self);
    fn power_up(&mut self) -> Result<(), BusError>;
    fn power_down(&mut self, graceful: bool);
    fn suspend(&mut self, fast: bool) -> Result<(), BusError>;
    fn resume(&mut self, fast: bool) -> Result<(), BusError>;
    fn trigger_rddm(&mut self) -> Result<(), BusError>;
    /// Pulls the firmware/RAM-dump images into host memory.
    fn download_rddm(&mut self, in_panic: bool) -> Result<RddmImages, BusError>;
}

/// Tracks [`MhiState`] and drives the bus controller through legal
/// transitions.
pub struct MhiController {
    bus: Box<dyn MhiBus>,
    state: MhiState,
    /// Use the fast suspend/resume path (low-latency link handoff negotiated
    /// with the platform).
    fast_pm: bool,
}

impl MhiController {
    pub fn new(bus: Box<dyn MhiBus>) -> Self {
        Self {
            bus,
            state: MhiState::default(),
            fast_pm: false,
        }
    }

    pub fn state(&self) -> MhiState {
        self.state
    }

    pub fn set_fast_pm(&mut self, fast: bool) {
        self.fast_pm = fast;
    }

    pub fn bus_mut(&mut self) -> &mut dyn MhiBus {
        self.bus.as_mut()
    }

    /// Requests a transition: legality check, hardware call, then bit update.
    pub fn request(&mut self, transition: MhiTransition) -> Result<(), MhiError> {
        if !transition.is_legal(self.state) {
            error!(
                ?transition,
                state = ?self.state,
                "rejecting illegal MHI transition"
            );
            return Err(MhiError::InvalidTransition {
                requested: transition,
                state: self.state,
            });
        }

        debug!(?transition, state = ?self.state, "applying MHI transition");

        let result = match transition {
            MhiTransition::Init => self.bus.init(),
            MhiTransition::Deinit => {
                self.bus.deinit();
                Ok(())
            }
            MhiTransition::PowerOn => self.bus.power_up(),
            MhiTransition::PowerOff => {
                self.bus.power_down(true);
                Ok(())
            }
            MhiTransition::ForcePowerOff => {
                self.bus.power_down(false);
                Ok(())
            }
            MhiTransition::Suspend => self.bus.suspend(self.fast_pm),
            MhiTransition::Resume => self.bus.resume(self.fast_pm),
            MhiTransition::TriggerRddm => self.bus.trigger_rddm(),
            // Pure bookkeeping; the dump collector already holds the data.
            MhiTransition::RddmDone => Ok(()),
        };

        match result {
            Ok(()) => {
                self.state = transition.apply(self.state);
                Ok(())
            }
            Err(source) => {
                error!(?transition, %source, "MHI hardware call failed; state unchanged");
                Err(MhiError::Bus {
                    requested: transition,
                    source,
                })
            }
        }
    }

    /// Prepares the bus and powers the execution environment up.
    pub fn start(&mut self) -> Result<(), MhiError> {
        self.request(MhiTransition::Init)?;
        self.request(MhiTransition::PowerOn)?;
        Ok(())
    }

    /// Powers the execution environment off.
    ///
    /// A lingering suspend bit is dropped first so the power-off precondition
    /// reflects reality, and a dead link forces the non-graceful path (the
    /// device cannot acknowledge channel teardown over a downed link).
    pub fn power_off_sequence(&mut self, link_down: bool) {
        self.state.remove(MhiState::SUSPEND);
        let transition = if link_down {
            MhiTransition::ForcePowerOff
        } else {
            MhiTransition::PowerOff
        };
        if let Err(err) = self.request(transition) {
            debug!(%err, "MHI power-off skipped");
        }
    }

    /// Marks the RAM-dump contents as pulled. Always legal.
    pub fn mark_rddm_done(&mut self) {
        self.state = MhiTransition::RddmDone.apply(self.state);
    }

    pub fn deinit_sequence(&mut self) {
        if let Err(err) = self.request(MhiTransition::Deinit) {
            debug!(%err, "MHI deinit skipped");
        }
    }
}
