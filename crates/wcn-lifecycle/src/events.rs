use std::fmt;
use std::sync::Arc;

use wcn_dump::FwMemSegment;

use crate::traits::WirelessDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    /// A fatal error without further qualification.
    Default,
    LinkDown,
    /// The device entered its RAM-dump execution environment.
    Rddm,
    /// A boot or RAM-dump deadline expired.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalStatus {
    Done,
    Timeout,
}

/// Everything the lifecycle worker serializes. Producers enqueue; only the
/// worker mutates lifecycle state.
pub enum LifecycleEvent {
    /// The firmware message server came up.
    ServerArrive,
    ServerExit,
    /// The firmware requested boot-time memory regions.
    RequestMem(Vec<FwMemSegment>),
    FwMemReady,
    FwReady,
    CalStart,
    CalDone(CalStatus),
    RegisterDriver(Arc<dyn WirelessDriver>),
    UnregisterDriver,
    Recovery(RecoveryReason),
    ForceFwAssert,
    PowerUp,
    PowerDown,
    IdleRestart,
    IdleShutdown,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ServerArrive => "server arrive",
            LifecycleEvent::ServerExit => "server exit",
            LifecycleEvent::RequestMem(_) => "request memory",
            LifecycleEvent::FwMemReady => "firmware memory ready",
            LifecycleEvent::FwReady => "firmware ready",
            LifecycleEvent::CalStart => "calibration start",
            LifecycleEvent::CalDone(_) => "calibration done",
            LifecycleEvent::RegisterDriver(_) => "register driver",
            LifecycleEvent::UnregisterDriver => "unregister driver",
            LifecycleEvent::Recovery(_) => "recovery",
            LifecycleEvent::ForceFwAssert => "force firmware assert",
            LifecycleEvent::PowerUp => "power up",
            LifecycleEvent::PowerDown => "power down",
            LifecycleEvent::IdleRestart => "idle restart",
            LifecycleEvent::IdleShutdown => "idle shutdown",
        }
    }
}

impl fmt::Debug for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::RequestMem(segments) => {
                write!(f, "RequestMem({} segments)", segments.len())
            }
            LifecycleEvent::CalDone(status) => write!(f, "CalDone({status:?})"),
            LifecycleEvent::Recovery(reason) => write!(f, "Recovery({reason:?})"),
            other => f.write_str(other.name()),
        }
    }
}
