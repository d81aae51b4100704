use thiserror::Error;

use wcn_dump::DumpError;
use wcn_events::PostError;
use wcn_link::LinkError;
use wcn_mhi::MhiError;

use crate::state::DriverState;
use crate::traits::{ClientError, MessengerError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot {requested} in driver state {state:?}")]
    InvalidTransition {
        requested: &'static str,
        state: DriverState,
    },
    #[error("timed out waiting for {0}")]
    HardwareTimeout(&'static str),
    #[error("{0} is unavailable")]
    ResourceUnavailable(&'static str),
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    #[error("no device registered under this handle")]
    NotFound,
    #[error("PCI link is down")]
    LinkDown,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Mhi(#[from] MhiError),
    #[error(transparent)]
    Dump(#[from] DumpError),
    #[error("client callback failed: {0}")]
    Client(#[from] ClientError),
    #[error("firmware messenger failed: {0}")]
    Messenger(#[from] MessengerError),
    #[error(transparent)]
    Post(#[from] PostError),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
