use thiserror::Error;

use wcn_dump::FwMemSegment;

/// Status pushes delivered to the client driver outside the normal callback
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// The firmware is dead; the client must stop submitting work.
    FwDown,
    /// A recovery restart is in progress.
    Recovery,
}

/// Operating modes the firmware can be asked to enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwMode {
    Mission,
    Calibration,
    Off,
}

/// Board-data blobs the firmware may request at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardDataKind {
    Bdf,
    Caldata,
    Hds,
    Regdb,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The client cannot act right now; the caller may retry later.
    #[error("client driver is busy")]
    Busy,
    #[error("client driver failure: {0}")]
    Failed(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessengerError {
    #[error("firmware message timed out")]
    Timeout,
    #[error("firmware messenger failure: {0}")]
    Failed(&'static str),
}

/// The registered wireless client driver.
///
/// Exactly one callback fires per lifecycle transition and callbacks are never
/// re-entrant; all of them run on the lifecycle worker thread.
pub trait WirelessDriver: Send + Sync {
    fn probe(&self) -> Result<(), ClientError>;
    fn remove(&self);
    /// Re-attach after a recovery restart of an already probed device.
    fn reinit(&self) -> Result<(), ClientError>;
    fn idle_restart(&self) -> Result<(), ClientError>;
    /// May return [`ClientError::Busy`] to veto the shutdown.
    fn idle_shutdown(&self) -> Result<(), ClientError>;
    /// Quiesce without touching the (possibly dead) hardware.
    fn crash_shutdown(&self);
    fn update_status(&self, status: DriverStatus);
    fn modem_status(&self, _up: bool) {}
}

/// Control-message channel to the firmware (the QMI transport lives behind
/// this seam; wire encoding is the embedder's concern).
pub trait FirmwareMessenger: Send + Sync {
    /// Answers the firmware's boot-time memory request.
    fn respond_memory(&self, segments: &[FwMemSegment]) -> Result<(), MessengerError>;
    fn send_target_capability(&self) -> Result<(), MessengerError>;
    fn download_board_data(&self, kind: BoardDataKind) -> Result<(), MessengerError>;
    /// Transfers the M3 runtime firmware image.
    fn send_m3(&self) -> Result<(), MessengerError>;
    fn send_mode(&self, mode: FwMode) -> Result<(), MessengerError>;
}
