use std::time::Duration;

use crate::state::Quirks;

/// Which optional board-data blobs this platform carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoardDataConfig {
    pub hds: bool,
    pub regdb: bool,
    pub caldata: bool,
}

/// Tunables for one attached device. Plain data; embedders override fields
/// before attach.
#[derive(Debug, Clone)]
pub struct ControlParams {
    pub quirks: Quirks,
    /// Budget for the firmware-ready indication after MHI power-on.
    pub fw_boot_timeout: Duration,
    /// Budget for the RAM-dump-entered notification after a system error.
    pub rddm_timeout: Duration,
    /// Budget callers wait for an in-flight recovery to finish.
    pub recovery_timeout: Duration,
    /// Budget for cold boot calibration end to end.
    pub cal_timeout: Duration,
    pub board_data: BoardDataConfig,
    /// Packed per-user MSI vector counts; 0 keeps the static table.
    pub msi_override: u32,
}

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            quirks: Quirks::empty(),
            fw_boot_timeout: Duration::from_secs(10),
            rddm_timeout: Duration::from_secs(5),
            recovery_timeout: Duration::from_secs(60),
            cal_timeout: Duration::from_secs(170),
            board_data: BoardDataConfig::default(),
            msi_override: 0,
        }
    }
}
