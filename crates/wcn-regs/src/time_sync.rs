use thiserror::Error;
use tracing::debug;

use crate::{RegError, RegisterWindow};

/// Global counter control/readback registers used for host/device time sync.
pub const GLOBAL_COUNTER_CTRL3: u32 = 0x1F4_0010; // count low
pub const GLOBAL_COUNTER_CTRL4: u32 = 0x1F4_0014; // count high
pub const GLOBAL_COUNTER_CTRL5: u32 = 0x1F4_0018; // latch control
pub const TIME_SYNC_CLEAR: u32 = 0x0;
pub const TIME_SYNC_ENABLE: u32 = 0x80;
/// Shadow register pair the firmware reads the host-time offset from.
pub const SHADOW_TIME_OFFSET_LO: u32 = 0x1E6_80A8;
pub const SHADOW_TIME_OFFSET_HI: u32 = 0x1E6_80AC;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeSyncError {
    #[error(transparent)]
    Reg(#[from] RegError),
    #[error("device time clock frequency is not configured")]
    NoClockFrequency,
    #[error("host time {host_us}us behind device time {device_us}us")]
    HostBehindDevice { host_us: u64, device_us: u64 },
}

/// Programs the host/device timestamp offset into the shadow registers so the
/// firmware can translate its clock domain into host microseconds.
pub struct TimeSync {
    device_freq_hz: u32,
}

impl TimeSync {
    pub fn new(device_freq_hz: u32) -> Self {
        Self { device_freq_hz }
    }

    /// Latches and reads the device global counter, in microseconds.
    pub fn device_time_us(&self, regs: &RegisterWindow) -> Result<u64, TimeSyncError> {
        if self.device_freq_hz == 0 {
            return Err(TimeSyncError::NoClockFrequency);
        }

        regs.write(GLOBAL_COUNTER_CTRL5, TIME_SYNC_CLEAR)?;
        regs.write(GLOBAL_COUNTER_CTRL5, TIME_SYNC_ENABLE)?;

        let low = regs.read(GLOBAL_COUNTER_CTRL3)?;
        let high = regs.read(GLOBAL_COUNTER_CTRL4)?;

        let ticks = (u64::from(high) << 32) | u64::from(low);
        // Divide by freq/100kHz first to keep precision at high tick counts.
        Ok(ticks / u64::from(self.device_freq_hz / 100_000) * 10)
    }

    /// Computes `host_time_us - device_time` and writes it to the shadow pair.
    pub fn update(&self, regs: &RegisterWindow, host_time_us: u64) -> Result<(), TimeSyncError> {
        let device_us = self.device_time_us(regs)?;
        if host_time_us < device_us {
            return Err(TimeSyncError::HostBehindDevice {
                host_us: host_time_us,
                device_us,
            });
        }

        let offset = host_time_us - device_us;
        debug!(host_time_us, device_us, offset, "updating time sync offset");

        regs.write(SHADOW_TIME_OFFSET_LO, offset as u32)?;
        regs.write(SHADOW_TIME_OFFSET_HI, (offset >> 32) as u32)?;
        Ok(())
    }
}
