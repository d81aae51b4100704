use bitflags::bitflags;

bitflags! {
    /// Lifecycle phases of one attached device, as independent bits.
    ///
    /// At most one of the transition bits (`LOADING`, `UNLOADING`,
    /// `IDLE_RESTART`, `IDLE_SHUTDOWN`) may be set at a time; `RECOVERY` may
    /// coexist with exactly one of them. [`DriverState::begin_transition`]
    /// enforces this.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriverState: u32 {
        const FW_MEM_READY = 1 << 0;
        const FW_READY = 1 << 1;
        const COLD_BOOT_CAL = 1 << 2;
        const LOADING = 1 << 3;
        const UNLOADING = 1 << 4;
        const IDLE_RESTART = 1 << 5;
        const IDLE_SHUTDOWN = 1 << 6;
        const PROBED = 1 << 7;
        const RECOVERY = 1 << 8;
        /// Firmware crashed before it ever became ready.
        const FW_BOOT_RECOVERY = 1 << 9;
        /// The device reported a fatal error; the client may have been told.
        const DEV_ERR_NOTIFIED = 1 << 10;
        /// Debug hook: suppress client probe/remove callbacks.
        const DRIVER_DEBUG = 1 << 11;
        const IN_SUSPEND_RESUME = 1 << 12;

        const TRANSITION = Self::LOADING.bits()
            | Self::UNLOADING.bits()
            | Self::IDLE_RESTART.bits()
            | Self::IDLE_SHUTDOWN.bits();
    }
}

impl DriverState {
    /// Sets `bit` if no other transition is in flight. On conflict the state
    /// is untouched and the active transition bits are returned.
    pub fn begin_transition(&mut self, bit: DriverState) -> Result<(), DriverState> {
        let active = *self & Self::TRANSITION;
        if !active.is_empty() && active != bit {
            return Err(active);
        }
        self.insert(bit);
        Ok(())
    }
}

bitflags! {
    /// Debug and platform quirks consumed by the lifecycle paths.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Quirks: u32 {
        /// Recover a dead link by power-cycling instead of a full recovery.
        const LINK_DOWN_SELF_RECOVERY = 1 << 0;
        /// Count and log faults but never restart the device.
        const SKIP_RECOVERY = 1 << 1;
        /// Firmware image is already resident; skip the M3 transfer.
        const FBC_BYPASS = 1 << 2;
        /// Treat a dead link as unrecoverable and log it as fatal.
        const LINK_DOWN_PANIC = 1 << 3;
        /// Boot only the core firmware; no client handoff after power-up.
        const USE_CORE_ONLY_FW = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_transition_at_a_time() {
        let mut state = DriverState::default();
        state.begin_transition(DriverState::LOADING).unwrap();
        assert_eq!(
            state.begin_transition(DriverState::IDLE_SHUTDOWN),
            Err(DriverState::LOADING)
        );
        assert!(state.contains(DriverState::LOADING));
        assert!(!state.contains(DriverState::IDLE_SHUTDOWN));
    }

    #[test]
    fn reasserting_the_same_transition_is_fine() {
        let mut state = DriverState::UNLOADING | DriverState::RECOVERY;
        state.begin_transition(DriverState::UNLOADING).unwrap();
        assert!(state.contains(DriverState::UNLOADING));
    }

    #[test]
    fn recovery_does_not_block_a_transition() {
        let mut state = DriverState::RECOVERY | DriverState::PROBED;
        state.begin_transition(DriverState::IDLE_RESTART).unwrap();
        assert!(state.contains(DriverState::IDLE_RESTART));
    }
}
