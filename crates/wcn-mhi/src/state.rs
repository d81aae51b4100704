use bitflags::bitflags;

bitflags! {
    /// Bus power phases, as independent bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MhiState: u32 {
        /// Bus controller is prepared for power-up.
        const INIT = 1 << 0;
        /// Execution environment is running.
        const POWER_ON = 1 << 1;
        /// Bus is suspended (POWER_ON stays set while suspended).
        const SUSPEND = 1 << 2;
        /// A forced RAM-dump mode entry has been requested.
        const TRIGGER_RDDM = 1 << 3;
        /// RAM-dump contents have been pulled into host memory.
        const RDDM_DONE = 1 << 4;
    }
}

/// A requested bus power transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MhiTransition {
    Init,
    Deinit,
    PowerOn,
    PowerOff,
    ForcePowerOff,
    Suspend,
    Resume,
    TriggerRddm,
    RddmDone,
}

impl MhiTransition {
    /// Whether the transition is legal from `state`.
    ///
    /// This is the authoritative legality table; a failed precondition is
    /// rejected, never coerced.
    pub fn is_legal(self, state: MhiState) -> bool {
        match self {
            MhiTransition::Init => !state.contains(MhiState::INIT),
            MhiTransition::Deinit => state.contains(MhiState::INIT),
            MhiTransition::PowerOn => {
                state.contains(MhiState::INIT) && !state.contains(MhiState::POWER_ON)
            }
            MhiTransition::Suspend => {
                state.contains(MhiState::POWER_ON) && !state.contains(MhiState::SUSPEND)
            }
            MhiTransition::Resume => state.contains(MhiState::SUSPEND),
            MhiTransition::TriggerRddm => {
                state.contains(MhiState::POWER_ON) && !state.contains(MhiState::TRIGGER_RDDM)
            }
            MhiTransition::PowerOff | MhiTransition::ForcePowerOff => true,
            MhiTransition::RddmDone => true,
        }
    }

    /// The state produced by applying the transition. Only meaningful after
    /// [`MhiTransition::is_legal`] has passed and the hardware confirmed.
    pub fn apply(self, state: MhiState) -> MhiState {
        let mut next = state;
        match self {
            MhiTransition::Init => next.insert(MhiState::INIT),
            MhiTransition::Deinit => next.remove(MhiState::INIT),
            MhiTransition::PowerOn => next.insert(MhiState::POWER_ON),
            MhiTransition::PowerOff | MhiTransition::ForcePowerOff => {
                next.remove(MhiState::POWER_ON | MhiState::TRIGGER_RDDM | MhiState::RDDM_DONE);
            }
            MhiTransition::Suspend => next.insert(MhiState::SUSPEND),
            MhiTransition::Resume => next.remove(MhiState::SUSPEND),
            MhiTransition::TriggerRddm => next.insert(MhiState::TRIGGER_RDDM),
            MhiTransition::RddmDone => next.insert(MhiState::RDDM_DONE),
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_TRANSITIONS: [MhiTransition; 9] = [
        MhiTransition::Init,
        MhiTransition::Deinit,
        MhiTransition::PowerOn,
        MhiTransition::PowerOff,
        MhiTransition::ForcePowerOff,
        MhiTransition::Suspend,
        MhiTransition::Resume,
        MhiTransition::TriggerRddm,
        MhiTransition::RddmDone,
    ];

    /// Reference predicate spelled straight from the legality table.
    fn table_says_legal(t: MhiTransition, s: MhiState) -> bool {
        let init = s.contains(MhiState::INIT);
        let on = s.contains(MhiState::POWER_ON);
        let susp = s.contains(MhiState::SUSPEND);
        let rddm = s.contains(MhiState::TRIGGER_RDDM);
        match t {
            MhiTransition::Init => !init,
            MhiTransition::Deinit => init,
            MhiTransition::PowerOn => init && !on,
            MhiTransition::Suspend => on && !susp,
            MhiTransition::Resume => susp,
            MhiTransition::TriggerRddm => on && !rddm,
            MhiTransition::PowerOff | MhiTransition::ForcePowerOff | MhiTransition::RddmDone => {
                true
            }
        }
    }

    proptest! {
        #[test]
        fn legality_matches_the_table_for_every_bitmask(bits in 0u32..32) {
            let state = MhiState::from_bits_truncate(bits);
            for t in ALL_TRANSITIONS {
                prop_assert_eq!(t.is_legal(state), table_says_legal(t, state));
            }
        }

        #[test]
        fn power_off_clears_all_crash_bits(bits in 0u32..32) {
            let state = MhiState::from_bits_truncate(bits);
            for t in [MhiTransition::PowerOff, MhiTransition::ForcePowerOff] {
                let next = t.apply(state);
                prop_assert!(!next.contains(MhiState::POWER_ON));
                prop_assert!(!next.contains(MhiState::TRIGGER_RDDM));
                prop_assert!(!next.contains(MhiState::RDDM_DONE));
                // Suspend/init bookkeeping is untouched.
                prop_assert_eq!(next.contains(MhiState::INIT), state.contains(MhiState::INIT));
            }
        }
    }

    #[test]
    fn boot_sequence_walks_init_then_power_on() {
        let s0 = MhiState::default();
        assert!(MhiTransition::Init.is_legal(s0));
        let s1 = MhiTransition::Init.apply(s0);
        assert!(!MhiTransition::Init.is_legal(s1));
        assert!(MhiTransition::PowerOn.is_legal(s1));
        let s2 = MhiTransition::PowerOn.apply(s1);
        assert_eq!(s2, MhiState::INIT | MhiState::POWER_ON);
    }

    #[test]
    fn suspend_keeps_power_on_set() {
        let s = MhiTransition::Suspend.apply(MhiState::INIT | MhiState::POWER_ON);
        assert!(s.contains(MhiState::POWER_ON));
        assert!(s.contains(MhiState::SUSPEND));
        assert!(!MhiTransition::Suspend.is_legal(s));
        assert!(MhiTransition::Resume.is_legal(s));
    }
}
