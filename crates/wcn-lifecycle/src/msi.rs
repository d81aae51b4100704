/// Named consumers of the device's MSI vector budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsiUser {
    /// MHI control and bus events.
    Mhi,
    /// Copy-engine interrupts.
    Ce,
    /// Data-plane rings.
    Dp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsiRange {
    pub num_vectors: u32,
    pub base_vector: u32,
}

const MHI_VECTORS: (u32, u32, u32) = (3, 3, 3); // min, max, default
const CE_VECTORS: (u32, u32, u32) = (1, 5, 1);
const DP_VECTORS: (u32, u32, u32) = (1, 8, 1);

const MHI_OVERRIDE_SHIFT: u32 = 0;
const CE_OVERRIDE_SHIFT: u32 = 8;
const DP_OVERRIDE_SHIFT: u32 = 16;

/// Immutable per-device MSI vector assignment, computed once at bus enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsiAssignment {
    total_vectors: u32,
    mhi: MsiRange,
    ce: MsiRange,
    dp: MsiRange,
}

impl MsiAssignment {
    /// The static table for a full 16-vector slot.
    pub fn standard() -> Self {
        Self {
            total_vectors: 16,
            mhi: MsiRange {
                num_vectors: 3,
                base_vector: 0,
            },
            ce: MsiRange {
                num_vectors: 5,
                base_vector: 3,
            },
            dp: MsiRange {
                num_vectors: 8,
                base_vector: 8,
            },
        }
    }

    /// Applies a packed per-user override (one byte per user, MHI low).
    /// Out-of-range counts fall back to the user's default; ranges stay
    /// contiguous in table order. Zero means no override.
    pub fn from_override(packed: u32) -> Self {
        if packed == 0 {
            return Self::standard();
        }

        let clamp = |count: u32, (min, max, default): (u32, u32, u32)| {
            if count < min || count > max {
                default
            } else {
                count
            }
        };

        let mhi = clamp((packed >> MHI_OVERRIDE_SHIFT) & 0xFF, MHI_VECTORS);
        let ce = clamp((packed >> CE_OVERRIDE_SHIFT) & 0xFF, CE_VECTORS);
        let dp = clamp((packed >> DP_OVERRIDE_SHIFT) & 0xFF, DP_VECTORS);

        Self {
            total_vectors: mhi + ce + dp,
            mhi: MsiRange {
                num_vectors: mhi,
                base_vector: 0,
            },
            ce: MsiRange {
                num_vectors: ce,
                base_vector: mhi,
            },
            dp: MsiRange {
                num_vectors: dp,
                base_vector: mhi + ce,
            },
        }
    }

    pub fn total_vectors(&self) -> u32 {
        self.total_vectors
    }

    pub fn user(&self, user: MsiUser) -> MsiRange {
        match user {
            MsiUser::Mhi => self.mhi,
            MsiUser::Ce => self.ce,
            MsiUser::Dp => self.dp,
        }
    }

    /// The last control vector doubles as the wake interrupt.
    pub fn wake_vector(&self) -> u32 {
        self.mhi.base_vector + self.mhi.num_vectors - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_matches_the_slot_layout() {
        let msi = MsiAssignment::standard();
        assert_eq!(msi.total_vectors(), 16);
        assert_eq!(
            msi.user(MsiUser::Mhi),
            MsiRange {
                num_vectors: 3,
                base_vector: 0
            }
        );
        assert_eq!(
            msi.user(MsiUser::Ce),
            MsiRange {
                num_vectors: 5,
                base_vector: 3
            }
        );
        assert_eq!(
            msi.user(MsiUser::Dp),
            MsiRange {
                num_vectors: 8,
                base_vector: 8
            }
        );
        assert_eq!(msi.wake_vector(), 2);
    }

    #[test]
    fn override_assigns_contiguous_ranges() {
        // 3 MHI, 5 CE, 8 DP packed low to high.
        let msi = MsiAssignment::from_override(0x08_05_03);
        assert_eq!(msi.total_vectors(), 16);
        assert_eq!(msi.user(MsiUser::Ce).base_vector, 3);
        assert_eq!(msi.user(MsiUser::Dp).base_vector, 8);

        let small = MsiAssignment::from_override(0x02_01_03);
        assert_eq!(small.total_vectors(), 6);
        assert_eq!(small.user(MsiUser::Dp).base_vector, 4);
        assert_eq!(small.user(MsiUser::Dp).num_vectors, 2);
    }

    #[test]
    fn out_of_range_counts_fall_back_to_defaults() {
        // MHI byte of 9 is illegal (fixed at 3), CE byte of 0 is below min.
        let msi = MsiAssignment::from_override(0x0F_00_09);
        assert_eq!(msi.user(MsiUser::Mhi).num_vectors, 3);
        assert_eq!(msi.user(MsiUser::Ce).num_vectors, 1);
        // DP byte of 0x0F exceeds 8, falls back to 1.
        assert_eq!(msi.user(MsiUser::Dp).num_vectors, 1);
        assert_eq!(msi.total_vectors(), 5);
    }
}
