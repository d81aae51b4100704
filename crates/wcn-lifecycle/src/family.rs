use wcn_dump::DUMP_VERSION;

/// Capabilities of one device generation, chosen once at attach.
///
/// All generation-specific dispatch flows through this table instead of
/// device-id matches scattered through the handlers.
#[derive(Debug, Clone, Copy)]
pub struct DeviceFamily {
    pub name: &'static str,
    /// Chipset identifier stamped into dump headers.
    pub chipset: u32,
    /// Device boots over the MHI side-band bus.
    pub has_mhi: bool,
    pub supports_time_sync: bool,
    /// Every recovery is a bare power-cycle; no dump, no fatal notification.
    pub supports_self_recovery: bool,
    pub supports_force_assert: bool,
    pub dump_format_version: u32,
}

impl DeviceFamily {
    /// The legacy generation: no side-band bus, recovers by power-cycling.
    pub const fn legacy() -> Self {
        Self {
            name: "wcn-legacy",
            chipset: 0x003E,
            has_mhi: false,
            supports_time_sync: false,
            supports_self_recovery: true,
            supports_force_assert: false,
            dump_format_version: 0,
        }
    }

    /// The current generation with MHI boot and RAM-dump support.
    pub const fn modern() -> Self {
        Self {
            name: "wcn-modern",
            chipset: 0x1101,
            has_mhi: true,
            supports_time_sync: true,
            supports_self_recovery: false,
            supports_force_assert: true,
            dump_format_version: DUMP_VERSION,
        }
    }
}
