use thiserror::Error;
use tracing::{debug, error, info};

use wcn_mhi::{BusError, MemRegion, MhiController, MhiState, MhiTransition};
use wcn_regs::LinkProbe;

/// What a dump segment holds, in the order the offline parser expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegmentKind {
    FwImage,
    Rddm,
    RemoteHeap,
    Pageable,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 4] = [
        SegmentKind::FwImage,
        SegmentKind::Rddm,
        SegmentKind::RemoteHeap,
        SegmentKind::Pageable,
    ];

    pub fn as_u32(self) -> u32 {
        match self {
            SegmentKind::FwImage => 0,
            SegmentKind::Rddm => 1,
            SegmentKind::RemoteHeap => 2,
            SegmentKind::Pageable => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpSegment {
    pub kind: SegmentKind,
    pub phys_addr: u64,
    pub host_va: u64,
    pub len: u64,
}

/// Kind of a memory region loaned to the firmware at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwMemKind {
    Ddr,
    M3,
    Cal,
    Pageable,
}

/// A region from the firmware memory list, eligible for dump collection.
#[derive(Debug, Clone, Copy)]
pub struct FwMemSegment {
    pub kind: FwMemKind,
    pub region: MemRegion,
}

/// The collected segment table. Entries are append-only; `valid` flips true
/// once collection produced at least one entry and flips back only on
/// explicit consumption or the next power-up.
#[derive(Debug, Default)]
pub struct DumpInfo {
    entries: Vec<DumpSegment>,
    valid: bool,
}

impl DumpInfo {
    pub fn entries(&self) -> &[DumpSegment] {
        &self.entries
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn push(&mut self, seg: DumpSegment) {
        debug!(
            kind = ?seg.kind,
            phys_addr = format_args!("{:#x}", seg.phys_addr),
            len = seg.len,
            "collected dump segment"
        );
        self.entries.push(seg);
    }

    /// Discards the dump. Callers invoke this strictly after the contents
    /// have been consumed, or from the re-power path for a stale dump.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.valid = false;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DumpError {
    #[error("link is down, cannot pull dump")]
    LinkDown,
    #[error("failed to download RAM-dump images: {0}")]
    Download(BusError),
}

/// Pulls crash dumps out of the device, exactly once per crash.
#[derive(Debug, Default)]
pub struct DumpCollector;

impl DumpCollector {
    /// Collects the dump into `dump`. Returns `false` without touching
    /// anything when this crash was already collected (the RDDM-done bit is
    /// set). On success the RDDM-done bit is set so a second notification for
    /// the same crash is a no-op.
    pub fn collect(
        &self,
        mhi: &mut MhiController,
        link: &dyn LinkProbe,
        fw_mem: &[FwMemSegment],
        dump: &mut DumpInfo,
        in_panic: bool,
    ) -> Result<bool, DumpError> {
        if mhi.state().contains(MhiState::RDDM_DONE) {
            debug!("RAM dump already collected, skipping");
            return Ok(false);
        }
        if !link.is_accessible() {
            return Err(DumpError::LinkDown);
        }

        let images = mhi
            .bus_mut()
            .download_rddm(in_panic)
            .map_err(DumpError::Download)?;

        for region in &images.fw_image {
            dump.push(segment(SegmentKind::FwImage, region));
        }
        for region in &images.rddm_image {
            dump.push(segment(SegmentKind::Rddm, region));
        }
        for mem in fw_mem {
            // Zero physical address means the region was never allocated.
            if mem.region.phys_addr == 0 {
                continue;
            }
            let kind = match mem.kind {
                FwMemKind::Ddr | FwMemKind::M3 | FwMemKind::Cal => SegmentKind::RemoteHeap,
                FwMemKind::Pageable => SegmentKind::Pageable,
            };
            dump.push(segment(kind, &mem.region));
        }

        if dump.entries.is_empty() {
            error!("dump collection produced no segments");
        } else {
            dump.valid = true;
            info!(entries = dump.entries.len(), "crash dump collected");
        }

        let _ = mhi.request(MhiTransition::RddmDone);
        Ok(true)
    }
}

fn segment(kind: SegmentKind, region: &MemRegion) -> DumpSegment {
    DumpSegment {
        kind,
        phys_addr: region.phys_addr,
        host_va: region.host_va,
        len: region.len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wcn_mhi::{MhiBus, RddmImages};

    struct Up;
    impl LinkProbe for Up {
        fn is_accessible(&self) -> bool {
            true
        }
    }

    struct CrashedBus {
        downloads: std::cell::Cell<usize>,
    }

    impl MhiBus for CrashedBus {
        fn init(&mut self) -> Result<(), BusError> {
            Ok(())
        }
        fn deinit(&mut self) {}
        fn power_up(&mut self) -> Result<(), BusError> {
            Ok(())
        }
        fn power_down(&mut self, _graceful: bool) {}
        fn suspend(&mut self, _fast: bool) -> Result<(), BusError> {
            Ok(())
        }
        fn resume(&mut self, _fast: bool) -> Result<(), BusError> {
            Ok(())
        }
        fn trigger_rddm(&mut self) -> Result<(), BusError> {
            Ok(())
        }
        fn download_rddm(&mut self, _in_panic: bool) -> Result<RddmImages, BusError> {
            self.downloads.set(self.downloads.get() + 1);
            Ok(RddmImages {
                fw_image: vec![MemRegion {
                    phys_addr: 0x1000,
                    host_va: 0xA000,
                    len: 0x800,
                }],
                rddm_image: vec![MemRegion {
                    phys_addr: 0x2000,
                    host_va: 0xB000,
                    len: 0x400,
                }],
            })
        }
    }

    fn crashed_mhi() -> MhiController {
        let mut mhi = MhiController::new(Box::new(CrashedBus {
            downloads: std::cell::Cell::new(0),
        }));
        mhi.start().unwrap();
        mhi
    }

    #[test]
    fn second_collection_for_the_same_crash_is_skipped() {
        let mut mhi = crashed_mhi();
        let mut dump = DumpInfo::default();
        let collector = DumpCollector;

        assert!(collector
            .collect(&mut mhi, &Up, &[], &mut dump, false)
            .unwrap());
        let first_len = dump.entries().len();
        assert!(dump.is_valid());
        assert!(mhi.state().contains(MhiState::RDDM_DONE));

        assert!(!collector
            .collect(&mut mhi, &Up, &[], &mut dump, false)
            .unwrap());
        assert_eq!(dump.entries().len(), first_len);
    }

    #[test]
    fn unallocated_fw_mem_regions_are_not_collected() {
        let mut mhi = crashed_mhi();
        let mut dump = DumpInfo::default();
        let fw_mem = [
            FwMemSegment {
                kind: FwMemKind::Ddr,
                region: MemRegion {
                    phys_addr: 0x9000,
                    host_va: 0xC000,
                    len: 0x100,
                },
            },
            FwMemSegment {
                kind: FwMemKind::M3,
                region: MemRegion {
                    phys_addr: 0,
                    host_va: 0,
                    len: 0x100,
                },
            },
        ];

        DumpCollector
            .collect(&mut mhi, &Up, &fw_mem, &mut dump, false)
            .unwrap();
        let heap: Vec<_> = dump
            .entries()
            .iter()
            .filter(|s| s.kind == SegmentKind::RemoteHeap)
            .collect();
        assert_eq!(heap.len(), 1);
        assert_eq!(heap[0].phys_addr, 0x9000);
    }

    #[test]
    fn dead_link_aborts_collection() {
        struct DownLink;
        impl LinkProbe for DownLink {
            fn is_accessible(&self) -> bool {
                false
            }
        }

        let mut mhi = crashed_mhi();
        let mut dump = DumpInfo::default();
        let err = DumpCollector
            .collect(&mut mhi, &DownLink, &[], &mut dump, false)
            .unwrap_err();
        assert_eq!(err, DumpError::LinkDown);
        assert!(!dump.is_valid());
        assert!(!mhi.state().contains(MhiState::RDDM_DONE));
    }
}
