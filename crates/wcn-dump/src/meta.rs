use crate::collect::{DumpInfo, SegmentKind};

/// "WLAN" in ASCII.
pub const DUMP_MAGIC: u32 = 0x574C_414E;
pub const DUMP_VERSION: u32 = 1;

/// Where a kind's segments sit within the flat entry table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpEntryRange {
    pub kind: u32,
    pub entry_start: u32,
    pub entry_num: u32,
}

/// Header prepended to an uploaded dump so an offline tool can reconstruct
/// the typed segments from the flat table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpMetaInfo {
    pub magic: u32,
    pub version: u32,
    pub chipset: u32,
    pub total_entries: u32,
    pub entries: [DumpEntryRange; SegmentKind::ALL.len()],
}

impl DumpMetaInfo {
    /// Builds the header from a collected dump. Segment order in the table is
    /// preserved; each kind's range starts at its first occurrence.
    pub fn from_dump(dump: &DumpInfo, chipset: u32) -> Self {
        let mut entries = [DumpEntryRange::default(); SegmentKind::ALL.len()];
        for (index, seg) in dump.entries().iter().enumerate() {
            let slot = &mut entries[seg.kind.as_u32() as usize];
            if slot.entry_num == 0 {
                slot.kind = seg.kind.as_u32();
                slot.entry_start = index as u32;
            }
            slot.entry_num += 1;
        }
        Self {
            magic: DUMP_MAGIC,
            version: DUMP_VERSION,
            chipset,
            total_entries: dump.entries().len() as u32,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::DumpSegment;

    fn seg(kind: SegmentKind) -> DumpSegment {
        DumpSegment {
            kind,
            phys_addr: 0x1000,
            host_va: 0x2000,
            len: 0x100,
        }
    }

    fn dump_with(kinds: &[SegmentKind]) -> DumpInfo {
        let mut dump = DumpInfo::default();
        for &k in kinds {
            dump.push(seg(k));
        }
        dump
    }

    #[test]
    fn ranges_cover_the_table_contiguously_per_kind() {
        let dump = dump_with(&[
            SegmentKind::FwImage,
            SegmentKind::FwImage,
            SegmentKind::Rddm,
            SegmentKind::RemoteHeap,
            SegmentKind::RemoteHeap,
            SegmentKind::RemoteHeap,
        ]);
        let meta = DumpMetaInfo::from_dump(&dump, 0x1101);

        assert_eq!(meta.magic, DUMP_MAGIC);
        assert_eq!(meta.total_entries, 6);
        let fw = meta.entries[SegmentKind::FwImage.as_u32() as usize];
        assert_eq!((fw.entry_start, fw.entry_num), (0, 2));
        let rddm = meta.entries[SegmentKind::Rddm.as_u32() as usize];
        assert_eq!((rddm.entry_start, rddm.entry_num), (2, 1));
        let heap = meta.entries[SegmentKind::RemoteHeap.as_u32() as usize];
        assert_eq!((heap.entry_start, heap.entry_num), (3, 3));
        let pageable = meta.entries[SegmentKind::Pageable.as_u32() as usize];
        assert_eq!(pageable.entry_num, 0);
    }

    #[test]
    fn empty_dump_yields_empty_header() {
        let meta = DumpMetaInfo::from_dump(&DumpInfo::default(), 0x1101);
        assert_eq!(meta.total_entries, 0);
        assert!(meta.entries.iter().all(|e| e.entry_num == 0));
    }
}
