//! Crash-dump collection for the wireless co-processor.
//!
//! When the device drops into its RAM-dump execution environment the host
//! pulls the firmware image, the RAM-dump image, and the remote-heap regions
//! it loaned the firmware into a typed segment table. Collection is
//! exactly-once per crash; the dump stays valid until an upload consumes it or
//! the next power-up discards it, and shutdown is expected to defer while it
//! is valid.

mod collect;
mod meta;

pub use collect::{DumpCollector, DumpError, DumpInfo, DumpSegment, FwMemKind, FwMemSegment, SegmentKind};
pub use meta::{DumpEntryRange, DumpMetaInfo, DUMP_MAGIC, DUMP_VERSION};
