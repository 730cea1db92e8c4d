//! Block traversal: the full-corpus scan with a time predicate.
//!
//! Drives postings enumeration, series lookup, chunk resolution, and
//! sample decoding, counting the samples of every series that fall
//! within an inclusive timestamp range. Strictly sequential, one
//! series at a time; the first error at any stage aborts the run.

use crate::block::Block;
use crate::chunkenc::Decoder;
use crate::error::ScanError;
use crate::types::{Labels, Sample, Timestamp};

/// A closed timestamp interval, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub min_time: Timestamp,
    pub max_time: Timestamp,
}

impl TimeRange {
    pub const fn new(min_time: Timestamp, max_time: Timestamp) -> Self {
        Self { min_time, max_time }
    }

    #[inline]
    pub fn contains(&self, t: Timestamp) -> bool {
        self.min_time <= t && t <= self.max_time
    }
}

impl Default for TimeRange {
    /// The unrestricted inspection window: every stored sample counts.
    fn default() -> Self {
        Self::new(0, Timestamp::MAX)
    }
}

/// Receives one count record per series. Injected so callers decide
/// where records go (stdout, an in-memory collector in tests).
pub trait CountSink {
    fn emit(&mut self, labels: &Labels, value_count: u64) -> Result<(), ScanError>;
}

/// Scans every series of `block` in postings order and emits one
/// (label set, in-range sample count) record per series, including
/// series whose count is zero.
///
/// One decoder instance is carried across all chunks of the run. Both
/// readers are released on every exit path when they drop.
pub fn scan_block(
    block: &Block,
    range: TimeRange,
    sink: &mut dyn CountSink,
) -> Result<(), ScanError> {
    let index = block.index()?;
    let chunks = block.chunks()?;
    let mut decoder = Decoder::new();

    let mut num_series = 0u64;
    for entry in index.postings() {
        let series_ref = entry?;
        let (labels, chunk_metas) = index.series(series_ref)?;

        let mut value_count = 0u64;
        for meta in &chunk_metas {
            let chunk = chunks.chunk(meta.reference)?;
            let samples = decoder.iter(chunk)?;
            for sample in samples {
                let Sample { timestamp, .. } = sample?;
                if range.contains(timestamp) {
                    value_count += 1;
                }
            }
        }

        sink.emit(&labels, value_count)?;
        num_series += 1;
    }

    log::debug!(
        "scanned {} series of block {} in [{}, {}]",
        num_series,
        block.meta().ulid,
        range.min_time,
        range.max_time
    );
    Ok(())
}
