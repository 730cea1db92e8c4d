#![doc = include_str!("../README.md")]
// Declare modules
pub mod block;
pub mod chunkenc;
pub mod chunks;
pub mod emit;
pub mod error;
pub mod index;
pub mod scan;
pub mod types;

/// Read and build access to one storage block.
pub use crate::block::{Block, BlockBuilder, BlockMeta};
/// Reusable decoder state carried across all chunks of a run.
pub use crate::chunkenc::{Compression, Decoder};
/// Chunk metadata and storage reader.
pub use crate::chunks::{ChunkMeta, ChunkReader, ChunkRef};
/// Newline-delimited JSON emitter for count records.
pub use crate::emit::JsonLineEmitter;
/// Error type for block scan operations.
pub use crate::error::ScanError;
/// Label index reader and series references.
pub use crate::index::{IndexReader, SeriesRef};
/// The block traversal engine and its collaborator seams.
pub use crate::scan::{scan_block, CountSink, TimeRange};
/// Core sample and label types.
pub use crate::types::{Label, Labels, Sample, Timestamp, Value, METRIC_NAME_LABEL};
