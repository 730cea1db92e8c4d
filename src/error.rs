use crate::chunkenc::ChunkError;
use crate::chunks::ChunkRef;
use crate::index::SeriesRef;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for block scan operations.
///
/// Every variant names the traversal stage that produced it. There is
/// no local recovery anywhere in the read path: the first error aborts
/// the whole run and propagates to the caller unchanged.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("open {target} at {path}: {source}")]
    Open {
        target: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt {target}: {details}")]
    Corrupt {
        target: &'static str,
        details: String,
    },

    #[error("block meta: {0}")]
    Meta(String),

    #[error("postings: {0}")]
    Postings(String),

    #[error("series lookup at {reference}: {details}")]
    SeriesLookup {
        reference: SeriesRef,
        details: String,
    },

    #[error("chunk lookup at {reference}: {details}")]
    ChunkLookup {
        reference: ChunkRef,
        details: String,
    },

    #[error("chunk decode: {0}")]
    Decode(#[from] ChunkError),

    #[error("write output: {0}")]
    Output(#[source] std::io::Error),
}
