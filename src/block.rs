//! Block access: directory layout, `meta.json`, and reader handles.

use crate::chunkenc::{ChunkBuilder, Compression};
use crate::chunks::{ChunkMeta, ChunkReader, ChunkWriter};
use crate::error::ScanError;
use crate::index::{IndexReader, IndexWriter};
use crate::types::{Labels, Sample, Timestamp};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const META_FILE: &str = "meta.json";
pub const INDEX_FILE: &str = "index";
pub const CHUNKS_FILE: &str = "chunks.dat";

const META_VERSION: u32 = 1;

/// Block metadata as stored in `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMeta {
    pub ulid: String,
    pub min_time: Timestamp,
    pub max_time: Timestamp,
    pub stats: BlockStats,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    pub num_samples: u64,
    pub num_series: u64,
    pub num_chunks: u64,
}

/// An immutable, closed set of series data for a fixed time span,
/// identified by a directory path. Hands out the index and chunk
/// readers; all access is read-only.
#[derive(Debug)]
pub struct Block {
    dir: PathBuf,
    meta: BlockMeta,
}

impl Block {
    pub fn open(dir: &Path) -> Result<Self, ScanError> {
        let open_err = |source| ScanError::Open {
            target: "block",
            path: dir.to_path_buf(),
            source,
        };
        let md = fs::metadata(dir).map_err(open_err)?;
        if !md.is_dir() {
            return Err(open_err(std::io::Error::other("not a directory")));
        }

        let meta_path = dir.join(META_FILE);
        let raw = fs::read(&meta_path).map_err(|source| ScanError::Open {
            target: "block meta",
            path: meta_path.clone(),
            source,
        })?;
        let meta: BlockMeta =
            serde_json::from_slice(&raw).map_err(|e| ScanError::Meta(e.to_string()))?;
        if meta.version != META_VERSION {
            return Err(ScanError::Meta(format!(
                "unsupported block version {}",
                meta.version
            )));
        }

        log::debug!(
            "opened block {} ({}..{}, {} series)",
            meta.ulid,
            meta.min_time,
            meta.max_time,
            meta.stats.num_series
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
        })
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Opens the block's label index. Must be released (dropped) when
    /// the run ends.
    pub fn index(&self) -> Result<IndexReader, ScanError> {
        IndexReader::open(&self.dir.join(INDEX_FILE))
    }

    /// Opens the block's chunk storage. Must be released (dropped) when
    /// the run ends.
    pub fn chunks(&self) -> Result<ChunkReader, ScanError> {
        ChunkReader::open(&self.dir.join(CHUNKS_FILE))
    }
}

/// Assembles a complete on-disk block (meta + index + chunks) from
/// in-memory series data. Used by tests and demos; the scan path never
/// writes.
#[derive(Debug)]
pub struct BlockBuilder {
    compression: Compression,
    ulid: String,
    series: Vec<(Labels, Vec<Vec<Sample>>)>,
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            compression: Compression::None,
            ulid: "00000000000000000000000000".to_string(),
            series: Vec::new(),
        }
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn ulid(mut self, ulid: impl Into<String>) -> Self {
        self.ulid = ulid.into();
        self
    }

    /// Adds one series with its chunks' samples. An empty chunk list is
    /// legal. Samples within each chunk must be strictly ascending.
    pub fn add_series(&mut self, labels: Labels, chunks: Vec<Vec<Sample>>) -> &mut Self {
        self.series.push((labels, chunks));
        self
    }

    /// Writes the block under `dir`. Series entries land in the index
    /// sorted by label set, which is also postings order.
    pub fn write(&self, dir: &Path) -> Result<BlockMeta, ScanError> {
        fs::create_dir_all(dir).map_err(|source| ScanError::Open {
            target: "block",
            path: dir.to_path_buf(),
            source,
        })?;

        let mut ordered: Vec<_> = self.series.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));

        let mut stats = BlockStats::default();
        let mut min_time = Timestamp::MAX;
        let mut max_time = Timestamp::MIN;

        let mut chunk_writer = ChunkWriter::create(&dir.join(CHUNKS_FILE))?;
        let mut index_writer = IndexWriter::new();
        for (labels, chunks) in ordered {
            let mut metas = Vec::with_capacity(chunks.len());
            for samples in chunks {
                let mut builder = ChunkBuilder::new();
                for s in samples {
                    builder.append(*s)?;
                }
                let built = builder.build(self.compression)?;
                let reference = chunk_writer.write(&built)?;
                metas.push(ChunkMeta {
                    reference,
                    min_time: built.min_time,
                    max_time: built.max_time,
                });

                stats.num_chunks += 1;
                stats.num_samples += u64::from(built.num_samples);
                min_time = min_time.min(built.min_time);
                max_time = max_time.max(built.max_time);
            }
            index_writer.add_series(labels, &metas);
            stats.num_series += 1;
        }
        chunk_writer.finish()?;
        index_writer.finish(&dir.join(INDEX_FILE))?;

        if stats.num_samples == 0 {
            min_time = 0;
            max_time = 0;
        }
        let meta = BlockMeta {
            ulid: self.ulid.clone(),
            min_time,
            max_time,
            stats,
            version: META_VERSION,
        };
        let meta_path = dir.join(META_FILE);
        let raw = serde_json::to_vec_pretty(&meta).map_err(|e| ScanError::Meta(e.to_string()))?;
        fs::write(&meta_path, raw).map_err(|source| ScanError::Open {
            target: "block meta",
            path: meta_path,
            source,
        })?;
        Ok(meta)
    }
}
