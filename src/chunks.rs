//! Chunk storage: a single append-ordered file of length-prefixed,
//! CRC-framed encoded chunks addressed by byte offset.

use crate::chunkenc::{crc32, read_u32, BuiltChunk, Chunk, Compression};
use crate::error::ScanError;
use crate::types::Timestamp;

use memmap2::Mmap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub(crate) const CHUNKS_MAGIC: &[u8; 8] = b"BLKCHK01";
pub(crate) const CHUNKS_VERSION: u32 = 1;
pub(crate) const CHUNKS_HEADER_LEN: u64 = 8 + 4;

/// Opaque reference to one chunk record: its byte offset in the chunk
/// file. Stable only within one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkRef(pub u64);

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A chunk reference plus the inclusive time range it covers. One
/// series owns an ordered, non-overlapping, ascending sequence of
/// these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMeta {
    pub reference: ChunkRef,
    pub min_time: Timestamp,
    pub max_time: Timestamp,
}

/// Read access to a block's chunk file. Opened once per run; the file
/// is memory-mapped and released on drop.
#[derive(Debug)]
pub struct ChunkReader {
    mmap: Mmap,
}

impl ChunkReader {
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        let open_err = |source| ScanError::Open {
            target: "chunks",
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(open_err)?;

        if mmap.len() < CHUNKS_HEADER_LEN as usize {
            return Err(corrupt("truncated chunk file header"));
        }
        if &mmap[..8] != CHUNKS_MAGIC {
            return Err(corrupt("bad chunk file magic"));
        }
        let mut pos = 8usize;
        let version = read_u32(&mmap, &mut pos).expect("header length checked");
        if version != CHUNKS_VERSION {
            return Err(corrupt(&format!("unsupported chunk file version {}", version)));
        }
        Ok(Self { mmap })
    }

    /// Resolves a chunk reference to its encoded payload, verifying the
    /// record checksum.
    pub fn chunk(&self, reference: ChunkRef) -> Result<Chunk<'_>, ScanError> {
        let lookup_err = |details: String| ScanError::ChunkLookup { reference, details };

        let data = &self.mmap[..];
        if reference.0 < CHUNKS_HEADER_LEN || reference.0 >= data.len() as u64 {
            return Err(lookup_err("reference out of bounds".to_string()));
        }
        let mut pos = reference.0 as usize;
        let payload_len = read_u32(data, &mut pos)
            .ok_or_else(|| lookup_err("truncated record length".to_string()))?
            as usize;
        let end = pos
            .checked_add(1 + payload_len + 4)
            .filter(|&e| e <= data.len())
            .ok_or_else(|| lookup_err("record extends past end of file".to_string()))?;

        let framed = &data[pos..end - 4];
        let mut crc_pos = end - 4;
        let expected_crc =
            read_u32(data, &mut crc_pos).expect("record bounds checked");
        if crc32(framed) != expected_crc {
            return Err(lookup_err("record CRC mismatch".to_string()));
        }

        let compression = Compression::from_byte(framed[0])
            .map_err(|e| lookup_err(e.to_string()))?;
        Ok(Chunk::new(compression, &framed[1..]))
    }
}

fn corrupt(details: &str) -> ScanError {
    ScanError::Corrupt {
        target: "chunks",
        details: details.to_string(),
    }
}

/// Appends encoded chunks to a new chunk file. Fixture/ingest side;
/// the scan path never writes.
#[derive(Debug)]
pub struct ChunkWriter {
    w: BufWriter<File>,
    path: PathBuf,
    pos: u64,
}

impl ChunkWriter {
    pub fn create(path: &Path) -> Result<Self, ScanError> {
        let open_err = |source| ScanError::Open {
            target: "chunks",
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(open_err)?;
        let mut w = BufWriter::new(file);
        w.write_all(CHUNKS_MAGIC).map_err(open_err)?;
        w.write_all(&CHUNKS_VERSION.to_le_bytes()).map_err(open_err)?;
        Ok(Self {
            w,
            path: path.to_path_buf(),
            pos: CHUNKS_HEADER_LEN,
        })
    }

    /// Writes one chunk record and returns its reference.
    pub fn write(&mut self, chunk: &BuiltChunk) -> Result<ChunkRef, ScanError> {
        let reference = ChunkRef(self.pos);

        let mut framed = Vec::with_capacity(1 + chunk.data.len());
        framed.push(chunk.compression.to_byte());
        framed.extend_from_slice(&chunk.data);

        let mut record = Vec::with_capacity(8 + framed.len());
        record.extend_from_slice(&(chunk.data.len() as u32).to_le_bytes());
        record.extend_from_slice(&framed);
        record.extend_from_slice(&crc32(&framed).to_le_bytes());

        self.w.write_all(&record).map_err(|e| self.io_err(e))?;
        self.pos += record.len() as u64;
        Ok(reference)
    }

    /// Flushes and durably closes the file.
    pub fn finish(mut self) -> Result<(), ScanError> {
        self.w.flush().map_err(|e| self.io_err(e))?;
        self.w
            .get_ref()
            .sync_data()
            .map_err(|e| self.io_err(e))?;
        Ok(())
    }

    fn io_err(&self, source: std::io::Error) -> ScanError {
        ScanError::Open {
            target: "chunks",
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunkenc::{ChunkBuilder, Decoder};
    use crate::types::Sample;
    use tempfile::TempDir;

    fn built(samples: &[(i64, f64)], compression: Compression) -> BuiltChunk {
        let mut b = ChunkBuilder::new();
        for &(t, v) in samples {
            b.append(Sample::new(t, v)).unwrap();
        }
        b.build(compression).unwrap()
    }

    fn write_two_chunks(dir: &TempDir) -> (PathBuf, ChunkRef, ChunkRef) {
        let path = dir.path().join("chunks.dat");
        let mut w = ChunkWriter::create(&path).unwrap();
        let r1 = w.write(&built(&[(1, 1.0), (2, 2.0)], Compression::None)).unwrap();
        let r2 = w.write(&built(&[(10, 0.5)], Compression::Lz4)).unwrap();
        w.finish().unwrap();
        (path, r1, r2)
    }

    #[test]
    fn resolves_written_chunks_by_reference() {
        let dir = TempDir::new().unwrap();
        let (path, r1, r2) = write_two_chunks(&dir);

        let reader = ChunkReader::open(&path).unwrap();
        let mut dec = Decoder::new();

        let c2 = reader.chunk(r2).unwrap();
        assert_eq!(c2.compression(), Compression::Lz4);
        let got: Vec<_> = dec.iter(c2).unwrap().map(|r| r.unwrap().timestamp).collect();
        assert_eq!(got, vec![10]);

        let c1 = reader.chunk(r1).unwrap();
        let got: Vec<_> = dec.iter(c1).unwrap().map(|r| r.unwrap().timestamp).collect();
        assert_eq!(got, vec![1, 2]);
    }

    #[test]
    fn out_of_bounds_reference_fails_lookup() {
        let dir = TempDir::new().unwrap();
        let (path, _, _) = write_two_chunks(&dir);
        let reader = ChunkReader::open(&path).unwrap();
        let err = reader.chunk(ChunkRef(1 << 40)).unwrap_err();
        assert!(matches!(err, ScanError::ChunkLookup { .. }));
    }

    #[test]
    fn corrupted_record_fails_crc_check() {
        let dir = TempDir::new().unwrap();
        let (path, _, r2) = write_two_chunks(&dir);

        let mut bytes = std::fs::read(&path).unwrap();
        // Flip one payload byte of the second record.
        let victim = r2.0 as usize + 6;
        bytes[victim] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let reader = ChunkReader::open(&path).unwrap();
        let err = reader.chunk(r2).unwrap_err();
        match err {
            ScanError::ChunkLookup { details, .. } => assert!(details.contains("CRC")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn bad_magic_rejected_at_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.dat");
        std::fs::write(&path, b"NOTCHUNKfile").unwrap();
        assert!(matches!(
            ChunkReader::open(&path).unwrap_err(),
            ScanError::Corrupt { target: "chunks", .. }
        ));
    }
}
