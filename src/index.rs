//! Block label index: CRC-framed series entries (label set plus chunk
//! metadata) addressed by byte offset, an all-series postings section,
//! and a checksummed footer locating it.

use crate::chunkenc::{
    crc32, read_i64, read_u32, read_u64, read_var_u64, write_i64, write_u32, write_u64,
    write_var_u64,
};
use crate::chunks::{ChunkMeta, ChunkRef};
use crate::error::ScanError;
use crate::types::{Label, Labels};

use memmap2::Mmap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

pub(crate) const INDEX_MAGIC: &[u8; 8] = b"BLKIDX01";
pub(crate) const INDEX_FOOTER_MAGIC: &[u8; 8] = b"BLKIDXF1";
pub(crate) const INDEX_VERSION: u32 = 1;
pub(crate) const INDEX_HEADER_LEN: u64 = 8 + 4;

// magic + postings_off + postings_len + crc32
const FOOTER_LEN: u64 = 8 + 8 + 8 + 4;

/// Opaque reference to one series entry: its byte offset in the index
/// file. Produced by postings iteration; stable only within one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeriesRef(pub(crate) u64);

impl fmt::Display for SeriesRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Read access to a block's label index. Opened once per run; the file
/// is memory-mapped and released on drop.
#[derive(Debug)]
pub struct IndexReader {
    mmap: Mmap,
    postings_off: usize,
    postings_len: usize,
}

impl IndexReader {
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        let open_err = |source| ScanError::Open {
            target: "index",
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(open_err)?;

        let file_len = mmap.len() as u64;
        if file_len < INDEX_HEADER_LEN + FOOTER_LEN {
            return Err(corrupt("truncated index file"));
        }
        if &mmap[..8] != INDEX_MAGIC {
            return Err(corrupt("bad index magic"));
        }
        let mut pos = 8usize;
        let version = read_u32(&mmap, &mut pos).expect("header length checked");
        if version != INDEX_VERSION {
            return Err(corrupt(&format!("unsupported index version {}", version)));
        }

        let mut fpos = (file_len - FOOTER_LEN) as usize;
        if &mmap[fpos..fpos + 8] != INDEX_FOOTER_MAGIC {
            return Err(corrupt("bad index footer magic"));
        }
        fpos += 8;
        let postings_off = read_u64(&mmap, &mut fpos).expect("footer length checked");
        let postings_len = read_u64(&mmap, &mut fpos).expect("footer length checked");
        let footer_crc = read_u32(&mmap, &mut fpos).expect("footer length checked");

        let mut framed = Vec::with_capacity(16);
        write_u64(&mut framed, postings_off);
        write_u64(&mut framed, postings_len);
        if crc32(&framed) != footer_crc {
            return Err(corrupt("index footer CRC mismatch"));
        }

        if postings_off < INDEX_HEADER_LEN
            || postings_off
                .checked_add(postings_len)
                .map_or(true, |end| end > file_len - FOOTER_LEN)
        {
            return Err(corrupt("postings section out of bounds"));
        }

        Ok(Self {
            mmap,
            postings_off: postings_off as usize,
            postings_len: postings_len as usize,
        })
    }

    /// Returns the all-series postings iterator: every series reference
    /// in the block, in ascending order. Decoding is lazy; a torn
    /// postings section surfaces as an `Err` item during iteration.
    pub fn postings(&self) -> Postings<'_> {
        Postings {
            data: &self.mmap[self.postings_off..self.postings_off + self.postings_len],
            pos: 0,
            remaining: None,
            prev: 0,
            failed: false,
        }
    }

    /// Resolves a series reference to its label set and ordered chunk
    /// metadata, verifying the entry checksum.
    pub fn series(&self, reference: SeriesRef) -> Result<(Labels, Vec<ChunkMeta>), ScanError> {
        let lookup_err = |details: String| ScanError::SeriesLookup { reference, details };

        let data = &self.mmap[..];
        if reference.0 < INDEX_HEADER_LEN || reference.0 >= self.postings_off as u64 {
            return Err(lookup_err("reference out of bounds".to_string()));
        }
        let mut pos = reference.0 as usize;
        let entry_len = read_u32(data, &mut pos)
            .ok_or_else(|| lookup_err("truncated entry length".to_string()))?
            as usize;
        let end = pos
            .checked_add(entry_len + 4)
            .filter(|&e| e <= self.postings_off)
            .ok_or_else(|| lookup_err("entry extends past series section".to_string()))?;

        let entry = &data[pos..end - 4];
        let mut crc_pos = end - 4;
        let expected_crc = read_u32(data, &mut crc_pos).expect("entry bounds checked");
        if crc32(entry) != expected_crc {
            return Err(lookup_err("entry CRC mismatch".to_string()));
        }

        parse_entry(entry).map_err(lookup_err)
    }
}

fn parse_entry(entry: &[u8]) -> Result<(Labels, Vec<ChunkMeta>), String> {
    let mut pos = 0usize;

    let label_count = read_u32(entry, &mut pos).ok_or("truncated label count")? as usize;
    let mut labels = Vec::with_capacity(label_count);
    for _ in 0..label_count {
        let name = read_string(entry, &mut pos)?;
        let value = read_string(entry, &mut pos)?;
        labels.push(Label { name, value });
    }

    let chunk_count = read_u32(entry, &mut pos).ok_or("truncated chunk count")? as usize;
    let mut chunks = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        let reference = read_u64(entry, &mut pos).ok_or("truncated chunk reference")?;
        let min_time = read_i64(entry, &mut pos).ok_or("truncated chunk time range")?;
        let max_time = read_i64(entry, &mut pos).ok_or("truncated chunk time range")?;
        chunks.push(ChunkMeta {
            reference: ChunkRef(reference),
            min_time,
            max_time,
        });
    }

    Ok((Labels::from_sorted(labels), chunks))
}

fn corrupt(details: &str) -> ScanError {
    ScanError::Corrupt {
        target: "index",
        details: details.to_string(),
    }
}

/// Lazy iterator over the delta-encoded all-series postings section.
#[derive(Debug)]
pub struct Postings<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: Option<u32>,
    prev: u64,
    failed: bool,
}

impl Iterator for Postings<'_> {
    type Item = Result<SeriesRef, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut step = || -> Result<Option<SeriesRef>, String> {
            let remaining = match self.remaining {
                Some(n) => n,
                None => {
                    let n = read_u32(self.data, &mut self.pos)
                        .ok_or("truncated postings count")?;
                    self.remaining = Some(n);
                    n
                }
            };
            if remaining == 0 {
                return Ok(None);
            }
            let first = self.prev == 0;
            let v = read_var_u64(self.data, &mut self.pos)?;
            let next = if first {
                v
            } else {
                if v == 0 {
                    return Err("duplicate or non-ascending series reference".to_string());
                }
                self.prev.checked_add(v).ok_or("series reference overflow")?
            };
            self.prev = next;
            self.remaining = Some(remaining - 1);
            Ok(Some(SeriesRef(next)))
        };
        match step() {
            Ok(Some(r)) => Some(Ok(r)),
            Ok(None) => None,
            Err(details) => {
                self.failed = true;
                Some(Err(ScanError::Postings(details)))
            }
        }
    }
}

fn read_string(data: &[u8], pos: &mut usize) -> Result<String, String> {
    let len = read_u32(data, pos).ok_or("truncated string length")? as usize;
    let bytes = data
        .get(*pos..*pos + len)
        .ok_or("truncated string")?;
    *pos += len;
    String::from_utf8(bytes.to_vec()).map_err(|e| format!("invalid UTF-8: {}", e))
}

/// Builds a block index in memory and writes it as one file. Series
/// must be added in the intended postings order. Fixture/ingest side;
/// the scan path never writes.
#[derive(Debug)]
pub struct IndexWriter {
    buf: Vec<u8>,
    refs: Vec<u64>,
}

impl Default for IndexWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexWriter {
    pub fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(INDEX_MAGIC);
        write_u32(&mut buf, INDEX_VERSION);
        Self {
            buf,
            refs: Vec::new(),
        }
    }

    /// Appends one series entry and returns its reference. An empty
    /// chunk list is legal: the series exists but holds no data.
    pub fn add_series(&mut self, labels: &Labels, chunks: &[ChunkMeta]) -> SeriesRef {
        let reference = self.buf.len() as u64;

        let mut entry = Vec::new();
        write_u32(&mut entry, labels.len() as u32);
        for l in labels.iter() {
            write_string(&mut entry, &l.name);
            write_string(&mut entry, &l.value);
        }
        write_u32(&mut entry, chunks.len() as u32);
        for c in chunks {
            write_u64(&mut entry, c.reference.0);
            write_i64(&mut entry, c.min_time);
            write_i64(&mut entry, c.max_time);
        }

        write_u32(&mut self.buf, entry.len() as u32);
        self.buf.extend_from_slice(&entry);
        write_u32(&mut self.buf, crc32(&entry));

        self.refs.push(reference);
        SeriesRef(reference)
    }

    /// Appends the postings section and footer, then writes the file.
    pub fn finish(mut self, path: &Path) -> Result<(), ScanError> {
        let postings_off = self.buf.len() as u64;
        write_u32(&mut self.buf, self.refs.len() as u32);
        let mut prev = 0u64;
        for (i, &r) in self.refs.iter().enumerate() {
            if i == 0 {
                write_var_u64(&mut self.buf, r);
            } else {
                write_var_u64(&mut self.buf, r - prev);
            }
            prev = r;
        }
        let postings_len = self.buf.len() as u64 - postings_off;

        let mut framed = Vec::with_capacity(16);
        write_u64(&mut framed, postings_off);
        write_u64(&mut framed, postings_len);
        let footer_crc = crc32(&framed);

        self.buf.extend_from_slice(INDEX_FOOTER_MAGIC);
        self.buf.extend_from_slice(&framed);
        write_u32(&mut self.buf, footer_crc);

        let open_err = |source| ScanError::Open {
            target: "index",
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(open_err)?;
        file.write_all(&self.buf).map_err(open_err)?;
        file.sync_data().map_err(open_err)?;
        Ok(())
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}
