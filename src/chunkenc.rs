//! Chunk sample codec: timestamp delta varints + XOR-folded value bits,
//! with optional per-chunk LZ4 payload compression.

use crate::types::{Sample, Timestamp};
use thiserror::Error;

/// Per-chunk payload compression. Stored in the chunk record's encoding
/// byte; configuration only affects newly written chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Lz4,
}

const ENC_PLAIN: u8 = 1;
const ENC_LZ4: u8 = 2;

/// Decompressed chunk payloads above this size are treated as corrupt.
const MAX_UNCOMPRESSED_LEN: usize = 8 * 1024 * 1024;

impl Compression {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Compression::None => ENC_PLAIN,
            Compression::Lz4 => ENC_LZ4,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Result<Self, ChunkError> {
        match b {
            ENC_PLAIN => Ok(Compression::None),
            ENC_LZ4 => Ok(Compression::Lz4),
            other => Err(ChunkError::UnknownEncoding(other)),
        }
    }
}

/// Error type for chunk encoding and decoding.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("appended sample out of order: {next} after {prev}")]
    OutOfOrder { prev: Timestamp, next: Timestamp },

    #[error("refusing to encode an empty chunk")]
    Empty,

    #[error("unknown chunk encoding {0}")]
    UnknownEncoding(u8),

    #[error("malformed chunk data: {0}")]
    Malformed(String),

    #[error("lz4 decompress failed: {0}")]
    Decompress(String),
}

/// An encoded chunk as resolved from chunk storage. Borrows the raw
/// payload; decoding goes through [`Decoder::iter`].
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    compression: Compression,
    data: &'a [u8],
}

impl<'a> Chunk<'a> {
    pub(crate) fn new(compression: Compression, data: &'a [u8]) -> Self {
        Self { compression, data }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }
}

/// An encoded chunk built in memory, ready to be written to chunk
/// storage. Fixture/ingest side of [`Chunk`].
#[derive(Debug, Clone)]
pub struct BuiltChunk {
    pub compression: Compression,
    pub data: Vec<u8>,
    pub num_samples: u32,
    pub min_time: Timestamp,
    pub max_time: Timestamp,
}

impl BuiltChunk {
    pub fn chunk(&self) -> Chunk<'_> {
        Chunk::new(self.compression, &self.data)
    }
}

/// Accumulates samples for one chunk. Timestamps must be appended in
/// strictly ascending order.
#[derive(Debug, Default)]
pub struct ChunkBuilder {
    samples: Vec<Sample>,
}

impl ChunkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, sample: Sample) -> Result<(), ChunkError> {
        if let Some(last) = self.samples.last() {
            if sample.timestamp <= last.timestamp {
                return Err(ChunkError::OutOfOrder {
                    prev: last.timestamp,
                    next: sample.timestamp,
                });
            }
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encodes the accumulated samples into a chunk payload.
    pub fn build(&self, compression: Compression) -> Result<BuiltChunk, ChunkError> {
        let first = match self.samples.first() {
            Some(s) => *s,
            None => return Err(ChunkError::Empty),
        };

        let mut body = Vec::with_capacity(16 + self.samples.len() * 3);
        write_u32(&mut body, self.samples.len() as u32);
        body.extend_from_slice(&first.timestamp.to_le_bytes());
        body.extend_from_slice(&first.value.to_bits().to_le_bytes());

        let mut prev_t = first.timestamp;
        let mut prev_bits = first.value.to_bits();
        for s in &self.samples[1..] {
            // Ascending order is enforced on append, so the delta is
            // unsigned; mod-2^64 arithmetic keeps full-domain spans exact.
            write_var_u64(&mut body, s.timestamp.wrapping_sub(prev_t) as u64);
            let bits = s.value.to_bits();
            write_var_u64(&mut body, bits ^ prev_bits);
            prev_t = s.timestamp;
            prev_bits = bits;
        }

        let data = match compression {
            Compression::None => body,
            Compression::Lz4 => {
                let mut out = Vec::with_capacity(8 + body.len() / 2);
                write_u32(&mut out, body.len() as u32);
                out.extend_from_slice(&lz4_flex::block::compress(&body));
                out
            }
        };

        Ok(BuiltChunk {
            compression,
            data,
            num_samples: self.samples.len() as u32,
            min_time: first.timestamp,
            max_time: prev_t,
        })
    }
}

/// Reusable decoder state. One instance is carried across every chunk
/// of a scan; the scratch buffer is recycled between decompressions
/// instead of reallocating per chunk. Cursor state lives in the
/// per-chunk [`SampleIter`], so nothing leaks from one chunk into the
/// next.
#[derive(Debug, Default)]
pub struct Decoder {
    scratch: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins decoding `chunk`. The returned cursor borrows the decoder
    /// and is the only usable handle on it until dropped.
    pub fn iter<'d>(&'d mut self, chunk: Chunk<'d>) -> Result<SampleIter<'d>, ChunkError> {
        let stream: &'d [u8] = match chunk.compression {
            Compression::None => chunk.data,
            Compression::Lz4 => {
                let mut pos = 0usize;
                let uncompressed_len = read_u32(chunk.data, &mut pos)
                    .ok_or_else(|| ChunkError::Malformed("truncated lz4 frame".to_string()))?
                    as usize;
                if uncompressed_len > MAX_UNCOMPRESSED_LEN {
                    return Err(ChunkError::Malformed(format!(
                        "refusing to allocate oversized chunk payload ({} bytes)",
                        uncompressed_len
                    )));
                }
                self.scratch.resize(uncompressed_len, 0);
                let n = lz4_flex::block::decompress_into(&chunk.data[pos..], &mut self.scratch)
                    .map_err(|e| ChunkError::Decompress(e.to_string()))?;
                if n != uncompressed_len {
                    return Err(ChunkError::Decompress(format!(
                        "expected {} bytes, got {}",
                        uncompressed_len, n
                    )));
                }
                &self.scratch
            }
        };

        let mut pos = 0usize;
        let remaining = read_u32(stream, &mut pos)
            .ok_or_else(|| ChunkError::Malformed("truncated sample count".to_string()))?;
        Ok(SampleIter {
            data: stream,
            pos,
            remaining,
            prev_t: 0,
            prev_bits: 0,
            first: true,
            failed: false,
        })
    }
}

/// Forward-only cursor over one chunk's samples. Yields samples in
/// ascending timestamp order; the first decode error ends iteration.
#[derive(Debug)]
pub struct SampleIter<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: u32,
    prev_t: Timestamp,
    prev_bits: u64,
    first: bool,
    failed: bool,
}

impl SampleIter<'_> {
    fn decode_next(&mut self) -> Result<Sample, ChunkError> {
        if self.first {
            self.first = false;
            let t = read_i64(self.data, &mut self.pos)
                .ok_or_else(|| ChunkError::Malformed("truncated first sample".to_string()))?;
            let bits = read_u64(self.data, &mut self.pos)
                .ok_or_else(|| ChunkError::Malformed("truncated first sample".to_string()))?;
            self.prev_t = t;
            self.prev_bits = bits;
        } else {
            let dt = read_var_u64(self.data, &mut self.pos).map_err(ChunkError::Malformed)?;
            let xor = read_var_u64(self.data, &mut self.pos).map_err(ChunkError::Malformed)?;
            self.prev_t = self.prev_t.wrapping_add(dt as i64);
            self.prev_bits ^= xor;
        }
        Ok(Sample {
            timestamp: self.prev_t,
            value: f64::from_bits(self.prev_bits),
        })
    }
}

impl Iterator for SampleIter<'_> {
    type Item = Result<Sample, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.decode_next() {
            Ok(s) => Some(Ok(s)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// --- Binary helpers (shared with the index and chunk file formats) ---

#[inline]
pub(crate) fn crc32(bytes: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(bytes);
    h.finalize()
}

pub(crate) fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn write_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn read_u32(data: &[u8], pos: &mut usize) -> Option<u32> {
    let b = data.get(*pos..*pos + 4)?;
    *pos += 4;
    Some(u32::from_le_bytes(b.try_into().expect("4-byte slice")))
}

pub(crate) fn read_u64(data: &[u8], pos: &mut usize) -> Option<u64> {
    let b = data.get(*pos..*pos + 8)?;
    *pos += 8;
    Some(u64::from_le_bytes(b.try_into().expect("8-byte slice")))
}

pub(crate) fn read_i64(data: &[u8], pos: &mut usize) -> Option<i64> {
    let b = data.get(*pos..*pos + 8)?;
    *pos += 8;
    Some(i64::from_le_bytes(b.try_into().expect("8-byte slice")))
}

pub(crate) fn write_var_u64(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

pub(crate) fn read_var_u64(data: &[u8], pos: &mut usize) -> Result<u64, String> {
    let mut out: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..10 {
        let byte = match data.get(*pos) {
            Some(b) => *b,
            None => return Err("truncated varint".to_string()),
        };
        *pos += 1;
        out |= ((byte & 0x7F) as u64) << shift;
        if (byte & 0x80) == 0 {
            return Ok(out);
        }
        shift = shift.saturating_add(7);
    }
    Err("varint too long".to_string())
}
