//! Failure-path behavior of the traversal: the first error at any
//! stage aborts the run, and nothing is emitted past that point.

use blockscan::block::{BlockMeta, BlockStats};
use blockscan::chunkenc::{BuiltChunk, ChunkBuilder};
use blockscan::chunks::{ChunkMeta, ChunkRef, ChunkWriter};
use blockscan::index::IndexWriter;
use blockscan::{
    scan_block, Block, BlockBuilder, Compression, CountSink, Labels, Sample, ScanError, TimeRange,
};
use std::path::Path;
use tempfile::TempDir;

#[derive(Debug, Default)]
struct CollectSink {
    records: Vec<(Labels, u64)>,
}

impl CountSink for CollectSink {
    fn emit(&mut self, labels: &Labels, value_count: u64) -> Result<(), ScanError> {
        self.records.push((labels.clone(), value_count));
        Ok(())
    }
}

fn labels(pairs: &[(&str, &str)]) -> Labels {
    Labels::from_pairs(pairs)
}

fn built(points: &[(i64, f64)]) -> BuiltChunk {
    let mut b = ChunkBuilder::new();
    for &(t, v) in points {
        b.append(Sample::new(t, v)).unwrap();
    }
    b.build(Compression::None).unwrap()
}

fn write_meta(dir: &Path, num_series: u64) {
    let meta = BlockMeta {
        ulid: "00000000000000000000000000".to_string(),
        min_time: 0,
        max_time: 1_000,
        stats: BlockStats {
            num_samples: 0,
            num_series,
            num_chunks: 0,
        },
        version: 1,
    };
    std::fs::write(
        dir.join("meta.json"),
        serde_json::to_vec_pretty(&meta).unwrap(),
    )
    .unwrap();
}

#[test]
fn dangling_chunk_reference_on_second_series_aborts_after_first_record() {
    let dir = TempDir::new().unwrap();

    let mut cw = ChunkWriter::create(&dir.path().join("chunks.dat")).unwrap();
    let c1 = cw.write(&built(&[(10, 1.0), (20, 2.0)])).unwrap();
    let c3 = cw.write(&built(&[(30, 3.0)])).unwrap();
    cw.finish().unwrap();

    let chunk = |reference, min_time, max_time| ChunkMeta {
        reference,
        min_time,
        max_time,
    };
    let mut iw = IndexWriter::new();
    iw.add_series(&labels(&[("job", "a")]), &[chunk(c1, 10, 20)]);
    // Points past the end of the chunk file.
    iw.add_series(&labels(&[("job", "b")]), &[chunk(ChunkRef(1 << 32), 0, 100)]);
    iw.add_series(&labels(&[("job", "c")]), &[chunk(c3, 30, 30)]);
    iw.finish(&dir.path().join("index")).unwrap();

    write_meta(dir.path(), 3);

    let block = Block::open(dir.path()).unwrap();
    let mut sink = CollectSink::default();
    let err = scan_block(&block, TimeRange::default(), &mut sink).unwrap_err();

    assert!(matches!(err, ScanError::ChunkLookup { .. }));
    // Only the first series made it out; the third was never reached.
    assert_eq!(sink.records.len(), 1);
    assert_eq!(sink.records[0].0.get("job"), Some("a"));
    assert_eq!(sink.records[0].1, 2);
}

#[test]
fn malformed_chunk_payload_surfaces_as_decode_error() {
    let dir = TempDir::new().unwrap();

    // A record with a valid checksum whose payload claims five samples
    // but carries none: the tear is only visible to the decoder.
    let mut cw = ChunkWriter::create(&dir.path().join("chunks.dat")).unwrap();
    let garbage = BuiltChunk {
        compression: Compression::None,
        data: 5u32.to_le_bytes().to_vec(),
        num_samples: 5,
        min_time: 0,
        max_time: 0,
    };
    let c1 = cw.write(&garbage).unwrap();
    cw.finish().unwrap();

    let mut iw = IndexWriter::new();
    iw.add_series(
        &labels(&[("job", "a")]),
        &[ChunkMeta {
            reference: c1,
            min_time: 0,
            max_time: 0,
        }],
    );
    iw.finish(&dir.path().join("index")).unwrap();
    write_meta(dir.path(), 1);

    let block = Block::open(dir.path()).unwrap();
    let mut sink = CollectSink::default();
    let err = scan_block(&block, TimeRange::default(), &mut sink).unwrap_err();
    assert!(matches!(err, ScanError::Decode(_)));
    assert!(sink.records.is_empty());
}

#[test]
fn torn_postings_abort_after_the_intact_prefix() {
    let dir = TempDir::new().unwrap();
    let mut b = BlockBuilder::new();
    b.add_series(labels(&[("job", "a")]), vec![vec![Sample::new(1, 1.0)]]);
    b.add_series(labels(&[("job", "b")]), vec![vec![Sample::new(2, 2.0)]]);
    b.write(dir.path()).unwrap();

    // Inflate the postings count; iteration fails once the section is
    // exhausted, after both real series were scanned.
    let index_path = dir.path().join("index");
    let mut bytes = std::fs::read(&index_path).unwrap();
    let n = bytes.len();
    let postings_off = u64::from_le_bytes(bytes[n - 20..n - 12].try_into().unwrap()) as usize;
    bytes[postings_off..postings_off + 4].copy_from_slice(&1000u32.to_le_bytes());
    std::fs::write(&index_path, &bytes).unwrap();

    let block = Block::open(dir.path()).unwrap();
    let mut sink = CollectSink::default();
    let err = scan_block(&block, TimeRange::default(), &mut sink).unwrap_err();
    assert!(matches!(err, ScanError::Postings(_)));
    assert_eq!(sink.records.len(), 2);
}

#[test]
fn missing_index_file_fails_before_any_emission() {
    let dir = TempDir::new().unwrap();
    let mut b = BlockBuilder::new();
    b.add_series(labels(&[("job", "a")]), vec![vec![Sample::new(1, 1.0)]]);
    b.write(dir.path()).unwrap();
    std::fs::remove_file(dir.path().join("index")).unwrap();

    let block = Block::open(dir.path()).unwrap();
    let mut sink = CollectSink::default();
    let err = scan_block(&block, TimeRange::default(), &mut sink).unwrap_err();
    assert!(matches!(err, ScanError::Open { target: "index", .. }));
    assert!(sink.records.is_empty());
}

#[test]
fn failing_sink_aborts_the_run() {
    struct FailingSink;
    impl CountSink for FailingSink {
        fn emit(&mut self, _labels: &Labels, _value_count: u64) -> Result<(), ScanError> {
            Err(ScanError::Output(std::io::Error::other("pipe closed")))
        }
    }

    let dir = TempDir::new().unwrap();
    let mut b = BlockBuilder::new();
    b.add_series(labels(&[("job", "a")]), vec![vec![Sample::new(1, 1.0)]]);
    b.write(dir.path()).unwrap();

    let block = Block::open(dir.path()).unwrap();
    let err = scan_block(&block, TimeRange::default(), &mut FailingSink).unwrap_err();
    assert!(matches!(err, ScanError::Output(_)));
}
