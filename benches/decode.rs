use blockscan::chunkenc::{ChunkBuilder, Compression, Decoder};
use blockscan::{Sample, TimeRange};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_chunk_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_decode");

    for (name, compression) in [("plain", Compression::None), ("lz4", Compression::Lz4)] {
        let mut builder = ChunkBuilder::new();
        for i in 0..10_000i64 {
            builder
                .append(Sample::new(i * 30_000, (i % 97) as f64 * 0.5))
                .expect("ascending fixture");
        }
        let built = builder.build(compression).expect("build fixture");
        let range = TimeRange::new(30_000_000, 240_000_000);

        group.bench_function(format!("count_in_range_10k_{}", name), |b| {
            let mut decoder = Decoder::new();
            b.iter(|| {
                let mut count = 0u64;
                for sample in decoder.iter(built.chunk()).expect("decode fixture") {
                    let sample = sample.expect("decode fixture");
                    if range.contains(sample.timestamp) {
                        count += 1;
                    }
                }
                black_box(count)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunk_decode);
criterion_main!(benches);
