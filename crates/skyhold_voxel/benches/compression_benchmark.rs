//! Benchmark for chunk payload compression.
//!
//! Run with: cargo bench --package skyhold_voxel --bench compression_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use skyhold_voxel::{compress, decompress, record, BlockPos, ChunkCoordinate, WorldChunk, VOXELS_PER_CHUNK};

/// A terrain-like chunk: solid lower half, scattered ore, air above.
fn terrain_chunk() -> WorldChunk {
    let mut chunk = WorldChunk::new(ChunkCoordinate::new(0, 0, 0));
    for z in 0..16 {
        for y in 0..8 {
            for x in 0..16 {
                let block = if (x * 7 + y * 3 + z) % 31 == 0 { 14 } else { 1 };
                chunk.set_voxel_at(BlockPos::new(x, y, z), block).ok();
            }
        }
    }
    chunk
}

fn alternating() -> Vec<u8> {
    (0..VOXELS_PER_CHUNK).map(|i| (i % 2) as u8).collect()
}

fn benchmark_rle(c: &mut Criterion) {
    let terrain = terrain_chunk();
    let worst = alternating();

    let mut group = c.benchmark_group("rle");
    group.throughput(Throughput::Bytes(VOXELS_PER_CHUNK as u64));

    group.bench_function("compress_terrain", |b| {
        b.iter(|| black_box(compress(black_box(terrain.voxels()))));
    });
    group.bench_function("compress_alternating", |b| {
        b.iter(|| black_box(compress(black_box(&worst))));
    });

    let packed = compress(terrain.voxels());
    group.bench_function("decompress_terrain", |b| {
        b.iter(|| black_box(decompress(black_box(&packed))));
    });

    group.finish();
}

fn benchmark_record(c: &mut Criterion) {
    let terrain = terrain_chunk();
    let encoded = record::encode(&terrain).unwrap_or_default();

    c.bench_function("record_encode", |b| {
        b.iter(|| black_box(record::encode(black_box(&terrain))));
    });
    c.bench_function("record_decode", |b| {
        b.iter(|| black_box(record::decode(black_box(&encoded))));
    });
}

criterion_group!(benches, benchmark_rle, benchmark_record);
criterion_main!(benches);
