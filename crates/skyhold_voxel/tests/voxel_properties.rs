//! # Voxel Storage Properties
//!
//! Whole-domain checks for coordinates, index layout and compression.

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use skyhold_voxel::{
    compress, decompress, decompress_chunk, position_from_index, voxel_index, BlockPos,
    ChunkCoordinate, LocalPos, VOXELS_PER_CHUNK,
};

fn assert_roundtrip(data: &[u8]) {
    let packed = compress(data);
    assert_eq!(packed.len() % 2, 0);
    assert_eq!(decompress(&packed).unwrap(), data);
    assert_eq!(decompress_chunk(&packed).unwrap(), data);
}

#[test]
fn test_compression_roundtrip_patterns() {
    assert_roundtrip(&vec![0u8; VOXELS_PER_CHUNK]);
    assert_roundtrip(&vec![42u8; VOXELS_PER_CHUNK]);
    assert_roundtrip(&vec![255u8; VOXELS_PER_CHUNK]);

    let alternating: Vec<u8> = (0..VOXELS_PER_CHUNK).map(|i| (i % 2) as u8).collect();
    assert_roundtrip(&alternating);
    // No two neighbors match, so every voxel is its own pair.
    assert_eq!(compress(&alternating).len(), VOXELS_PER_CHUNK * 2);

    for outlier in [0, 1, 254, 255, 256, 2048, VOXELS_PER_CHUNK - 1] {
        let mut data = vec![0u8; VOXELS_PER_CHUNK];
        data[outlier] = 9;
        assert_roundtrip(&data);
    }
}

#[test]
fn test_compression_roundtrip_random() {
    let mut rng = StdRng::seed_from_u64(0x5c1e);
    for round in 0..64 {
        // Low palettes produce long runs, high palettes produce noise.
        let palette = 1 + (round % 8) * 32;
        let data: Vec<u8> = (0..VOXELS_PER_CHUNK)
            .map(|_| rng.gen_range(0..palette) as u8)
            .collect();
        assert_roundtrip(&data);
    }
}

#[test]
fn test_run_pair_count() {
    for n in [1usize, 254, 255, 256, 510, 511, 4096] {
        let packed = compress(&vec![7u8; n]);
        assert_eq!(packed.len() / 2, n.div_ceil(255), "run of {n}");
    }
}

#[test]
fn test_chunk_origin_inverse() {
    for v in -300..300 {
        for pos in [BlockPos::new(v, 0, 0), BlockPos::new(0, v, 0), BlockPos::new(v, -v, v * 3)] {
            let origin = ChunkCoordinate::containing(pos).origin();
            assert!(origin.x <= pos.x && pos.x < origin.x + 16);
            assert!(origin.y <= pos.y && pos.y < origin.y + 16);
            assert!(origin.z <= pos.z && pos.z < origin.z + 16);
            assert_eq!(origin.x.rem_euclid(16), 0);
        }
    }

    assert_eq!(ChunkCoordinate::containing(BlockPos::new(-1, -1, -1)), ChunkCoordinate::new(-1, -1, -1));
    assert_eq!(ChunkCoordinate::containing(BlockPos::new(16, 16, 16)), ChunkCoordinate::new(1, 1, 1));
    assert_eq!(ChunkCoordinate::new(-1, -1, -1).origin(), BlockPos::new(-16, -16, -16));
}

#[test]
fn test_index_inverse_covers_cube() {
    let mut seen = vec![false; VOXELS_PER_CHUNK];
    for z in 0..16u8 {
        for y in 0..16u8 {
            for x in 0..16u8 {
                let local = LocalPos::new(x, y, z).unwrap();
                let index = voxel_index(local);
                assert_eq!(position_from_index(index), Some(local));
                assert!(!seen[index], "index {index} hit twice");
                seen[index] = true;
            }
        }
    }
    assert!(seen.iter().all(|&s| s));
}

#[test]
fn test_chunk_id_roundtrip() {
    let samples = [0, 1, -1, 15, -16, 1000, -1000, i32::MAX, i32::MIN];
    for &x in &samples {
        for &y in &samples {
            for &z in &samples {
                let coord = ChunkCoordinate::new(x, y, z);
                assert_eq!(ChunkCoordinate::parse_id(&coord.id()), Some(coord));
            }
        }
    }
    assert_eq!(ChunkCoordinate::parse_id("invalid_id"), None);
    assert_eq!(ChunkCoordinate::parse_id("chunk_1_2"), None);
    assert_eq!(ChunkCoordinate::parse_id("chunk_a_b_c"), None);
}

#[test]
fn test_neighbor_enumeration() {
    for center in [ChunkCoordinate::new(0, 0, 0), ChunkCoordinate::new(-5, 3, 12)] {
        let neighbors = center.neighbors();
        assert_eq!(neighbors.len(), 26);
        assert!(!neighbors.contains(&center));
        assert!(neighbors.iter().all(|n| center.chebyshev_distance(*n) == 1));

        let mut unique = neighbors.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 26);
    }
}
