//! Advisor and validator properties over generated dimension sets

use gridstore_core::{AccessPattern, ChunkPlan, DimensionSpec, Error};
use gridstore_engine::{recommend_chunks, validate_chunks, ChunkAdvisor};
use proptest::prelude::*;

const NAMES: [&str; 4] = ["time", "lat", "lon", "depth"];

fn dims_strategy() -> impl Strategy<Value = Vec<DimensionSpec>> {
    prop::collection::vec(1usize..5_000, 1..=4).prop_map(|lengths| {
        lengths
            .into_iter()
            .enumerate()
            .map(|(i, len)| DimensionSpec::new(NAMES[i], len))
            .collect()
    })
}

fn pattern_strategy() -> impl Strategy<Value = AccessPattern> {
    prop_oneof![
        Just(AccessPattern::Temporal),
        Just(AccessPattern::Spatial),
        Just(AccessPattern::Balanced),
    ]
}

fn realized_bytes(plan: &ChunkPlan, dims: &[DimensionSpec], dtype_size: usize) -> f64 {
    plan.resolve(dims).iter().map(|&c| c as f64).product::<f64>() * dtype_size as f64
}

proptest! {
    #[test]
    fn test_recommendation_within_bounds(
        dims in dims_strategy(),
        dtype_size in 1usize..=8,
        pattern in pattern_strategy(),
        target in 1_024.0f64..(64.0 * 1024.0 * 1024.0),
    ) {
        let rec = recommend_chunks(&dims, dtype_size, pattern, Some(target)).unwrap();
        let chunks = rec.chunks.resolve(&dims);
        for (d, &c) in dims.iter().zip(&chunks) {
            prop_assert!(c >= 1 && c <= d.length, "{} chunk {} outside 1..={}", d.name, c, d.length);
        }
        let bytes = realized_bytes(&rec.chunks, &dims, dtype_size);
        if bytes > target {
            prop_assert!(chunks.iter().all(|&c| c == 1));
            prop_assert!(!rec.warnings.is_empty());
        }
        prop_assert!((rec.estimated_chunk_size_bytes - bytes).abs() < 1e-6);
    }

    #[test]
    fn test_small_datasets_keep_full_lengths(
        dims in prop::collection::vec(1usize..64, 1..=3)
            .prop_map(|l| l.into_iter().enumerate().map(|(i, n)| DimensionSpec::new(NAMES[i], n)).collect::<Vec<_>>()),
        pattern in pattern_strategy(),
    ) {
        let rec = recommend_chunks(&dims, 8, pattern, Some(16.0 * 1024.0 * 1024.0)).unwrap();
        let full: Vec<usize> = dims.iter().map(|d| d.length).collect();
        prop_assert_eq!(rec.chunks.resolve(&dims), full);
        prop_assert!(rec.warnings.is_empty());
    }

    #[test]
    fn test_recommendation_is_deterministic(
        dims in dims_strategy(),
        pattern in pattern_strategy(),
    ) {
        let first = recommend_chunks(&dims, 4, pattern, Some(1_048_576.0)).unwrap();
        let second = recommend_chunks(&dims, 4, pattern, Some(1_048_576.0)).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_validator_measures_resolved_plan(
        dims in dims_strategy(),
        dtype_size in 1usize..=8,
    ) {
        let plan: ChunkPlan = dims.iter().map(|d| (d.name.clone(), (d.length / 2).max(1))).collect();
        let validation = validate_chunks(&plan, &dims, dtype_size).unwrap();
        let expected = realized_bytes(&plan, &dims, dtype_size);
        prop_assert!((validation.chunk_size_bytes - expected).abs() < 1e-6);
    }
}

// ============================================================================
// Degenerate input
// ============================================================================

#[test]
fn test_zero_length_dimension_is_planning_error() {
    let dims = vec![DimensionSpec::new("time", 0), DimensionSpec::new("lat", 10)];
    let err = recommend_chunks(&dims, 4, AccessPattern::Balanced, None).unwrap_err();
    assert!(matches!(err, Error::Planning(_)));

    let err = validate_chunks(&ChunkPlan::new(), &dims, 4).unwrap_err();
    assert!(matches!(err, Error::Planning(_)));
}

#[test]
fn test_temporal_pattern_favours_time() {
    let dims = vec![
        DimensionSpec::new("time", 10_000),
        DimensionSpec::new("lat", 1_000),
        DimensionSpec::new("lon", 1_000),
    ];
    let temporal = ChunkAdvisor::new()
        .recommend(&dims, 4, AccessPattern::Temporal, Some(8.0 * 1024.0 * 1024.0))
        .unwrap();
    let spatial = ChunkAdvisor::new()
        .recommend(&dims, 4, AccessPattern::Spatial, Some(8.0 * 1024.0 * 1024.0))
        .unwrap();
    assert!(temporal.chunks.get("time") > spatial.chunks.get("time"));
    assert!(temporal.chunks.get("lat") < spatial.chunks.get("lat"));
}

#[test]
fn test_validator_flags_granular_time() {
    let dims = vec![
        DimensionSpec::new("time", 1_000),
        DimensionSpec::new("lat", 10),
    ];
    let plan = ChunkPlan::new().with("time", 1).with("lat", 10);
    let validation = validate_chunks(&plan, &dims, 4).unwrap();
    assert!(!validation.is_clean());
    assert!(validation.warnings.iter().any(|w| w.contains("granular")));
    assert!(validation.recommendations.iter().any(|r| r.contains("time")));
}
