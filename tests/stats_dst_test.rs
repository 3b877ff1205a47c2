//! Stats Deterministic Simulation Tests
//!
//! DST tests for StatsCollector with multiple seeds. Rival workers are
//! injected between each worker's read and write.

use redis_stats::buggify::FaultConfig;
use redis_stats::stats::{run_stats_batch, summarize_stats_batch, StatsDSTConfig, StatsDSTHarness};

// =============================================================================
// Standard Configuration Tests - 100+ Seeds
// =============================================================================

#[test]
fn test_stats_dst_100_seeds_standard() {
    let results = run_stats_batch(0, 100, 300, StatsDSTConfig::new);
    let summary = summarize_stats_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "All 100 seeds should pass with standard config");
}

#[test]
fn test_stats_dst_100_seeds_contended() {
    let results = run_stats_batch(1000, 100, 300, StatsDSTConfig::contended);
    let summary = summarize_stats_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "All 100 seeds should pass under contention");

    let rivals: u64 = results.iter().map(|r| r.rival_writes).sum();
    assert!(rivals > 1000, "contended runs should inject many rivals");
}

#[test]
fn test_stats_dst_100_seeds_hash_layout() {
    let results = run_stats_batch(2000, 100, 300, StatsDSTConfig::hash_layout);
    let summary = summarize_stats_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "All 100 seeds should pass with hash layout");
}

#[test]
fn test_stats_dst_100_seeds_busy_hash() {
    // Every conditional write races a counter bump on the same job hash
    let results = run_stats_batch(2500, 100, 300, StatsDSTConfig::busy_hash);
    let summary = summarize_stats_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "Neighbour writes must not starve extremal updates");

    let neighbours: u64 = results.iter().map(|r| r.neighbour_writes).sum();
    assert!(neighbours > 500, "busy hash runs should inject many neighbour writes");
}

#[test]
fn test_stats_dst_calm_injects_nothing() {
    let results = run_stats_batch(3000, 20, 300, StatsDSTConfig::calm);
    for result in &results {
        assert!(result.is_success(), "{}", result.summary());
        assert_eq!(result.rival_writes, 0);
        assert_eq!(result.neighbour_writes, 0);
        assert_eq!(result.spurious_cas_failures, 0);
        assert_eq!(result.vanished_keys, 0);
    }
}

// =============================================================================
// Stress Tests
// =============================================================================

#[test]
fn test_stats_dst_stress_2000_ops() {
    let mut harness = StatsDSTHarness::with_seed(42);
    harness.run(2000);
    let result = harness.result();
    println!("Stress 2000 ops: {}", result.summary());
    assert!(result.is_success(), "2000 ops should maintain invariants");
}

#[test]
fn test_stats_dst_stress_contended_2000_ops() {
    let mut harness = StatsDSTHarness::new(StatsDSTConfig::contended(99999));
    harness.run(2000);
    let result = harness.result();
    println!(
        "Contended 2000 ops: {} (max:{}, min:{})",
        result.summary(),
        result.max_updates,
        result.min_updates
    );
    assert!(result.is_success(), "Contended stress should maintain invariants");
    assert!(result.spurious_cas_failures > 0);
}

// =============================================================================
// Edge Case Tests
// =============================================================================

#[test]
fn test_stats_dst_extremes_only() {
    // Nothing but max/min on a single metric: every update races the CAS
    let config = StatsDSTConfig {
        seed: 77777,
        num_workers: 6,
        num_jobs: 1,
        num_metrics: 1,
        value_range: 10,
        inc_prob: 0.0,
        max_prob: 0.5,
        min_prob: 0.5,
        clear_prob: 0.0,
        hash_layout: false,
        faults: FaultConfig::chaos(),
    };

    let mut harness = StatsDSTHarness::new(config);
    harness.run(1000);
    let result = harness.result();
    println!("Extremes only: {}", result.summary());
    assert!(result.is_success(), "Extremes should maintain invariants");
    assert_eq!(result.increments, 0);
}

#[test]
fn test_stats_dst_high_clear_rate() {
    let config = StatsDSTConfig {
        seed: 88888,
        clear_prob: 0.2,
        ..StatsDSTConfig::new(88888)
    };

    let mut harness = StatsDSTHarness::new(config);
    harness.run(1000);
    let result = harness.result();
    println!("High clear rate: {}", result.summary());
    assert!(result.is_success(), "Clears should maintain invariants");
    assert!(result.clears > 50);
}

#[test]
fn test_stats_dst_many_jobs_isolated() {
    let config = StatsDSTConfig {
        num_jobs: 6,
        num_workers: 3,
        ..StatsDSTConfig::new(55555)
    };

    let mut harness = StatsDSTHarness::new(config);
    harness.run(1000);
    assert!(harness.result().is_success(), "{}", harness.result().summary());
}

#[test]
fn test_stats_dst_same_seed_same_run() {
    let run = |seed| {
        let mut harness = StatsDSTHarness::new(StatsDSTConfig::contended(seed));
        harness.run(500);
        harness.result().summary()
    };
    assert_eq!(run(4242), run(4242));
}

// =============================================================================
// Longer Tests (ignored by default)
// =============================================================================

#[test]
#[ignore]
fn test_stats_dst_500_seeds() {
    let results = run_stats_batch(0, 500, 500, StatsDSTConfig::contended);
    let summary = summarize_stats_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 500, "All 500 seeds should pass");
}

#[test]
#[ignore]
fn test_stats_dst_stress_10000_ops() {
    let mut harness = StatsDSTHarness::with_seed(31415);
    harness.run(10000);
    let result = harness.result();
    println!("Stress 10000 ops: {}", result.summary());
    assert!(result.is_success(), "10000 ops should maintain invariants");
}
