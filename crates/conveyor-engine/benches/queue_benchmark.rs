//! Priority scoring and retry backoff benchmarks.
//!
//! ## Running
//!
//! ```bash
//! cargo bench --package conveyor-engine
//! ```
//!
//! ## Benchmark categories
//!
//! 1. **Priority score**: the weight-plus-timestamp computation every
//!    `enqueue` call performs.
//! 2. **Backoff**: the jittered exponential delay computed on every
//!    failed attempt.

use chrono::Utc;
use conveyor_config::RetryConfig;
use conveyor_core::Priority;
use conveyor_engine::{delay_for_attempt, next_run_at};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn priority_score(priority: Priority, enqueued_at: chrono::DateTime<Utc>) -> f64 {
    priority.weight() + enqueued_at.timestamp_millis() as f64
}

fn benchmark_priority_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_score");
    let now = Utc::now();

    for priority in [Priority::High, Priority::Medium, Priority::Low] {
        group.bench_with_input(BenchmarkId::new("weight_plus_timestamp", format!("{priority}")), &priority, |b, p| {
            b.iter(|| black_box(priority_score(*p, now)))
        });
    }

    group.finish();
}

fn benchmark_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");
    let config = RetryConfig::default();

    for attempt in [0u32, 1, 3, 10, 32] {
        group.bench_with_input(BenchmarkId::new("delay_for_attempt", attempt), &attempt, |b, a| {
            b.iter(|| black_box(delay_for_attempt(&config, *a)))
        });
    }

    group.bench_function("next_run_at", |b| {
        b.iter(|| black_box(next_run_at(&config, 2)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_priority_score, benchmark_backoff);
criterion_main!(benches);
