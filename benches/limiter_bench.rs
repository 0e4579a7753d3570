use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use farm_manager::middleware::rate_limit::RateLimiter;
use std::time::{Duration, Instant};

fn benchmark_single_client(c: &mut Criterion) {
    let limiter = RateLimiter::new(10, 20);
    let start = Instant::now();
    let mut tick = 0u64;

    c.bench_function("allow_single_client", |b| {
        b.iter(|| {
            tick += 1;
            limiter.allow(black_box("203.0.113.1"), start + Duration::from_micros(tick))
        })
    });
}

fn benchmark_many_clients(c: &mut Criterion) {
    let mut group = c.benchmark_group("allow_many_clients");
    for clients in [100usize, 10_000] {
        let limiter = RateLimiter::new(10, 20);
        let identities: Vec<String> = (0..clients).map(|i| format!("10.{}.{}.{}", i >> 16, (i >> 8) & 0xff, i & 0xff)).collect();
        let now = Instant::now();
        // Warm the registry so the benchmark measures the lookup path
        for id in &identities {
            limiter.allow(id, now);
        }
        let mut i = 0usize;
        group.bench_with_input(BenchmarkId::from_parameter(clients), &identities, |b, ids| {
            b.iter(|| {
                i = (i + 1) % ids.len();
                limiter.allow(black_box(&ids[i]), now)
            })
        });
    }
    group.finish();
}

fn benchmark_sweep(c: &mut Criterion) {
    c.bench_function("evict_idle_10k", |b| {
        b.iter_batched(
            || {
                let limiter = RateLimiter::new(10, 20);
                let now = Instant::now();
                for i in 0..10_000 {
                    limiter.allow(&format!("client-{}", i), now);
                }
                (limiter, now + Duration::from_secs(5))
            },
            |(limiter, later)| limiter.evict_idle(later),
            criterion::BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, benchmark_single_client, benchmark_many_clients, benchmark_sweep);
criterion_main!(benches);
