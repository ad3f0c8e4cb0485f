//! Benchmarks for the cache lookup path.
//!
//! Run with: cargo bench --bench search

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use pagecache::{AssociativeCache, CacheConfig, PagePool, ShadowMode};
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;
use std::sync::Arc;

const PAGE: u64 = 4096;

fn resident_cache(npages: usize) -> AssociativeCache {
    let pool = Arc::new(PagePool::new(npages * 4096, 4096, 8));
    let cache = AssociativeCache::new(pool, npages * 4096).unwrap();
    for i in 0..npages as u64 {
        let (page, _) = cache.search(i * PAGE);
        page.set_data_ready(true);
    }
    cache
}

fn bench_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("search/hit");
    group.throughput(Throughput::Elements(1));

    let cache = resident_cache(1024);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x5EED);

    group.bench_function("uniform", |b| {
        b.iter(|| {
            let offset = rng.gen_range(0..1024u64) * PAGE;
            let (page, _) = cache.search(black_box(offset));
            black_box(page.hits());
        })
    });

    group.finish();
}

fn bench_evict(c: &mut Criterion) {
    let mut group = c.benchmark_group("search/evict");
    group.throughput(Throughput::Elements(1));

    // Working set four times the cache: most lookups admit and evict.
    let cache = resident_cache(256);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x5EED);

    group.bench_function("pressure", |b| {
        b.iter(|| {
            let offset = rng.gen_range(0..1024u64) * PAGE;
            let (page, evicted) = cache.search(black_box(offset));
            page.set_data_ready(true);
            black_box(evicted);
        })
    });

    group.finish();
}

fn bench_shadow(c: &mut Criterion) {
    let mut group = c.benchmark_group("search/shadow");
    group.throughput(Throughput::Elements(1));

    let config = CacheConfig::new().with_shadow(ShadowMode::Clock { capacity: 16 });
    let pool = Arc::new(PagePool::new(256 * 4096, 4096, 8));
    let cache = AssociativeCache::with_config(pool, 256 * 4096, config).unwrap();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x5EED);

    group.bench_function("pressure", |b| {
        b.iter(|| {
            let offset = rng.gen_range(0..1024u64) * PAGE;
            let (page, evicted) = cache.search(black_box(offset));
            page.set_data_ready(true);
            black_box(evicted);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_hit, bench_evict, bench_shadow);
criterion_main!(benches);
