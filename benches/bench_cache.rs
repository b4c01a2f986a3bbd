//! Throughput of `FtCache::get` under a hot/cold keyset: most accesses land
//! on a small resident working set, the rest fall through to a much larger
//! cold range and force a refill.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lazyfree_cache::internals::mmap::{AnonymousMapper, NullAdvisor};
use lazyfree_cache::{CacheConfig, FtCache, PageCache, Refill};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PAGE_SIZE: usize = 4096;
const ENTRY_SIZE: usize = 8;
const CHUNKS: u8 = 16;
const PAGES_PER_CHUNK: usize = 64;
const HOT_KEYS: u64 = 256;
const COLD_KEYS: u64 = 1_000_000;
const HOT_FRACTION: f64 = 0.8;

struct NoopRefill;

impl Refill for NoopRefill {
    fn refill(&mut self, key: u64, out: &mut [u8]) {
        out.copy_from_slice(&key.to_le_bytes());
    }
}

fn hot_cold_keys(n: usize, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            if rng.gen_bool(HOT_FRACTION) {
                rng.gen_range(0..HOT_KEYS)
            } else {
                HOT_KEYS + rng.gen_range(0..COLD_KEYS)
            }
        })
        .collect()
}

fn bench_get(c: &mut Criterion) {
    let config = CacheConfig::new(CHUNKS as usize * PAGES_PER_CHUNK * PAGE_SIZE)
        .with_chunks(CHUNKS)
        .with_page_size(PAGE_SIZE);
    let page_cache = PageCache::new(config, AnonymousMapper, NullAdvisor)
        .expect("failed to build PageCache");
    let mut cache =
        FtCache::new(page_cache, ENTRY_SIZE, NoopRefill).expect("failed to build FtCache");
    let mut buf = [0u8; ENTRY_SIZE];

    // Warm the hot set so the steady-state benchmark mostly measures hits.
    for key in 0..HOT_KEYS {
        cache.get(key, &mut buf);
    }

    let keys = hot_cold_keys(10_000, 42);
    let mut i = 0usize;

    c.bench_function("ftcache_get_hot_cold", |b| {
        b.iter(|| {
            let key = keys[i % keys.len()];
            i += 1;
            cache.get(black_box(key), &mut buf);
            black_box(&buf);
        });
    });
}

criterion_group!(benches, bench_get);
criterion_main!(benches);
