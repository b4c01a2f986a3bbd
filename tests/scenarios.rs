//! Black-box end-to-end scenarios, run against the public API only.

use lazyfree_cache::internals::mmap::{AnonymousMapper, NullAdvisor};
use lazyfree_cache::{CacheConfig, EvictionPolicy, FtCache, PageCache};
use std::cell::Cell;
use std::rc::Rc;

const PAGE_SIZE: usize = 4096;
const ENTRY_SIZE: usize = 8;
const CHUNKS: u8 = 8;
const PAGES_PER_CHUNK: usize = 16;

fn capacity_config() -> CacheConfig {
    CacheConfig::new(CHUNKS as usize * PAGES_PER_CHUNK * PAGE_SIZE)
        .with_chunks(CHUNKS)
        .with_page_size(PAGE_SIZE)
}

/// A refill source that counts its own invocations and fills the output
/// buffer with `seed + key`.
struct CountingRefill {
    seed: u64,
    calls: Rc<Cell<u32>>,
}

impl lazyfree_cache::Refill for CountingRefill {
    fn refill(&mut self, key: u64, out: &mut [u8]) {
        self.calls.set(self.calls.get() + 1);
        out.copy_from_slice(&(self.seed + key).to_le_bytes());
    }
}

fn new_ftcache(seed: u64) -> (FtCache<NullAdvisor, CountingRefill>, Rc<Cell<u32>>) {
    let calls = Rc::new(Cell::new(0));
    let page_cache = PageCache::new(capacity_config(), AnonymousMapper, NullAdvisor)
        .expect("failed to build PageCache");
    let cache = FtCache::new(
        page_cache,
        ENTRY_SIZE,
        CountingRefill {
            seed,
            calls: calls.clone(),
        },
    )
    .expect("failed to build FtCache");
    (cache, calls)
}

#[test]
fn smoke_insert_then_reget_is_free() {
    let (mut cache, calls) = new_ftcache(1000);
    let mut buf = [0u8; ENTRY_SIZE];

    for key in 1..=10u64 {
        cache.get(key, &mut buf);
        assert_eq!(u64::from_le_bytes(buf), 1000 + key);
    }
    assert_eq!(calls.get(), 10);

    for key in 1..=10u64 {
        cache.get(key, &mut buf);
        assert_eq!(u64::from_le_bytes(buf), 1000 + key);
    }
    assert_eq!(calls.get(), 10, "re-getting already-cached keys must not refill");
}

#[test]
fn drop_forces_a_refill_on_next_get() {
    let (mut cache, calls) = new_ftcache(2000);
    let mut buf = [0u8; ENTRY_SIZE];

    for key in 1..=10u64 {
        cache.get(key, &mut buf);
    }
    assert_eq!(calls.get(), 10);

    for key in 1..=10u64 {
        assert!(cache.drop(key), "key {key} was just inserted and must be present");
    }
    assert!(!cache.drop(1), "dropping an already-dropped key returns false");

    for key in 1..=10u64 {
        cache.get(key, &mut buf);
    }
    assert_eq!(calls.get(), 20, "dropped keys must refill on their next get");
}

#[test]
fn key_zero_round_trips() {
    let (mut cache, calls) = new_ftcache(3000);
    let mut buf = [0u8; ENTRY_SIZE];

    cache.get(0, &mut buf);
    let first = buf;
    assert_eq!(calls.get(), 1);

    cache.get(0, &mut buf);
    assert_eq!(calls.get(), 1, "key 0 must hit on the second get");
    assert_eq!(buf, first);
}

#[test]
fn sentinel_position_byte_all_zero_survives_round_trip() {
    let mut cache = PageCache::new(capacity_config(), AnonymousMapper, NullAdvisor).unwrap();

    let page = cache.write_alloc(77);
    for b in page.iter_mut() {
        *b = 0;
    }
    cache.write_unlock(false);

    let rlock = cache.read_lock(77);
    assert!(rlock.is_present());
    let mut out = vec![0xffu8; PAGE_SIZE];
    assert!(cache.copy_out(&rlock, 0, &mut out));
    cache.read_unlock(rlock, false);

    assert!(out.iter().all(|&b| b == 0), "an all-zero payload must survive the sentinel trick");
}

#[test]
fn eviction_under_pressure_keeps_a_partial_but_correct_hit_rate() {
    let calls = Rc::new(Cell::new(0));
    let page_cache = PageCache::new(
        capacity_config().with_eviction(EvictionPolicy::RoundRobin),
        AnonymousMapper,
        NullAdvisor,
    )
    .unwrap();
    let mut cache = FtCache::new(
        page_cache,
        ENTRY_SIZE,
        CountingRefill { seed: 0, calls: calls.clone() },
    )
    .unwrap();
    let mut buf = [0u8; ENTRY_SIZE];

    let total_keys = 2 * (CHUNKS as u64) * (PAGES_PER_CHUNK as u64); // 256, capacity is 128
    for key in 1..=total_keys {
        cache.get(key, &mut buf);
    }
    assert_eq!(calls.get(), total_keys as u32);

    let mut hits = 0u64;
    for key in 1..=total_keys {
        let calls_before = calls.get();
        cache.get(key, &mut buf);
        if calls.get() == calls_before {
            hits += 1;
            assert_eq!(u64::from_le_bytes(buf), key);
        }
    }
    assert!(hits > 0, "every key evicted would make this cache pointless");
    assert!(hits < total_keys, "every key hitting means nothing was ever evicted");
}

#[test]
fn simulated_reclaim_forces_a_miss_and_refill() {
    let calls = Rc::new(Cell::new(0));
    let page_cache = PageCache::new(capacity_config(), AnonymousMapper, NullAdvisor).unwrap();
    let mut cache = FtCache::new(
        page_cache,
        ENTRY_SIZE,
        CountingRefill { seed: 0, calls: calls.clone() },
    )
    .unwrap();
    let mut buf = [0u8; ENTRY_SIZE];

    for key in 1..=64u64 {
        cache.get(key, &mut buf);
    }
    assert_eq!(calls.get(), 64);

    for key in (1..=64u64).filter(|k| k % 2 == 0) {
        cache.page_cache_mut().debug_force_reclaim(key);
    }

    for key in 1..=64u64 {
        let calls_before = calls.get();
        cache.get(key, &mut buf);
        let refilled = calls.get() != calls_before;
        if key % 2 == 0 {
            assert!(refilled, "key {key} was force-reclaimed and must refill");
        } else {
            assert!(!refilled, "key {key} was untouched and must hit");
            assert_eq!(u64::from_le_bytes(buf), key);
        }
    }
}
