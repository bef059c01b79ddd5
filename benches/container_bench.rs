use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;

use refstore::{
    alloc_hash, AllocLock, Container, ContainerOptions, Iter, Lookup, Obj, SearchBy, SearchOpts,
    Verdict,
};

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

struct Entry {
    key: String,
}

fn key_of<'a>(l: Lookup<'a, Entry, str>) -> &'a str {
    match l {
        Lookup::Obj(o) => o.key.as_str(),
        Lookup::Key(k) => k,
    }
}

fn hash_key(l: Lookup<'_, Entry, str>) -> u64 {
    // FNV-1a over the key bytes.
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    for b in key_of(l).bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x100_0000_01b3);
    }
    h
}

fn sort_key(o: &Entry, l: Lookup<'_, Entry, str>) -> core::cmp::Ordering {
    o.key.as_str().cmp(key_of(l))
}

fn cmp_key(o: &Entry, l: Lookup<'_, Entry, str>) -> Verdict {
    if o.key == key_of(l) {
        Verdict::MATCH_STOP
    } else {
        Verdict::MISS
    }
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn populated(n: usize) -> (Obj<Container<Entry, str>>, Vec<String>) {
    let c = alloc_hash::<Entry, str>(
        AllocLock::Mutex,
        ContainerOptions::default(),
        1024,
        Some(hash_key),
        Some(sort_key),
        Some(cmp_key),
    )
    .expect("alloc");
    let keys: Vec<String> = lcg(7).take(n).map(key).collect();
    for k in &keys {
        let o = Obj::alloc_options(Entry { key: k.clone() }, AllocLock::None);
        c.link(&o).expect("link");
    }
    (c, keys)
}

fn bench_link_50k(c: &mut Criterion) {
    c.bench_function("refstore::link_fresh_50k", |b| {
        b.iter_batched(
            || {
                alloc_hash::<Entry, str>(
                    AllocLock::Mutex,
                    ContainerOptions::default(),
                    1024,
                    Some(hash_key),
                    Some(sort_key),
                    Some(cmp_key),
                )
                .expect("alloc")
            },
            |cont| {
                for x in lcg(1).take(50_000) {
                    let o = Obj::alloc_options(Entry { key: key(x) }, AllocLock::None);
                    cont.link(&o).expect("link");
                }
                black_box(cont)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_find_hit_10k(c: &mut Criterion) {
    c.bench_function("refstore::find_hit_10k_on_50k", |b| {
        let (cont, keys) = populated(50_000);
        // Precompute 10k query keys via the same LCG.
        let n = keys.len();
        let queries: Vec<&str> = lcg(0x9e37_79b9)
            .take(10_000)
            .map(|s| keys[(s as usize) % n].as_str())
            .collect();
        b.iter(|| {
            for q in &queries {
                let hit = cont
                    .find(SearchOpts::default(), SearchBy::Key(q))
                    .into_one();
                black_box(&hit);
            }
        })
    });
}

fn bench_iterate_50k(c: &mut Criterion) {
    c.bench_function("refstore::iterate_all_50k", |b| {
        let (cont, _keys) = populated(50_000);
        b.iter(|| {
            let mut total = 0usize;
            for o in Iter::new(&cont) {
                total += o.key.len();
            }
            black_box(total)
        })
    });
}

fn bench_unlink_relink(c: &mut Criterion) {
    c.bench_function("refstore::unlink_relink_10k", |b| {
        let (cont, keys) = populated(10_000);
        b.iter(|| {
            for k in &keys {
                let o = cont
                    .find(SearchOpts::default(), SearchBy::Key(k))
                    .into_one()
                    .expect("present");
                cont.unlink(&o);
                cont.link(&o).expect("relink");
            }
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(12)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_link_50k, bench_find_hit_10k, bench_iterate_50k, bench_unlink_relink
}
criterion_main!(benches);
