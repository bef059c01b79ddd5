// Property tests for the object and container runtime.
//
// Invariants exercised:
// - Any balanced sequence of reference deltas returns the counter to
//   its initial value without triggering destruction.
// - A container with reject-key policy tracks a key->object model map
//   exactly: presence, identity, and element count agree after every
//   operation, and teardown runs each destructor exactly once.
// - Under the replace policy the most recent insert wins and every
//   displaced object is released exactly once.

use core::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use refstore::{
    alloc_hash, AllocLock, ContainerOptions, DupPolicy, Lookup, Obj, SearchBy, SearchOpts,
    Verdict,
};

struct Item {
    name: String,
    drops: Arc<AtomicUsize>,
}

impl Drop for Item {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn key_of<'a>(l: Lookup<'a, Item, str>) -> &'a str {
    match l {
        Lookup::Obj(o) => o.name.as_str(),
        Lookup::Key(k) => k,
    }
}

fn hash_first_byte(l: Lookup<'_, Item, str>) -> u64 {
    u64::from(key_of(l).as_bytes().first().copied().unwrap_or(0))
}

fn sort_by_name(o: &Item, l: Lookup<'_, Item, str>) -> CmpOrdering {
    o.name.as_str().cmp(key_of(l))
}

fn cmp_by_name(o: &Item, l: Lookup<'_, Item, str>) -> Verdict {
    if o.name == key_of(l) {
        Verdict::MATCH_STOP
    } else {
        Verdict::MISS
    }
}

fn item(name: &str, drops: &Arc<AtomicUsize>) -> Obj<Item> {
    Obj::alloc_options(
        Item {
            name: name.to_string(),
            drops: drops.clone(),
        },
        AllocLock::None,
    )
}

proptest! {
    // For any sequence of balanced Ref+/Ref- the counter returns to its
    // initial value and the object survives throughout.
    #[test]
    fn balanced_ref_deltas_return_to_initial(deltas in proptest::collection::vec(1i32..4, 0..20)) {
        let o = Obj::alloc(0u64);
        let raw = o.raw();
        unsafe {
            for d in &deltas {
                raw.ref_delta(*d).expect("live handle");
            }
            for d in &deltas {
                raw.ref_delta(-*d).expect("live handle");
            }
            prop_assert_eq!(raw.refcount().expect("live handle"), 1);
        }
    }

    // Reject-key container against a model map: contains/find/count all
    // agree after every operation, and each allocation drops exactly once.
    #[test]
    fn reject_key_container_matches_model(
        ops in proptest::collection::vec((0u8..3u8, 0usize..8usize), 1..60)
    ) {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut allocated = 0usize;
        let c = alloc_hash::<Item, str>(
            AllocLock::Mutex,
            ContainerOptions { dup: DupPolicy::RejectKey, ..ContainerOptions::default() },
            5,
            Some(hash_first_byte),
            Some(sort_by_name),
            Some(cmp_by_name),
        ).expect("hash alloc");
        let mut model: BTreeMap<String, Obj<Item>> = BTreeMap::new();

        for (op, k) in ops {
            let key = format!("k{k}");
            match op {
                // Link a fresh object; the policy rejects present keys.
                0 => {
                    let o = item(&key, &drops);
                    allocated += 1;
                    let res = c.link(&o);
                    if model.contains_key(&key) {
                        prop_assert!(res.is_err());
                    } else {
                        prop_assert!(res.is_ok());
                        model.insert(key.clone(), o);
                    }
                }
                // Find mirrors model presence and identity.
                1 => {
                    let found = c.find(SearchOpts::default(), SearchBy::Key(&key)).into_one();
                    match (found, model.get(&key)) {
                        (Some(f), Some(m)) => prop_assert!(Obj::ptr_eq(&f, m)),
                        (None, None) => {}
                        (f, m) => prop_assert!(false, "presence mismatch: {} vs {}", f.is_some(), m.is_some()),
                    }
                }
                // Unlink through the pointer matcher.
                2 => {
                    if let Some(o) = model.remove(&key) {
                        c.unlink(&o);
                    }
                }
                _ => unreachable!(),
            }
            prop_assert_eq!(c.count(), model.len());
        }

        drop(model);
        drop(c);
        prop_assert_eq!(drops.load(Ordering::SeqCst), allocated);
    }

    // Replace policy: after any insert sequence the container holds one
    // object per key, the most recent one, and every displaced object
    // was released exactly once.
    #[test]
    fn replace_policy_keeps_most_recent(
        keys in proptest::collection::vec(0usize..4usize, 1..30)
    ) {
        let drops = Arc::new(AtomicUsize::new(0));
        let c = alloc_hash::<Item, str>(
            AllocLock::Mutex,
            ContainerOptions { dup: DupPolicy::Replace, ..ContainerOptions::default() },
            5,
            Some(hash_first_byte),
            Some(sort_by_name),
            Some(cmp_by_name),
        ).expect("hash alloc");
        let mut latest: BTreeMap<String, Obj<Item>> = BTreeMap::new();
        let mut allocated = 0usize;

        for k in keys {
            let key = format!("k{k}");
            let o = item(&key, &drops);
            allocated += 1;
            prop_assert!(c.link(&o).is_ok());
            latest.insert(key, o);
        }

        prop_assert_eq!(c.count(), latest.len());
        // Displaced objects: every allocation not still latest has been
        // dropped (we held the only remaining reference and replaced it
        // in the map).
        prop_assert_eq!(drops.load(Ordering::SeqCst), allocated - latest.len());
        for (key, o) in &latest {
            let found = c.find(SearchOpts::default(), SearchBy::Key(key)).into_one();
            match found {
                Some(f) => prop_assert!(Obj::ptr_eq(&f, o)),
                None => prop_assert!(false, "latest object missing for {key}"),
            }
        }
    }
}
