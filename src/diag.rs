//! Feature-gated runtime counters.
//!
//! With the `diag` feature the runtime keeps global tallies of objects,
//! payload bytes, containers, references, and currently held locks. The
//! counters are observational: plain atomic adds, never consulted by the
//! runtime itself. Without the feature every hook compiles to nothing.

#[cfg(feature = "diag")]
use core::sync::atomic::{AtomicI64, Ordering};

#[cfg(feature = "diag")]
static TOTAL_OBJECTS: AtomicI64 = AtomicI64::new(0);
#[cfg(feature = "diag")]
static TOTAL_MEM: AtomicI64 = AtomicI64::new(0);
#[cfg(feature = "diag")]
static TOTAL_CONTAINERS: AtomicI64 = AtomicI64::new(0);
#[cfg(feature = "diag")]
static TOTAL_REFS: AtomicI64 = AtomicI64::new(0);
#[cfg(feature = "diag")]
static TOTAL_LOCKED: AtomicI64 = AtomicI64::new(0);

/// Snapshot of the global runtime counters.
#[cfg(feature = "diag")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagStats {
    /// Live objects (containers included).
    pub total_objects: i64,
    /// Payload bytes held by live objects.
    pub total_mem: i64,
    /// Live containers.
    pub total_containers: i64,
    /// Outstanding object references.
    pub total_refs: i64,
    /// Currently held embedded locks.
    pub total_locked: i64,
}

/// Read the global runtime counters.
#[cfg(feature = "diag")]
pub fn diag_stats() -> DiagStats {
    DiagStats {
        total_objects: TOTAL_OBJECTS.load(Ordering::Relaxed),
        total_mem: TOTAL_MEM.load(Ordering::Relaxed),
        total_containers: TOTAL_CONTAINERS.load(Ordering::Relaxed),
        total_refs: TOTAL_REFS.load(Ordering::Relaxed),
        total_locked: TOTAL_LOCKED.load(Ordering::Relaxed),
    }
}

#[inline]
pub(crate) fn object_created(bytes: usize) {
    #[cfg(feature = "diag")]
    {
        TOTAL_OBJECTS.fetch_add(1, Ordering::Relaxed);
        TOTAL_MEM.fetch_add(bytes as i64, Ordering::Relaxed);
        TOTAL_REFS.fetch_add(1, Ordering::Relaxed);
    }
    #[cfg(not(feature = "diag"))]
    let _ = bytes;
}

#[inline]
pub(crate) fn object_destroyed(bytes: usize) {
    #[cfg(feature = "diag")]
    {
        TOTAL_OBJECTS.fetch_sub(1, Ordering::Relaxed);
        TOTAL_MEM.fetch_sub(bytes as i64, Ordering::Relaxed);
    }
    #[cfg(not(feature = "diag"))]
    let _ = bytes;
}

#[inline]
pub(crate) fn refs_changed(delta: i32) {
    #[cfg(feature = "diag")]
    TOTAL_REFS.fetch_add(delta as i64, Ordering::Relaxed);
    #[cfg(not(feature = "diag"))]
    let _ = delta;
}

#[inline]
pub(crate) fn container_count(delta: i32) {
    #[cfg(feature = "diag")]
    TOTAL_CONTAINERS.fetch_add(delta as i64, Ordering::Relaxed);
    #[cfg(not(feature = "diag"))]
    let _ = delta;
}

#[inline]
pub(crate) fn lock_held(delta: i32) {
    #[cfg(feature = "diag")]
    TOTAL_LOCKED.fetch_add(delta as i64, Ordering::Relaxed);
    #[cfg(not(feature = "diag"))]
    let _ = delta;
}
