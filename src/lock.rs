//! Embedded per-object lock adapter.
//!
//! Every object carries one of three lock variants chosen at allocation:
//! none, mutex, or reader/writer. The adapter gives all three a uniform
//! acquire/release/try/adjust surface. For the rwlock variant an atomic
//! holder counter (-1 while the writer is held, otherwise the number of
//! readers) lets unlock tell the two modes apart and lets `adjust` report
//! the current mode without any thread-local bookkeeping.

use core::sync::atomic::{AtomicI32, Ordering};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::lock_api::RawRwLock as _;
use parking_lot::{RawMutex, RawRwLock};

use crate::diag;

/// Lock variant selected when an object is allocated. Immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocLock {
    /// A plain mutex.
    #[default]
    Mutex,
    /// A reader/writer lock.
    RwLock,
    /// No lock at all; lock operations are no-ops.
    None,
}

/// How to acquire an object's lock.
///
/// `Mutex` is the variant-agnostic request: it means "exclusive" and is
/// treated as `Write` by the rwlock variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRequest {
    Mutex,
    Read,
    Write,
}

/// The lock state embedded in an object header.
pub(crate) enum LockCore {
    None,
    Mutex(RawMutex),
    Rw {
        raw: RawRwLock,
        /// -1 while the write lock is held; otherwise the reader count.
        holders: AtomicI32,
    },
}

impl LockCore {
    pub(crate) fn new(style: AllocLock) -> Self {
        match style {
            AllocLock::None => LockCore::None,
            AllocLock::Mutex => LockCore::Mutex(RawMutex::INIT),
            AllocLock::RwLock => LockCore::Rw {
                raw: RawRwLock::INIT,
                holders: AtomicI32::new(0),
            },
        }
    }

    pub(crate) fn style(&self) -> AllocLock {
        match self {
            LockCore::None => AllocLock::None,
            LockCore::Mutex(_) => AllocLock::Mutex,
            LockCore::Rw { .. } => AllocLock::RwLock,
        }
    }

    pub(crate) fn lock(&self, how: LockRequest) {
        match self {
            LockCore::None => {}
            LockCore::Mutex(m) => {
                m.lock();
                diag::lock_held(1);
            }
            LockCore::Rw { raw, holders } => {
                match how {
                    LockRequest::Mutex | LockRequest::Write => {
                        raw.lock_exclusive();
                        holders.fetch_sub(1, Ordering::AcqRel);
                    }
                    LockRequest::Read => {
                        raw.lock_shared();
                        holders.fetch_add(1, Ordering::AcqRel);
                    }
                }
                diag::lock_held(1);
            }
        }
    }

    pub(crate) fn try_lock(&self, how: LockRequest) -> bool {
        match self {
            LockCore::None => true,
            LockCore::Mutex(m) => {
                let ok = m.try_lock();
                if ok {
                    diag::lock_held(1);
                }
                ok
            }
            LockCore::Rw { raw, holders } => {
                let ok = match how {
                    LockRequest::Mutex | LockRequest::Write => {
                        let ok = raw.try_lock_exclusive();
                        if ok {
                            holders.fetch_sub(1, Ordering::AcqRel);
                        }
                        ok
                    }
                    LockRequest::Read => {
                        let ok = raw.try_lock_shared();
                        if ok {
                            holders.fetch_add(1, Ordering::AcqRel);
                        }
                        ok
                    }
                };
                if ok {
                    diag::lock_held(1);
                }
                ok
            }
        }
    }

    pub(crate) fn unlock(&self) {
        match self {
            LockCore::None => {}
            LockCore::Mutex(m) => {
                // Caller must hold the lock; the adapter has no way to check.
                unsafe { m.unlock() };
                diag::lock_held(-1);
            }
            LockCore::Rw { raw, holders } => {
                let current = holders.fetch_sub(1, Ordering::AcqRel) - 1;
                if current < 0 {
                    // It was the write lock. Fix the count back to zero.
                    holders.fetch_add(-current, Ordering::AcqRel);
                    unsafe { raw.unlock_exclusive() };
                } else {
                    unsafe { raw.unlock_shared() };
                }
                diag::lock_held(-1);
            }
        }
    }

    /// Adjust an already-held lock to the requested level.
    ///
    /// Only the rwlock variant is affected; switching mode releases the
    /// lock and re-acquires it at the new level, so the caller must not
    /// assume an uninterrupted critical section across this call. With
    /// `keep_stronger`, a held write lock is kept when a read is requested.
    ///
    /// Returns the level held on entry so the caller can restore it. For
    /// non-rwlock variants this is a no-op reporting `LockRequest::Mutex`.
    pub(crate) fn adjust(&self, how: LockRequest, keep_stronger: bool) -> LockRequest {
        match self {
            LockCore::Rw { holders, .. } => {
                let orig = if holders.load(Ordering::Acquire) < 0 {
                    LockRequest::Write
                } else {
                    LockRequest::Read
                };
                match how {
                    LockRequest::Mutex | LockRequest::Write => {
                        if orig != LockRequest::Write {
                            self.unlock();
                            self.lock(LockRequest::Write);
                        }
                    }
                    LockRequest::Read => {
                        if !keep_stronger && orig != LockRequest::Read {
                            self.unlock();
                            self.lock(LockRequest::Read);
                        }
                    }
                }
                orig
            }
            LockCore::None | LockCore::Mutex(_) => LockRequest::Mutex,
        }
    }

    /// Address of the embedded mutex, for callers coordinating external
    /// condition-style waits. `None` for the other variants.
    pub(crate) fn mutex_addr(&self) -> Option<core::ptr::NonNull<()>> {
        match self {
            LockCore::Mutex(m) => Some(core::ptr::NonNull::from(m).cast()),
            _ => None,
        }
    }
}
