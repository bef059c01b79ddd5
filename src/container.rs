//! Polymorphic container abstraction.
//!
//! A container is itself a reference-counted object (`Obj<Container<..>>`)
//! whose payload holds the fields common to every variant — option flags,
//! sort and compare functions, the element count, the `destroying` latch —
//! plus the variant implementation behind the [`Backend`] method table.
//! The public operations here are thin dispatchers; the traversal and
//! linking algorithms live with the variant.
//!
//! Searches address the container either by a stored object, by a search
//! key, or not at all (full scan); [`SearchBy`] carries that choice and
//! [`Lookup`] is the object-or-key argument handed to the container's
//! hash, sort, and compare functions.

use core::cmp::Ordering as CmpOrdering;
use core::fmt::{self, Write as _};
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use tracing::error;

use crate::diag;
use crate::error::{CheckError, DupError, LinkError, ObjError};
use crate::hash::{HashBackend, Node};
use crate::iter::{Iter, IterFlags};
use crate::lock::{AllocLock, LockCore, LockRequest};
use crate::obj::{self, Obj};

/// Object-or-key argument passed to hash, sort, and compare functions.
pub enum Lookup<'a, T, K: ?Sized> {
    /// A stored object (pointer search).
    Obj(&'a T),
    /// A bare search key (key search).
    Key(&'a K),
}

impl<'a, T, K: ?Sized> Clone for Lookup<'a, T, K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<'a, T, K: ?Sized> Copy for Lookup<'a, T, K> {}

/// Search space selector for traversals.
pub enum SearchBy<'a, T, K: ?Sized> {
    /// Scan every bucket.
    All,
    /// Hashed search addressed by an object.
    Obj(&'a T),
    /// Hashed search addressed by a key.
    Key(&'a K),
}

impl<'a, T, K: ?Sized> SearchBy<'a, T, K> {
    /// The lookup argument for hash/sort/compare calls, when hashed.
    pub fn lookup(&self) -> Option<Lookup<'a, T, K>> {
        match self {
            SearchBy::All => None,
            SearchBy::Obj(o) => Some(Lookup::Obj(o)),
            SearchBy::Key(k) => Some(Lookup::Key(k)),
        }
    }
}

impl<'a, T, K: ?Sized> Clone for SearchBy<'a, T, K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<'a, T, K: ?Sized> Copy for SearchBy<'a, T, K> {}

/// Match outcome from a traversal callback: the match and stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub matched: bool,
    pub stop: bool,
}

impl Verdict {
    /// No match; keep going.
    pub const MISS: Verdict = Verdict {
        matched: false,
        stop: false,
    };
    /// Match; keep going.
    pub const MATCH: Verdict = Verdict {
        matched: true,
        stop: false,
    };
    /// No match; end the traversal.
    pub const STOP: Verdict = Verdict {
        matched: false,
        stop: true,
    };
    /// Match; end the traversal.
    pub const MATCH_STOP: Verdict = Verdict {
        matched: true,
        stop: true,
    };
}

/// Hash function: full range, reduced modulo the bucket count.
pub type HashFn<T, K> = fn(Lookup<'_, T, K>) -> u64;
/// Sort function: how a stored object orders against the argument.
pub type SortFn<T, K> = fn(&T, Lookup<'_, T, K>) -> CmpOrdering;
/// Compare function used by [`Container::find`].
pub type CmpFn<T, K> = fn(&T, Lookup<'_, T, K>) -> Verdict;

/// Duplicate handling when a link collides on the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DupPolicy {
    /// Multiple objects with the same key may coexist.
    #[default]
    Allow,
    /// Reject any object whose key is already present.
    RejectKey,
    /// Reject only a second link of the same object.
    RejectObject,
    /// Replace the existing object with the new one.
    Replace,
}

/// Which end of a bucket an unsorted insert lands on, and which direction
/// a sorted insert scans from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertEnd {
    /// Insert at the head; sorted position search runs back to front.
    Begin,
    /// Insert at the tail; sorted position search runs front to back.
    #[default]
    End,
}

/// Container behaviour options, fixed at allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerOptions {
    pub dup: DupPolicy,
    pub insert: InsertEnd,
}

/// Traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraverseOrder {
    #[default]
    Ascending,
    Descending,
    /// Pre-order; for the hash variant this is ascending.
    Pre,
    /// Post-order; for the hash variant this is descending.
    Post,
}

/// Search flags controlling a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchOpts {
    /// Unlink every match from the container.
    pub unlink: bool,
    /// Do not return matched objects (no reference is taken for the
    /// caller).
    pub no_data: bool,
    /// Keep going after a match; with data, matches are collected into a
    /// transient container returned through an iterator.
    pub multiple: bool,
    /// For hashed searches: continue past the starting bucket, wrapping
    /// around until every bucket has been scanned.
    pub wrap: bool,
    /// The caller already holds the container lock; only adjust it.
    pub no_lock: bool,
    pub order: TraverseOrder,
}

/// Options for [`Container::link_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkOpts {
    /// The caller already holds the container write lock.
    pub no_lock: bool,
}

/// What a traversal produced.
pub enum CallbackResult<T, K: ?Sized = T> {
    /// Nothing matched (or `no_data` was set).
    None,
    /// The matched object, with a reference for the caller.
    One(Obj<T>),
    /// All matches, behind an iterator that owns the transient container
    /// holding them.
    Many(Iter<T, K>),
}

impl<T, K: ?Sized> CallbackResult<T, K> {
    pub fn is_none(&self) -> bool {
        matches!(self, CallbackResult::None)
    }

    pub fn into_one(self) -> Option<Obj<T>> {
        match self {
            CallbackResult::One(o) => Some(o),
            _ => None,
        }
    }

    pub fn into_many(self) -> Option<Iter<T, K>> {
        match self {
            CallbackResult::Many(it) => Some(it),
            _ => None,
        }
    }
}

/// Method table every container variant implements.
///
/// The hash variant is currently the only implementor (a list is a
/// single-bucket hash); a tree variant would slot in here.
pub(crate) trait Backend<T, K: ?Sized> {
    fn link_node(
        &self,
        cont: &Container<T, K>,
        obj: &Obj<T>,
        opts: LinkOpts,
    ) -> Result<(), LinkError>;

    fn traverse(
        &self,
        cont: &Container<T, K>,
        opts: SearchOpts,
        by: SearchBy<'_, T, K>,
        matcher: &mut dyn FnMut(&Obj<T>) -> Verdict,
    ) -> CallbackResult<T, K>;

    fn iterator_next(
        &self,
        cont: &Container<T, K>,
        last: &mut Option<core::ptr::NonNull<Node<T, K>>>,
        flags: IterFlags,
    ) -> Option<Obj<T>>;

    fn alloc_empty_clone(&self, cont: &Container<T, K>) -> Result<Obj<Container<T, K>>, ObjError>;

    /// Variant-specific teardown, run after the generic destructor has
    /// unlinked the contents.
    fn destroy(&self, cont: &Container<T, K>);

    fn stats(&self, cont: &Container<T, K>, out: &mut dyn fmt::Write) -> fmt::Result;

    #[cfg(feature = "diag")]
    fn integrity(&self, cont: &Container<T, K>) -> Result<(), CheckError>;
}

/// Fields common to all container variants, plus the variant itself.
///
/// Only the allocation functions construct this type, so a `&Container`
/// is always the payload of an `Obj` allocation and the embedded lock can
/// be recovered from it.
pub struct Container<T, K: ?Sized = T> {
    options: ContainerOptions,
    sort_fn: Option<SortFn<T, K>>,
    cmp_fn: Option<CmpFn<T, K>>,
    pub(crate) elements: AtomicI32,
    pub(crate) destroying: AtomicBool,
    pub(crate) imp: HashBackend<T, K>,
}

/// Allocate a hash container.
///
/// Without a hash function the bucket count is forced to one and the
/// container degenerates to a (possibly sorted) list. A zero bucket count
/// is rejected.
pub fn alloc_hash<T, K: ?Sized>(
    lock: AllocLock,
    options: ContainerOptions,
    n_buckets: usize,
    hash_fn: Option<HashFn<T, K>>,
    sort_fn: Option<SortFn<T, K>>,
    cmp_fn: Option<CmpFn<T, K>>,
) -> Result<Obj<Container<T, K>>, ObjError> {
    if n_buckets == 0 {
        error!("hash container requested with zero buckets");
        return Err(ObjError::InvalidOptions);
    }
    let n_buckets = if hash_fn.is_some() { n_buckets } else { 1 };
    let cont = Container {
        options,
        sort_fn,
        cmp_fn,
        elements: AtomicI32::new(0),
        destroying: AtomicBool::new(false),
        imp: HashBackend::new(hash_fn, n_buckets),
    };
    diag::container_count(1);
    Ok(Obj::alloc_options(cont, lock))
}

/// Allocate a list container: a single-bucket hash with no hash function.
pub fn alloc_list<T, K: ?Sized>(
    lock: AllocLock,
    options: ContainerOptions,
    sort_fn: Option<SortFn<T, K>>,
    cmp_fn: Option<CmpFn<T, K>>,
) -> Result<Obj<Container<T, K>>, ObjError> {
    alloc_hash(lock, options, 1, None, sort_fn, cmp_fn)
}

/// How a dispatcher is holding the container lock, so it can be released
/// the same way it was acquired.
pub(crate) enum HeldLock {
    Direct,
    Adjusted(LockRequest),
}

impl<T, K: ?Sized> Container<T, K> {
    #[inline]
    fn self_lock(&self) -> &LockCore {
        // A Container is only ever constructed as an Obj payload.
        unsafe { obj::lock_of(self) }
    }

    pub(crate) fn lock_self(&self, how: LockRequest) {
        self.self_lock().lock(how);
    }

    pub(crate) fn unlock_self(&self) {
        self.self_lock().unlock();
    }

    pub(crate) fn adjust_self(&self, how: LockRequest, keep_stronger: bool) -> LockRequest {
        self.self_lock().adjust(how, keep_stronger)
    }

    pub(crate) fn lock_style(&self) -> AllocLock {
        self.self_lock().style()
    }

    /// Acquire the container lock for an operation, honoring `no_lock`
    /// (caller already holds it; only adjust the level).
    pub(crate) fn acquire(&self, how: LockRequest, no_lock: bool) -> HeldLock {
        if no_lock {
            HeldLock::Adjusted(self.adjust_self(how, true))
        } else {
            self.lock_self(how);
            HeldLock::Direct
        }
    }

    pub(crate) fn release(&self, held: HeldLock) {
        match held {
            HeldLock::Direct => self.unlock_self(),
            HeldLock::Adjusted(orig) => {
                self.adjust_self(orig, false);
            }
        }
    }

    /// Current element count. A racy read; no lock is taken.
    pub fn count(&self) -> usize {
        self.elements.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn options(&self) -> ContainerOptions {
        self.options
    }

    pub(crate) fn sort(&self) -> Option<SortFn<T, K>> {
        self.sort_fn
    }

    pub(crate) fn cmp(&self) -> Option<CmpFn<T, K>> {
        self.cmp_fn
    }

    /// Link an object into the container, subject to the duplicate policy.
    pub fn link(&self, obj: &Obj<T>) -> Result<(), LinkError> {
        self.link_with(obj, LinkOpts::default())
    }

    pub fn link_with(&self, obj: &Obj<T>, opts: LinkOpts) -> Result<(), LinkError> {
        self.imp.link_node(self, obj, opts)
    }

    /// Unlink an object by identity: a pointer-search traversal with a
    /// pointer-equality matcher, unlinking and returning nothing.
    pub fn unlink(&self, obj: &Obj<T>) {
        self.unlink_with(obj, SearchOpts::default());
    }

    pub fn unlink_with(&self, obj: &Obj<T>, mut opts: SearchOpts) {
        opts.unlink = true;
        opts.no_data = true;
        let mut match_by_addr =
            |o: &Obj<T>| {
                if Obj::ptr_eq(o, obj) {
                    Verdict::MATCH_STOP
                } else {
                    Verdict::MISS
                }
            };
        let _ = self.callback(opts, SearchBy::Obj(obj), Some(&mut match_by_addr));
    }

    /// Run a traversal with the given matcher over the selected search
    /// space. A `None` matcher matches everything.
    pub fn callback(
        &self,
        opts: SearchOpts,
        by: SearchBy<'_, T, K>,
        matcher: Option<&mut dyn FnMut(&Obj<T>) -> Verdict>,
    ) -> CallbackResult<T, K> {
        let mut match_all = |_: &Obj<T>| Verdict::MATCH;
        let m: &mut dyn FnMut(&Obj<T>) -> Verdict = match matcher {
            Some(m) => m,
            None => &mut match_all,
        };
        self.imp.traverse(self, opts, by, m)
    }

    /// [`Container::callback`] with an explicit data argument threaded to
    /// the matcher.
    pub fn callback_with<D>(
        &self,
        opts: SearchOpts,
        by: SearchBy<'_, T, K>,
        matcher: Option<fn(&Obj<T>, &mut D) -> Verdict>,
        data: &mut D,
    ) -> CallbackResult<T, K> {
        match matcher {
            Some(f) => self.callback(opts, by, Some(&mut |o: &Obj<T>| f(o, data))),
            None => self.callback(opts, by, None),
        }
    }

    /// Search using the container's stored compare function.
    pub fn find(&self, opts: SearchOpts, by: SearchBy<'_, T, K>) -> CallbackResult<T, K> {
        match (self.cmp_fn, by.lookup()) {
            (Some(cmp), Some(_)) => {
                let mut m = |o: &Obj<T>| match by.lookup() {
                    Some(l) => cmp(o, l),
                    None => Verdict::MATCH,
                };
                self.callback(opts, by, Some(&mut m))
            }
            _ => self.callback(opts, by, None),
        }
    }

    /// Copy every element of `src` into `self`.
    ///
    /// Transactional: if any link fails, `self` is emptied and an error
    /// is reported. Locks `src` for read and `self` for write unless the
    /// caller already holds both (`no_lock`).
    pub fn dup(&self, src: &Container<T, K>, no_lock: bool) -> Result<(), DupError> {
        if !no_lock {
            src.lock_self(LockRequest::Read);
            self.lock_self(LockRequest::Write);
        }

        let mut copy = |o: &Obj<T>| {
            if self.link_with(o, LinkOpts { no_lock: true }).is_ok() {
                Verdict::MISS
            } else {
                Verdict::MATCH_STOP
            }
        };
        let failed_on = src.callback(
            SearchOpts {
                no_lock: true,
                ..SearchOpts::default()
            },
            SearchBy::All,
            Some(&mut copy),
        );
        let failed = !failed_on.is_none();
        if failed {
            drop(failed_on);
            let _ = self.callback(
                SearchOpts {
                    no_lock: true,
                    unlink: true,
                    no_data: true,
                    multiple: true,
                    ..SearchOpts::default()
                },
                SearchBy::All,
                None,
            );
        }

        if !no_lock {
            self.unlock_self();
            src.unlock_self();
        }
        if failed {
            Err(DupError::LinkFailed)
        } else {
            Ok(())
        }
    }

    /// Allocate an empty container with the same options, functions, and
    /// bucket count, then [`Container::dup`] this one into it.
    pub fn clone_container(&self, no_lock: bool) -> Result<Obj<Container<T, K>>, DupError> {
        let clone = self.imp.alloc_empty_clone(self)?;
        if no_lock {
            // The caller holds our lock; the fresh clone still needs its
            // own write lock for the copy.
            clone.lock(LockRequest::Write);
        }
        let res = clone.dup(self, no_lock);
        if no_lock {
            clone.unlock();
        }
        res.map(|()| clone)
    }

    /// Run the variant's integrity scan under a read lock.
    #[cfg(feature = "diag")]
    pub fn check(&self, no_lock: bool) -> Result<(), CheckError> {
        if !no_lock {
            self.lock_self(LockRequest::Read);
        }
        let res = self.imp.integrity(self);
        if !no_lock {
            self.unlock_self();
        }
        res
    }

    /// Integrity scanning is compiled out without the `diag` feature;
    /// every container passes.
    #[cfg(not(feature = "diag"))]
    pub fn check(&self, _no_lock: bool) -> Result<(), CheckError> {
        Ok(())
    }

    /// Write element and bucket statistics to `out`, under a read lock.
    pub fn stats(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.lock_self(LockRequest::Read);
        let res = writeln!(out, "Number of objects: {}", self.count())
            .and_then(|()| self.imp.stats(self, out));
        self.unlock_self();
        res
    }
}

impl<T, K: ?Sized> Drop for Container<T, K> {
    fn drop(&mut self) {
        // One-shot latch: the bulk unlink below must not re-trigger
        // lifecycle accounting, and late links are refused from here on.
        self.destroying.store(true, Ordering::Release);
        let _ = self.callback(
            SearchOpts {
                unlink: true,
                no_data: true,
                multiple: true,
                ..SearchOpts::default()
            },
            SearchBy::All,
            None,
        );
        Backend::destroy(&self.imp, self);
        diag::container_count(-1);
    }
}
