//! Stateful container iterator.
//!
//! An iterator owns a reference to its container and, between steps, a
//! reference to the last node it returned. Pinning the node keeps the
//! cursor position defined even when other threads unlink neighbours (or
//! the returned object itself) in the meantime; the pinned node simply
//! becomes a tombstone and the next step walks past it.

use core::ptr::NonNull;

use crate::container::{Backend, Container};
use crate::hash::Node;
use crate::lock::LockRequest;
use crate::obj::{self, Obj};

/// Iterator behaviour flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterFlags {
    /// Walk buckets and nodes from the high end.
    pub descending: bool,
    /// Unlink each returned object from the container; the container's
    /// reference transfers to the caller.
    pub unlink: bool,
    /// The caller manages the container lock; only adjust it.
    pub no_lock: bool,
}

/// A cursor over a container's objects.
///
/// Once the walk is exhausted the cursor resets: a further `next` starts
/// over from the first element, so a long-lived iterator can re-scan a
/// container without being rebuilt.
pub struct Iter<T, K: ?Sized = T> {
    cont: Obj<Container<T, K>>,
    last: Option<NonNull<Node<T, K>>>,
    flags: IterFlags,
}

// The pinned node pointer is only dereferenced under the container lock.
unsafe impl<T: Send + Sync, K: ?Sized> Send for Iter<T, K> {}

impl<T, K: ?Sized> Iter<T, K> {
    /// Iterate in ascending, non-destructive order.
    pub fn new(cont: &Obj<Container<T, K>>) -> Self {
        Self::with_options(cont, IterFlags::default())
    }

    pub fn with_options(cont: &Obj<Container<T, K>>, flags: IterFlags) -> Self {
        Iter {
            cont: cont.clone(),
            last: None,
            flags,
        }
    }

    /// Wrap the sole reference to a traversal's multi-match container in
    /// a consuming iterator; destroying the iterator destroys the
    /// container and everything still in it.
    pub(crate) fn for_multi(cont: Obj<Container<T, K>>) -> Self {
        Iter {
            cont,
            last: None,
            flags: IterFlags {
                unlink: true,
                ..IterFlags::default()
            },
        }
    }

    /// The container being iterated.
    pub fn container(&self) -> &Obj<Container<T, K>> {
        &self.cont
    }
}

impl<T, K: ?Sized> Iterator for Iter<T, K> {
    type Item = Obj<T>;

    fn next(&mut self) -> Option<Obj<T>> {
        let how = if self.flags.unlink {
            LockRequest::Write
        } else {
            LockRequest::Read
        };
        let cont: &Container<T, K> = &self.cont;
        let held = cont.acquire(how, self.flags.no_lock);
        let ret = cont.imp.iterator_next(cont, &mut self.last, self.flags);
        cont.release(held);
        ret
    }
}

impl<T, K: ?Sized> Drop for Iter<T, K> {
    fn drop(&mut self) {
        if let Some(last) = self.last.take() {
            // A read lock is enough: if this is the node's final
            // reference its destructor upgrades to write before
            // unlinking.
            let held = self.cont.acquire(LockRequest::Read, self.flags.no_lock);
            unsafe { obj::dec_ref(last) };
            self.cont.release(held);
        }
        // The container reference drops with the field.
    }
}
