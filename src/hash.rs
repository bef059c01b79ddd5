//! Hash-bucket container variant.
//!
//! A fixed array of buckets, each a doubly linked list of nodes. Nodes
//! embed their own prev/next links so removal is O(1) given the node, and
//! nodes are themselves reference-counted objects: the bucket list holds
//! one reference and iterators pin the node they last returned with
//! another, so a traversal position survives concurrent unlinking. A node
//! whose object slot has been emptied is a *tombstone* — skipped by every
//! walk, kept alive only by iterator pins, and unlinked by its own
//! destructor (which upgrades the container lock if it has to).
//!
//! Without a hash function the container is allocated with a single
//! bucket and a constant-zero hash, which makes it an ordered list.

use core::cell::{Cell, UnsafeCell};
use core::cmp::Ordering as CmpOrdering;
use core::fmt::{self, Write as _};
use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use tracing::{error, warn};

use crate::container::{
    alloc_hash, alloc_list, Backend, CallbackResult, Container, ContainerOptions, DupPolicy,
    HashFn, InsertEnd, LinkOpts, Lookup, SearchBy, SearchOpts, TraverseOrder, Verdict,
};
#[cfg(feature = "diag")]
use crate::error::CheckError;
use crate::error::{LinkError, ObjError};
use crate::iter::{Iter, IterFlags};
use crate::lock::{AllocLock, LockRequest};
use crate::obj::{self, Obj};

/// One stored object's slot in a bucket list.
///
/// All fields are read and written only under the owning container's
/// embedded lock (list links and the object slot change only under the
/// write lock), which is what makes the `Cell`s sound to share.
pub(crate) struct Node<T, K: ?Sized> {
    prev: Cell<Option<NonNull<Node<T, K>>>>,
    next: Cell<Option<NonNull<Node<T, K>>>>,
    /// The stored object; `None` marks a tombstone.
    obj: UnsafeCell<Option<Obj<T>>>,
    /// Owning container. Not a counted reference — container teardown is
    /// what drives node destruction, so no ownership cycle exists.
    container: Cell<Option<NonNull<Container<T, K>>>>,
    /// Index of the bucket holding this node.
    bucket: Cell<usize>,
}

unsafe impl<T: Send + Sync, K: ?Sized> Send for Node<T, K> {}
unsafe impl<T: Send + Sync, K: ?Sized> Sync for Node<T, K> {}

impl<T, K: ?Sized> Node<T, K> {
    fn new() -> Self {
        Node {
            prev: Cell::new(None),
            next: Cell::new(None),
            obj: UnsafeCell::new(None),
            container: Cell::new(None),
            bucket: Cell::new(0),
        }
    }

    fn has_obj(&self) -> bool {
        unsafe { (*self.obj.get()).is_some() }
    }

    fn obj_clone(&self) -> Option<Obj<T>> {
        unsafe { (*self.obj.get()).clone() }
    }

    fn take_obj(&self) -> Option<Obj<T>> {
        unsafe { (*self.obj.get()).take() }
    }

    fn put_obj(&self, o: Obj<T>) {
        unsafe { *self.obj.get() = Some(o) };
    }

    fn swap_objs(a: &Node<T, K>, b: &Node<T, K>) {
        unsafe { core::ptr::swap(a.obj.get(), b.obj.get()) };
    }
}

impl<T, K: ?Sized> Drop for Node<T, K> {
    fn drop(&mut self) {
        if let Some(cont) = self.container.get() {
            // Still linked: promote to the write lock (this can release
            // and re-acquire, so the caller's critical section is not
            // continuous across a node release) and leave the bucket.
            let cont = unsafe { cont.as_ref() };
            cont.adjust_self(LockRequest::Write, true);
            cont.imp.remove_node(self);
        }
        // The object slot drops with the node, releasing its reference.
    }
}

struct Bucket<T, K: ?Sized> {
    head: Cell<Option<NonNull<Node<T, K>>>>,
    tail: Cell<Option<NonNull<Node<T, K>>>>,
    #[cfg(feature = "diag")]
    elements: Cell<i32>,
    #[cfg(feature = "diag")]
    max_elements: Cell<i32>,
}

impl<T, K: ?Sized> Bucket<T, K> {
    fn new() -> Self {
        Bucket {
            head: Cell::new(None),
            tail: Cell::new(None),
            #[cfg(feature = "diag")]
            elements: Cell::new(0),
            #[cfg(feature = "diag")]
            max_elements: Cell::new(0),
        }
    }
}

enum InsertDisposition {
    Inserted,
    Replaced,
    Rejected,
}

/// Bucket array plus the hash function.
pub(crate) struct HashBackend<T, K: ?Sized> {
    hash_fn: Option<HashFn<T, K>>,
    buckets: Box<[Bucket<T, K>]>,
}

// Bucket and node state is only touched under the owning container's
// embedded lock.
unsafe impl<T: Send + Sync, K: ?Sized> Send for HashBackend<T, K> {}
unsafe impl<T: Send + Sync, K: ?Sized> Sync for HashBackend<T, K> {}

impl<T, K: ?Sized> HashBackend<T, K> {
    pub(crate) fn new(hash_fn: Option<HashFn<T, K>>, n_buckets: usize) -> Self {
        let buckets: Vec<Bucket<T, K>> = (0..n_buckets).map(|_| Bucket::new()).collect();
        HashBackend {
            hash_fn,
            buckets: buckets.into_boxed_slice(),
        }
    }

    fn bucket_of(&self, lookup: Lookup<'_, T, K>) -> usize {
        let h = match self.hash_fn {
            Some(f) => f(lookup),
            None => 0,
        };
        (h % self.buckets.len() as u64) as usize
    }

    fn insert_head(&self, idx: usize, node: NonNull<Node<T, K>>) {
        let b = &self.buckets[idx];
        let node_ref = unsafe { node.as_ref() };
        node_ref.prev.set(None);
        node_ref.next.set(b.head.get());
        match b.head.get() {
            Some(old) => unsafe { old.as_ref() }.prev.set(Some(node)),
            None => b.tail.set(Some(node)),
        }
        b.head.set(Some(node));
    }

    fn insert_tail(&self, idx: usize, node: NonNull<Node<T, K>>) {
        let b = &self.buckets[idx];
        let node_ref = unsafe { node.as_ref() };
        node_ref.next.set(None);
        node_ref.prev.set(b.tail.get());
        match b.tail.get() {
            Some(old) => unsafe { old.as_ref() }.next.set(Some(node)),
            None => b.head.set(Some(node)),
        }
        b.tail.set(Some(node));
    }

    fn insert_before(&self, idx: usize, cur: NonNull<Node<T, K>>, node: NonNull<Node<T, K>>) {
        let b = &self.buckets[idx];
        let cur_ref = unsafe { cur.as_ref() };
        let node_ref = unsafe { node.as_ref() };
        node_ref.prev.set(cur_ref.prev.get());
        node_ref.next.set(Some(cur));
        match cur_ref.prev.get() {
            Some(p) => unsafe { p.as_ref() }.next.set(Some(node)),
            None => b.head.set(Some(node)),
        }
        cur_ref.prev.set(Some(node));
    }

    fn insert_after(&self, idx: usize, cur: NonNull<Node<T, K>>, node: NonNull<Node<T, K>>) {
        let b = &self.buckets[idx];
        let cur_ref = unsafe { cur.as_ref() };
        let node_ref = unsafe { node.as_ref() };
        node_ref.next.set(cur_ref.next.get());
        node_ref.prev.set(Some(cur));
        match cur_ref.next.get() {
            Some(n) => unsafe { n.as_ref() }.prev.set(Some(node)),
            None => b.tail.set(Some(node)),
        }
        cur_ref.next.set(Some(node));
    }

    /// Detach a node from its bucket. Caller holds the write lock.
    pub(crate) fn remove_node(&self, node: &Node<T, K>) {
        let b = &self.buckets[node.bucket.get()];
        match node.prev.get() {
            Some(p) => unsafe { p.as_ref() }.next.set(node.next.get()),
            None => b.head.set(node.next.get()),
        }
        match node.next.get() {
            Some(n) => unsafe { n.as_ref() }.prev.set(node.prev.get()),
            None => b.tail.set(node.prev.get()),
        }
        node.prev.set(None);
        node.next.set(None);
    }

    /// First non-tombstone node of a bucket, from the walk's starting end.
    fn first_live(&self, idx: usize, descending: bool) -> Option<NonNull<Node<T, K>>> {
        let b = &self.buckets[idx];
        let start = if descending { b.tail.get() } else { b.head.get() };
        Self::live_from(start, descending)
    }

    fn live_from(
        mut cur: Option<NonNull<Node<T, K>>>,
        descending: bool,
    ) -> Option<NonNull<Node<T, K>>> {
        while let Some(p) = cur {
            let n = unsafe { p.as_ref() };
            if n.has_obj() {
                return Some(p);
            }
            cur = if descending { n.prev.get() } else { n.next.get() };
        }
        None
    }

    fn succ_live(node: &Node<T, K>, descending: bool) -> Option<NonNull<Node<T, K>>> {
        let next = if descending {
            node.prev.get()
        } else {
            node.next.get()
        };
        Self::live_from(next, descending)
    }

    /// Move a traversal pin to the next live node: pin the successor,
    /// release the current node (which may upgrade the lock and unlink a
    /// tombstone), and hand back the successor.
    fn advance_pin(
        cur: NonNull<Node<T, K>>,
        descending: bool,
    ) -> Option<NonNull<Node<T, K>>> {
        let next = Self::succ_live(unsafe { cur.as_ref() }, descending);
        if let Some(nx) = next {
            unsafe { obj::inc_ref(nx) };
        }
        unsafe { obj::dec_ref(cur) };
        next
    }

    /// Place a freshly built node in its bucket per the sort function and
    /// duplicate policy. Caller holds the write lock.
    fn insert_node(
        &self,
        cont: &Container<T, K>,
        idx: usize,
        node: &Obj<Node<T, K>>,
    ) -> InsertDisposition {
        let node_ptr = NonNull::from(&**node);
        let new_obj = node.obj_clone().expect("fresh node carries an object");
        let opts = cont.options();

        match opts.insert {
            InsertEnd::Begin => {
                if let Some(sort) = cont.sort() {
                    // Back-to-front scan: equal keys end up with the new
                    // node at the lesser end of the run.
                    let mut cur = self.buckets[idx].tail.get();
                    while let Some(cur_ptr) = cur {
                        let cur_node = unsafe { cur_ptr.as_ref() };
                        let Some(cur_obj) = cur_node.obj_clone() else {
                            cur = cur_node.prev.get();
                            continue;
                        };
                        match sort(&cur_obj, Lookup::Obj(&new_obj)) {
                            CmpOrdering::Greater => cur = cur_node.prev.get(),
                            CmpOrdering::Less => {
                                self.insert_after(idx, cur_ptr, node_ptr);
                                return InsertDisposition::Inserted;
                            }
                            CmpOrdering::Equal => match opts.dup {
                                DupPolicy::Allow => cur = cur_node.prev.get(),
                                DupPolicy::RejectKey => return InsertDisposition::Rejected,
                                DupPolicy::RejectObject => {
                                    if Obj::ptr_eq(&cur_obj, &new_obj) {
                                        return InsertDisposition::Rejected;
                                    }
                                    cur = cur_node.prev.get();
                                }
                                DupPolicy::Replace => {
                                    Node::swap_objs(cur_node, node);
                                    return InsertDisposition::Replaced;
                                }
                            },
                        }
                    }
                }
                self.insert_head(idx, node_ptr);
                InsertDisposition::Inserted
            }
            InsertEnd::End => {
                if let Some(sort) = cont.sort() {
                    let mut cur = self.buckets[idx].head.get();
                    while let Some(cur_ptr) = cur {
                        let cur_node = unsafe { cur_ptr.as_ref() };
                        let Some(cur_obj) = cur_node.obj_clone() else {
                            cur = cur_node.next.get();
                            continue;
                        };
                        match sort(&cur_obj, Lookup::Obj(&new_obj)) {
                            CmpOrdering::Less => cur = cur_node.next.get(),
                            CmpOrdering::Greater => {
                                self.insert_before(idx, cur_ptr, node_ptr);
                                return InsertDisposition::Inserted;
                            }
                            CmpOrdering::Equal => match opts.dup {
                                DupPolicy::Allow => cur = cur_node.next.get(),
                                DupPolicy::RejectKey => return InsertDisposition::Rejected,
                                DupPolicy::RejectObject => {
                                    if Obj::ptr_eq(&cur_obj, &new_obj) {
                                        return InsertDisposition::Rejected;
                                    }
                                    cur = cur_node.next.get();
                                }
                                DupPolicy::Replace => {
                                    Node::swap_objs(cur_node, node);
                                    return InsertDisposition::Replaced;
                                }
                            },
                        }
                    }
                }
                self.insert_tail(idx, node_ptr);
                InsertDisposition::Inserted
            }
        }
    }
}

impl<T, K: ?Sized> Backend<T, K> for HashBackend<T, K> {
    fn link_node(
        &self,
        cont: &Container<T, K>,
        obj: &Obj<T>,
        opts: LinkOpts,
    ) -> Result<(), LinkError> {
        if cont.destroying.load(Ordering::Acquire) {
            error!("link attempted on a container being destroyed");
            return Err(LinkError::Destroying);
        }

        let node = Obj::alloc_options(Node::new(), AllocLock::None);
        let idx = self.bucket_of(Lookup::Obj(obj));

        let held = cont.acquire(LockRequest::Write, opts.no_lock);

        node.put_obj(obj.clone());
        node.container.set(Some(NonNull::from(cont)));
        node.bucket.set(idx);

        let res = match self.insert_node(cont, idx, &node) {
            InsertDisposition::Inserted => {
                #[cfg(feature = "diag")]
                {
                    let b = &self.buckets[idx];
                    b.elements.set(b.elements.get() + 1);
                    if b.max_elements.get() < b.elements.get() {
                        b.max_elements.set(b.elements.get());
                    }
                }
                cont.elements.fetch_add(1, Ordering::AcqRel);
                // The bucket list takes over the node's initial reference.
                let _ = node.into_raw();
                Ok(())
            }
            InsertDisposition::Replaced => {
                // The node now holds the displaced object; detach it from
                // the container before the drop so its destructor does not
                // try to unlink.
                node.container.set(None);
                drop(node);
                Ok(())
            }
            InsertDisposition::Rejected => {
                node.container.set(None);
                drop(node);
                Err(LinkError::Duplicate)
            }
        };

        cont.release(held);
        res
    }

    fn traverse(
        &self,
        cont: &Container<T, K>,
        opts: SearchOpts,
        by: SearchBy<'_, T, K>,
        matcher: &mut dyn FnMut(&Obj<T>) -> Verdict,
    ) -> CallbackResult<T, K> {
        // Multiple results with data are linked into a transient list
        // container whose only reference ends up with the returned
        // iterator.
        let multi: Option<Obj<Container<T, K>>> = if opts.multiple && !opts.no_data {
            match alloc_list(AllocLock::None, ContainerOptions::default(), None, None) {
                Ok(c) => Some(c),
                Err(_) => return CallbackResult::None,
            }
        } else {
            None
        };

        let descending = matches!(opts.order, TraverseOrder::Descending | TraverseOrder::Post);

        // A pointer or key search makes the hash meaningful and enables
        // the sorted shortcut; otherwise scan every bucket.
        let (start_bucket, sort_fn) = match by.lookup() {
            Some(l) => (Some(self.bucket_of(l) as isize), cont.sort()),
            None => (None, None),
        };

        let n = self.buckets.len() as isize;
        let start: isize;
        let mut i: isize;
        let mut last: isize;
        if descending {
            match start_bucket {
                None => {
                    i = n - 1;
                    last = 0;
                    start = i;
                }
                Some(h) => {
                    i = h;
                    start = h;
                    last = if opts.wrap { 0 } else { h };
                }
            }
        } else {
            match start_bucket {
                None => {
                    i = 0;
                    last = n;
                    start = 0;
                }
                Some(h) => {
                    i = h;
                    start = h;
                    last = if opts.wrap { n } else { h + 1 };
                }
            }
        }

        let how = if opts.unlink {
            LockRequest::Write
        } else {
            LockRequest::Read
        };
        let held = cont.acquire(how, opts.no_lock);

        let mut ret: Option<Obj<T>> = None;

        'scan: loop {
            let in_range = if descending { last <= i } else { i < last };
            if !in_range {
                break;
            }
            let idx = i as usize;
            if let Some(first) = self.first_live(idx, descending) {
                unsafe { obj::inc_ref(first) };
                let mut pin = Some(first);
                let mut ended = false;

                while let Some(node_ptr) = pin {
                    let node = unsafe { node_ptr.as_ref() };

                    // Releasing a node reference can drop the lock for an
                    // upgrade, so the current object may be gone by the
                    // time the pin lands here.
                    let Some(cur_obj) = node.obj_clone() else {
                        pin = Self::advance_pin(node_ptr, descending);
                        continue;
                    };

                    // Sorted shortcut: before the key's run keep skipping;
                    // past it no further match is possible in this bucket.
                    if let (Some(sort), Some(lookup)) = (sort_fn, by.lookup()) {
                        let cmp = sort(&cur_obj, lookup);
                        let (skip, exhausted) = if descending {
                            (cmp == CmpOrdering::Greater, cmp == CmpOrdering::Less)
                        } else {
                            (cmp == CmpOrdering::Less, cmp == CmpOrdering::Greater)
                        };
                        if skip {
                            pin = Self::advance_pin(node_ptr, descending);
                            continue;
                        }
                        if exhausted {
                            break;
                        }
                    }

                    let verdict = matcher(&cur_obj);
                    drop(cur_obj);

                    if !verdict.matched {
                        if verdict.stop {
                            ended = true;
                            break;
                        }
                        pin = Self::advance_pin(node_ptr, descending);
                        continue;
                    }

                    // A match. The matcher itself may have unlinked the
                    // object, so only a still-live node is processed.
                    if node.has_obj() {
                        if !opts.no_data {
                            if let Some(mc) = &multi {
                                let stored =
                                    node.obj_clone().expect("live node checked above");
                                let _ = mc.link_with(&stored, LinkOpts { no_lock: true });
                            }
                        }
                        if opts.unlink {
                            cont.elements.fetch_sub(1, Ordering::AcqRel);
                            #[cfg(feature = "diag")]
                            {
                                let b = &self.buckets[node.bucket.get()];
                                b.elements.set(b.elements.get() - 1);
                            }
                            let taken = node.take_obj().expect("live node checked above");
                            if opts.no_data || multi.is_some() {
                                // The reference leaves the container (a
                                // multi match already took its own above).
                                drop(taken);
                            } else {
                                // Transferred to the caller.
                                ret = Some(taken);
                            }
                            // Release the bucket list's node reference;
                            // an iterator pin may keep the tombstone.
                            unsafe { obj::dec_ref(node_ptr) };
                        } else if !opts.no_data && multi.is_none() {
                            ret = Some(node.obj_clone().expect("live node checked above"));
                        }
                    }

                    if verdict.stop || !opts.multiple {
                        ended = true;
                        break;
                    }
                    pin = Self::advance_pin(node_ptr, descending);
                }

                if let Some(p) = pin {
                    unsafe { obj::dec_ref(p) };
                }
                if ended {
                    break 'scan;
                }
            }

            // A continuing hashed search wraps around so every bucket is
            // visited exactly once.
            if opts.wrap && start_bucket.is_some() {
                if descending {
                    if i == 0 {
                        i = n;
                        last = start + 1;
                    }
                } else if i == n - 1 {
                    i = -1;
                    last = start;
                }
            }
            if descending {
                i -= 1;
            } else {
                i += 1;
            }
        }

        cont.release(held);

        if let Some(mc) = multi {
            return CallbackResult::Many(Iter::for_multi(mc));
        }
        match ret {
            Some(o) => CallbackResult::One(o),
            None => CallbackResult::None,
        }
    }

    fn iterator_next(
        &self,
        cont: &Container<T, K>,
        last: &mut Option<NonNull<Node<T, K>>>,
        flags: IterFlags,
    ) -> Option<Obj<T>> {
        let descending = flags.descending;
        let n = self.buckets.len() as isize;

        let mut found: Option<NonNull<Node<T, K>>> = None;
        let mut cur_bucket: isize = match *last {
            Some(last_ptr) => {
                let last_node = unsafe { last_ptr.as_ref() };
                found = Self::succ_live(last_node, descending);
                last_node.bucket.get() as isize
            }
            None => {
                if descending {
                    n
                } else {
                    -1
                }
            }
        };
        while found.is_none() {
            cur_bucket += if descending { -1 } else { 1 };
            if cur_bucket < 0 || cur_bucket >= n {
                break;
            }
            found = self.first_live(cur_bucket as usize, descending);
        }

        let Some(node_ptr) = found else {
            // Exhausted; drop the pin so the final tombstone can go.
            if let Some(old) = last.take() {
                unsafe { obj::dec_ref(old) };
            }
            return None;
        };
        let node = unsafe { node_ptr.as_ref() };

        let ret: Obj<T>;
        if flags.unlink {
            cont.elements.fetch_sub(1, Ordering::AcqRel);
            #[cfg(feature = "diag")]
            {
                let b = &self.buckets[node.bucket.get()];
                b.elements.set(b.elements.get() - 1);
            }
            // The container's object reference transfers to the caller
            // and its node reference transfers to the iterator pin.
            ret = node
                .take_obj()
                .expect("live node lost its object while locked");
        } else {
            ret = node
                .obj_clone()
                .expect("live node lost its object while locked");
            unsafe { obj::inc_ref(node_ptr) };
        }

        if let Some(old) = last.replace(node_ptr) {
            unsafe { obj::dec_ref(old) };
        }
        Some(ret)
    }

    fn alloc_empty_clone(&self, cont: &Container<T, K>) -> Result<Obj<Container<T, K>>, ObjError> {
        alloc_hash(
            cont.lock_style(),
            cont.options(),
            self.buckets.len(),
            self.hash_fn,
            cont.sort(),
            cont.cmp(),
        )
    }

    fn destroy(&self, cont: &Container<T, K>) {
        // The buckets live inside the container allocation; nothing to
        // free here. Anything still linked after the teardown traversal
        // is a node pinned by a reference that was never released.
        let mut leaked = 0usize;
        for b in self.buckets.iter() {
            let mut cur = b.head.get();
            while let Some(p) = cur {
                leaked += 1;
                cur = unsafe { p.as_ref() }.next.get();
            }
        }
        if leaked != 0 {
            warn!(
                container = ?(cont as *const Container<T, K>),
                count = leaked,
                "node references leaked; an iterator was never destroyed"
            );
        }
    }

    fn stats(&self, _cont: &Container<T, K>, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Number of buckets: {}", self.buckets.len())?;
        #[cfg(feature = "diag")]
        {
            writeln!(out)?;
            writeln!(out, "{:>10} {:>10} {:>10}", "Bucket", "Objects", "Max")?;
            let mut suppressed = false;
            for (i, b) in self.buckets.iter().enumerate() {
                if b.max_elements.get() != 0 {
                    writeln!(
                        out,
                        "{:>10} {:>10} {:>10}",
                        i,
                        b.elements.get(),
                        b.max_elements.get()
                    )?;
                    suppressed = false;
                } else if !suppressed {
                    suppressed = true;
                    writeln!(out, "...")?;
                }
            }
        }
        Ok(())
    }

    #[cfg(feature = "diag")]
    fn integrity(&self, cont: &Container<T, K>) -> Result<(), CheckError> {
        let me: *const Container<T, K> = cont;
        let mut live: i64 = 0;
        for (idx, b) in self.buckets.iter().enumerate() {
            let mut prev: Option<NonNull<Node<T, K>>> = None;
            let mut prev_obj: Option<Obj<T>> = None;
            let mut cur = b.head.get();
            while let Some(p) = cur {
                let node = unsafe { p.as_ref() };
                if node.prev.get() != prev {
                    return Err(CheckError::Corrupt(format!(
                        "bucket {idx}: node back link does not match its predecessor"
                    )));
                }
                if node.container.get().map(|c| c.as_ptr().cast_const()) != Some(me) {
                    return Err(CheckError::Corrupt(format!(
                        "bucket {idx}: node container back-pointer is wrong"
                    )));
                }
                if node.bucket.get() != idx {
                    return Err(CheckError::Corrupt(format!(
                        "bucket {idx}: node thinks it is in bucket {}",
                        node.bucket.get()
                    )));
                }
                if let Some(o) = node.obj_clone() {
                    live += 1;
                    if let (Some(sort), Some(po)) = (cont.sort(), &prev_obj) {
                        if sort(po, Lookup::Obj(&o)) == CmpOrdering::Greater {
                            return Err(CheckError::Corrupt(format!(
                                "bucket {idx}: nodes out of sort order"
                            )));
                        }
                    }
                    prev_obj = Some(o);
                }
                prev = Some(p);
                cur = node.next.get();
            }
            if b.tail.get() != prev {
                return Err(CheckError::Corrupt(format!(
                    "bucket {idx}: tail does not match the last node"
                )));
            }
        }
        let counted = i64::from(cont.elements.load(Ordering::Relaxed));
        if live != counted {
            return Err(CheckError::Corrupt(format!(
                "element count {counted} does not match {live} live nodes"
            )));
        }
        Ok(())
    }
}
