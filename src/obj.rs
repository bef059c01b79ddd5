//! Reference-counted objects with an embedded lock and a validated header.
//!
//! Every object is one allocation: a fixed header (embedded lock, atomic
//! reference count, magic word) immediately followed by the payload. The
//! externally visible handle points at the payload; the header sits at a
//! negative offset and is recovered arithmetically, so raw handles coming
//! back from foreign code can be validated against the magic word before
//! anything else is touched.
//!
//! [`Obj<T>`] is the owning handle: `Clone` adds a reference, `Drop`
//! removes one, and the payload destructor runs exactly once when the
//! count reaches zero. [`RawObj<T>`] is the unvalidated `Copy` handle for
//! callers that manage counts by hand; all of its entry points check the
//! magic word and report [`ObjError::InvalidHandle`] instead of crashing.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::{offset_of, ManuallyDrop};
use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic::{fence, AtomicI32, AtomicU32, Ordering};

use tracing::error;

use crate::diag;
use crate::error::ObjError;
use crate::lock::{AllocLock, LockCore, LockRequest};

/// Magic word stamped into every live header, cleared on destruction.
const MAGIC: u32 = 0x0B7E_C7ED;

/// Payload slot. The union pads the slot to at least one machine word so
/// the destroy path can always zero the first word of the payload area.
#[repr(C)]
union PayloadSlot<T> {
    value: ManuallyDrop<T>,
    word: usize,
}

/// Header plus payload. The payload is last so the handle address is
/// stable and the header is recoverable at a fixed negative offset.
#[repr(C)]
pub(crate) struct ObjCore<T> {
    lock: LockCore,
    refcount: AtomicI32,
    magic: AtomicU32,
    payload: UnsafeCell<PayloadSlot<T>>,
}

#[inline]
fn payload_offset<T>() -> usize {
    offset_of!(ObjCore<T>, payload)
}

/// Recover the header from a payload pointer. The pointer must have been
/// produced by [`Obj::alloc_options`]; no validation is performed here.
#[inline]
pub(crate) unsafe fn core_of<T>(payload: NonNull<T>) -> NonNull<ObjCore<T>> {
    NonNull::new_unchecked(payload.as_ptr().byte_sub(payload_offset::<T>()) as *mut ObjCore<T>)
}

/// Borrow the embedded lock of an object through its payload reference.
pub(crate) unsafe fn lock_of<T>(payload: &T) -> &LockCore {
    &(*core_of(NonNull::from(payload)).as_ptr()).lock
}

/// Validate a raw payload pointer: non-null and carrying the live magic.
/// Logs one line and reports `InvalidHandle` otherwise.
unsafe fn validate<T>(payload: *const T) -> Result<NonNull<ObjCore<T>>, ObjError> {
    let Some(p) = NonNull::new(payload as *mut T) else {
        error!("object handle is null");
        return Err(ObjError::InvalidHandle);
    };
    let core = core_of(p);
    let magic = core.as_ref().magic.load(Ordering::Acquire);
    if magic != MAGIC {
        if magic == 0 {
            error!(handle = ?payload, "bad magic number: object is likely destroyed");
        } else {
            error!(handle = ?payload, magic, "bad magic number on object handle");
        }
        return Err(ObjError::InvalidHandle);
    }
    Ok(core)
}

/// Add one reference. The caller must hold at least one reference already.
pub(crate) unsafe fn inc_ref<T>(payload: NonNull<T>) {
    let core = core_of(payload);
    let prior = core.as_ref().refcount.fetch_add(1, Ordering::Relaxed);
    debug_assert!(prior > 0, "reference added to a dead object");
    if prior == i32::MAX {
        // Follow Rc semantics: abort on overflow rather than continue unsafely.
        std::process::abort();
    }
    diag::refs_changed(1);
}

/// Remove one reference; destroys the object when the count reaches zero.
pub(crate) unsafe fn dec_ref<T>(payload: NonNull<T>) {
    let core = core_of(payload);
    let prior = core.as_ref().refcount.fetch_sub(1, Ordering::Release);
    diag::refs_changed(-1);
    if prior != 1 {
        if prior <= 0 {
            error!(
                handle = ?payload.as_ptr(),
                refcount = prior - 1,
                "invalid refcount on object"
            );
        }
        return;
    }
    // Synchronize with every prior decrement before running the destructor.
    fence(Ordering::Acquire);
    destroy(core);
}

/// Run the destructor pipeline: payload drop, magic and first-word wipe,
/// lock release, block free. The magic is cleared after the payload drop
/// so destructors that re-enter the runtime (containers traverse
/// themselves here) still hold a valid handle.
unsafe fn destroy<T>(core: NonNull<ObjCore<T>>) {
    let core_ptr = core.as_ptr();
    let slot = (*core_ptr).payload.get();

    core::ptr::drop_in_place(core::ptr::addr_of_mut!((*slot).value).cast::<T>());

    (*core_ptr).magic.store(0, Ordering::Release);
    (*slot).word = 0;

    diag::object_destroyed(core::mem::size_of::<T>());
    // The embedded lock holds no resources beyond its bytes; freeing the
    // block releases it.
    drop(Box::from_raw(core_ptr));
}

/// Owning handle to a reference-counted object.
pub struct Obj<T> {
    payload: NonNull<T>,
    _marker: PhantomData<ObjCore<T>>,
}

unsafe impl<T: Send + Sync> Send for Obj<T> {}
unsafe impl<T: Send + Sync> Sync for Obj<T> {}

impl<T> Obj<T> {
    /// Allocate with the default lock variant (mutex).
    pub fn alloc(value: T) -> Obj<T> {
        Self::alloc_options(value, AllocLock::default())
    }

    /// Allocate an object around `value` with the chosen embedded lock.
    /// The reference count starts at 1.
    pub fn alloc_options(value: T, lock: AllocLock) -> Obj<T> {
        let core = Box::new(ObjCore {
            lock: LockCore::new(lock),
            refcount: AtomicI32::new(1),
            magic: AtomicU32::new(MAGIC),
            payload: UnsafeCell::new(PayloadSlot {
                value: ManuallyDrop::new(value),
            }),
        });
        diag::object_created(core::mem::size_of::<T>());
        let core_ptr = NonNull::from(Box::leak(core));
        let payload = unsafe {
            NonNull::new_unchecked(
                core_ptr.as_ptr().cast::<u8>().add(payload_offset::<T>()) as *mut T
            )
        };
        Obj {
            payload,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn core(&self) -> &ObjCore<T> {
        unsafe { core_of(self.payload).as_ref() }
    }

    /// Current reference count (a racy read, like `Ref` with delta zero).
    pub fn refcount(&self) -> i32 {
        self.core().refcount.load(Ordering::Relaxed)
    }

    /// Stable payload address; object identity for pointer matchers.
    pub fn as_ptr(&self) -> *const T {
        self.payload.as_ptr()
    }

    /// Whether two handles refer to the same object.
    pub fn ptr_eq(a: &Obj<T>, b: &Obj<T>) -> bool {
        a.payload == b.payload
    }

    /// Non-owning raw handle for manual reference management.
    pub fn raw(&self) -> RawObj<T> {
        RawObj {
            ptr: self.payload.as_ptr(),
        }
    }

    /// Consume the handle without touching the count; pair with
    /// [`Obj::from_raw`].
    pub fn into_raw(self) -> NonNull<T> {
        let p = self.payload;
        core::mem::forget(self);
        p
    }

    /// Reconstitute a handle from [`Obj::into_raw`], taking over the
    /// reference it carried.
    ///
    /// # Safety
    /// `payload` must come from `into_raw` and the reference it represents
    /// must not have been consumed by anything else.
    pub unsafe fn from_raw(payload: NonNull<T>) -> Obj<T> {
        Obj {
            payload,
            _marker: PhantomData,
        }
    }

    /// Lock variant this object was allocated with.
    pub fn lock_style(&self) -> AllocLock {
        self.core().lock.style()
    }

    /// Acquire the embedded lock. No-op for the lock-free variant.
    pub fn lock(&self, how: LockRequest) {
        self.core().lock.lock(how);
    }

    /// Try to acquire the embedded lock without blocking. The lock-free
    /// variant always reports success.
    pub fn try_lock(&self, how: LockRequest) -> bool {
        self.core().lock.try_lock(how)
    }

    /// Release the embedded lock.
    pub fn unlock(&self) {
        self.core().lock.unlock();
    }

    /// Adjust an already-held rwlock to `how`; see the lock adapter for
    /// the mode-switch caveats. Returns the level held on entry.
    pub fn adjust_lock(&self, how: LockRequest, keep_stronger: bool) -> LockRequest {
        self.core().lock.adjust(how, keep_stronger)
    }

    /// Address of the embedded mutex when the variant is mutex, for
    /// coordinating external condition-style waits. `None` otherwise.
    pub fn mutex_addr(&self) -> Option<NonNull<()>> {
        self.core().lock.mutex_addr()
    }
}

impl<T> Clone for Obj<T> {
    fn clone(&self) -> Self {
        unsafe { inc_ref(self.payload) };
        Obj {
            payload: self.payload,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Obj<T> {
    fn drop(&mut self) {
        unsafe { dec_ref(self.payload) };
    }
}

impl<T> Deref for Obj<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.payload.as_ref() }
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Obj")
            .field("refcount", &self.refcount())
            .field("payload", &**self)
            .finish()
    }
}

/// Drop an optional reference; no-op on `None`.
pub fn cleanup<T>(obj: Option<Obj<T>>) {
    drop(obj);
}

/// Copyable, non-owning object handle.
///
/// This is the foreign-code surface: a bare payload address whose header
/// is re-validated on every entry point. It does not keep the object
/// alive; using it after the last reference is gone yields
/// [`ObjError::InvalidHandle`] when the magic has been wiped, but the
/// runtime cannot detect every stale pointer.
pub struct RawObj<T> {
    ptr: *const T,
}

impl<T> Clone for RawObj<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for RawObj<T> {}

impl<T> RawObj<T> {
    /// Wrap a payload address. Null is accepted; every operation on a
    /// null handle fails with `InvalidHandle`.
    pub fn new(ptr: *const T) -> RawObj<T> {
        RawObj { ptr }
    }

    pub fn as_ptr(self) -> *const T {
        self.ptr
    }

    /// Add `delta` to the reference count and return the prior value.
    /// Delta zero reads the count. A decrement that reaches zero runs the
    /// destructor pipeline; one that goes below zero is logged and the
    /// destructor is not re-run.
    ///
    /// # Safety
    /// The pointer must either be dangling-but-unreachable (null) or point
    /// into an allocation that is still live; the magic check cannot
    /// rescue a pointer whose memory has been reused.
    pub unsafe fn ref_delta(self, delta: i32) -> Result<i32, ObjError> {
        let core = validate(self.ptr)?;
        let core_ref = core.as_ref();
        if delta == 0 {
            return Ok(core_ref.refcount.load(Ordering::Relaxed));
        }
        let prior = core_ref.refcount.fetch_add(delta, Ordering::AcqRel);
        diag::refs_changed(delta);
        let current = prior + delta;
        if current > 0 {
            return Ok(prior);
        }
        if current < 0 {
            error!(
                handle = ?self.ptr,
                refcount = current,
                "invalid refcount on object"
            );
            return Ok(prior);
        }
        fence(Ordering::Acquire);
        destroy(core);
        Ok(prior)
    }

    /// Read the reference count without changing it.
    ///
    /// # Safety
    /// Same liveness requirement as [`RawObj::ref_delta`].
    pub unsafe fn refcount(self) -> Result<i32, ObjError> {
        self.ref_delta(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Tracked {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    // Invariant: the count starts at 1, clones add, drops remove, and the
    // payload destructor runs exactly once at zero.
    #[test]
    fn refcount_lifecycle_runs_destructor_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let a = Obj::alloc(Tracked {
            drops: drops.clone(),
        });
        assert_eq!(a.refcount(), 1);

        let b = a.clone();
        assert_eq!(a.refcount(), 2);

        drop(a);
        assert_eq!(b.refcount(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(b);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    // Invariant: delta zero is a plain read; positive and negative deltas
    // return the prior value.
    #[test]
    fn raw_ref_delta_returns_prior_value() {
        let o = Obj::alloc(7u64);
        let raw = o.raw();
        unsafe {
            assert_eq!(raw.ref_delta(0), Ok(1));
            assert_eq!(raw.ref_delta(1), Ok(1));
            assert_eq!(raw.refcount(), Ok(2));
            assert_eq!(raw.ref_delta(-1), Ok(2));
            assert_eq!(raw.refcount(), Ok(1));
        }
    }

    // Invariant: a null handle is reported, not dereferenced.
    #[test]
    fn null_handle_is_invalid() {
        let raw: RawObj<u64> = RawObj::new(core::ptr::null());
        assert_eq!(unsafe { raw.ref_delta(1) }, Err(ObjError::InvalidHandle));
    }

    // Invariant: a handle whose magic is gone (the state every destroyed
    // object is left in) fails validation without touching the payload.
    #[test]
    fn cleared_magic_is_invalid() {
        let core = Box::new(ObjCore::<u64> {
            lock: LockCore::new(AllocLock::None),
            refcount: AtomicI32::new(1),
            magic: AtomicU32::new(0),
            payload: UnsafeCell::new(PayloadSlot {
                value: ManuallyDrop::new(99),
            }),
        });
        let payload = unsafe {
            (core.as_ref() as *const ObjCore<u64>)
                .cast::<u8>()
                .add(payload_offset::<u64>()) as *const u64
        };
        let raw = RawObj::new(payload);
        assert_eq!(unsafe { raw.ref_delta(-1) }, Err(ObjError::InvalidHandle));
        // And with garbage in the magic word.
        core.magic.store(0xDEAD_BEEF, Ordering::Release);
        assert_eq!(unsafe { raw.ref_delta(1) }, Err(ObjError::InvalidHandle));
    }

    // Invariant: into_raw/from_raw round-trips the owned reference.
    #[test]
    fn raw_round_trip_preserves_count() {
        let drops = Arc::new(AtomicUsize::new(0));
        let a = Obj::alloc(Tracked {
            drops: drops.clone(),
        });
        let p = a.into_raw();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        let b = unsafe { Obj::from_raw(p) };
        assert_eq!(b.refcount(), 1);
        drop(b);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    // Invariant: mutex_addr exposes the mutex variant only.
    #[test]
    fn mutex_addr_by_variant() {
        assert!(Obj::alloc_options(1u8, AllocLock::Mutex).mutex_addr().is_some());
        assert!(Obj::alloc_options(1u8, AllocLock::RwLock).mutex_addr().is_none());
        assert!(Obj::alloc_options(1u8, AllocLock::None).mutex_addr().is_none());
    }

    // Invariant: cleanup is a no-op on None and one unref otherwise.
    #[test]
    fn cleanup_optional_handle() {
        cleanup::<u64>(None);
        let drops = Arc::new(AtomicUsize::new(0));
        let o = Obj::alloc(Tracked {
            drops: drops.clone(),
        });
        cleanup(Some(o));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    // Invariant: the embedded rwlock supports shared readers through the
    // public handle surface.
    #[test]
    fn object_lock_surface() {
        let o = Obj::alloc_options(5u32, AllocLock::RwLock);
        o.lock(LockRequest::Read);
        assert!(o.try_lock(LockRequest::Read));
        assert!(!o.try_lock(LockRequest::Write));
        o.unlock();
        o.unlock();

        o.lock(LockRequest::Mutex); // treated as write
        assert!(!o.try_lock(LockRequest::Read));
        o.unlock();
    }
}
