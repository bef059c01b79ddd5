//! Global holder: a reader/writer-locked cell owning at most one object
//! reference, for atomic replace/fetch of a shared object.
//!
//! The lock protects only the slot, never the held object; callers use
//! the object's own embedded lock for that.

use parking_lot::RwLock;

use crate::obj::Obj;

pub struct GlobalHolder<T> {
    slot: RwLock<Option<Obj<T>>>,
}

impl<T> GlobalHolder<T> {
    /// An empty holder. Const, so holders can back `static` cells.
    pub const fn new() -> Self {
        GlobalHolder {
            slot: RwLock::new(None),
        }
    }

    /// Store a new reference (the count is bumped for the holder) and
    /// hand back the previous one *without* releasing it; the caller
    /// drains it.
    pub fn replace(&self, obj: Option<&Obj<T>>) -> Option<Obj<T>> {
        let mut slot = self.slot.write();
        core::mem::replace(&mut *slot, obj.cloned())
    }

    /// [`GlobalHolder::replace`], dropping the previous reference.
    /// Reports whether a prior value existed.
    pub fn replace_unref(&self, obj: Option<&Obj<T>>) -> bool {
        self.replace(obj).is_some()
    }

    /// Drop the held reference, if any.
    pub fn release(&self) {
        *self.slot.write() = None;
    }

    /// Take a counted reference to the held object.
    pub fn get(&self) -> Option<Obj<T>> {
        self.slot.read().clone()
    }
}

impl<T> Default for GlobalHolder<T> {
    fn default() -> Self {
        Self::new()
    }
}
