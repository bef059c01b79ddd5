//! refstore: a reference-counted object and container runtime.
//!
//! The building block is [`Obj<T>`]: one allocation holding a validated
//! header (embedded lock, atomic reference count, magic word) followed by
//! the payload. Containers are themselves such objects; linking an object
//! wraps it in an internal reference-counted node attached to a hash
//! bucket, and traversals, iterators, and unlink-while-iterating all hang
//! off the node reference counts.
//!
//! - [`Obj`] / [`RawObj`] — allocation, reference counting, per-object
//!   locking (none, mutex, or reader/writer with `adjust_lock`).
//! - [`alloc_hash`] / [`alloc_list`] — containers with configurable
//!   ordering, duplicate policy, and thread-safe access; a list is a
//!   single-bucket hash.
//! - [`Iter`] — cursor that pins its position so concurrent unlinks
//!   cannot strand it.
//! - [`GlobalHolder`] — rwlock-protected cell owning one shared reference.
//!
//! The `diag` feature compiles in global runtime counters, per-bucket
//! occupancy statistics, and the container integrity scan.

mod container;
mod diag;
mod error;
mod hash;
mod holder;
mod iter;
mod lock;
mod obj;

pub use container::{
    alloc_hash, alloc_list, CallbackResult, CmpFn, Container, ContainerOptions, DupPolicy,
    HashFn, InsertEnd, LinkOpts, Lookup, SearchBy, SearchOpts, SortFn, TraverseOrder, Verdict,
};
#[cfg(feature = "diag")]
pub use diag::{diag_stats, DiagStats};
pub use error::{CheckError, DupError, LinkError, ObjError};
pub use holder::GlobalHolder;
pub use iter::{Iter, IterFlags};
pub use lock::{AllocLock, LockRequest};
pub use obj::{cleanup, Obj, RawObj};
