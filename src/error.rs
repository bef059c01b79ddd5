//! Error types for the object and container runtime.

use thiserror::Error;

/// Errors raised by the object layer entry points.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ObjError {
    /// Null handle, or a handle whose magic word does not match. The
    /// offending pointer is logged; it is never dereferenced past the
    /// header check.
    #[error("null or foreign object handle")]
    InvalidHandle,

    /// An allocation parameter was out of range (for containers, a zero
    /// bucket count).
    #[error("invalid allocation options")]
    InvalidOptions,
}

/// Errors raised by [`Container::link`](crate::Container::link).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The container's duplicate policy rejected the object.
    #[error("duplicate rejected by container policy")]
    Duplicate,

    /// The container is in its destructor; late links are refused.
    #[error("container is being destroyed")]
    Destroying,
}

/// Errors raised by [`Container::dup`](crate::Container::dup) and
/// [`Container::clone_container`](crate::Container::clone_container).
#[derive(Debug, Error)]
pub enum DupError {
    /// An element of the source could not be linked into the destination.
    /// The destination has been emptied.
    #[error("failed to link an element into the destination container")]
    LinkFailed,

    /// The empty clone itself could not be allocated.
    #[error(transparent)]
    Container(#[from] ObjError),
}

/// Errors raised by the container integrity scan.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// The scan found an inconsistency; the message names the first one.
    #[error("container integrity check failed: {0}")]
    Corrupt(String),
}
