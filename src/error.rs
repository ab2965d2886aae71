//! Centralized error handling.
//!
//! Every failure that travels as a value goes through [`Error`]; the library
//! never panics on bad input. Two failure kinds deliberately do *not* travel
//! as values:
//!
//! - **Allocation exhaustion** at the raw-memory layer is a null pointer from
//!   the allocator (see [`crate::memory`]); it only becomes [`Error::Exhausted`]
//!   once a higher layer gives up.
//! - **Null-pointer dereference** on a smart pointer is logged through
//!   [`crate::datalog`] and aborts the process — returning garbage is not an
//!   option there.
//!
//! ## Error categories
//!
//! - **Format** ([`Error::Format`]): the blob is not a valid binary — bad
//!   magic, wrong version, unknown sign, truncated scalar, bad UTF-8.
//! - **Mismatch** ([`Error::Mismatch`]): a well-formed node did not have the
//!   shape the target type expected (wrong sign, missing struct field).
//! - **MalformedInstance** / **DanglingIndex** / **UnresolvedExternal**:
//!   graph-level failures raised while re-linking instances.
//!
//! Errors are `Clone` so they can be stored by sessions and re-reported.

use std::fmt;

/// A specialized `Result` type for serialization and materialization.
pub type Result<T> = std::result::Result<T, Error>;

/// The master error enum covering all failure domains of the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The allocator ran out of memory and a fallible caller gave up.
    Exhausted,

    /// The byte stream is not a well-formed binary.
    ///
    /// The string describes the violation (unknown sign, truncated value,
    /// invalid UTF-8, trailing bytes, ...).
    Format(String),

    /// A node was well-formed but did not match the target type.
    Mismatch(String),

    /// The instance at this index could not be parsed; materializing
    /// anything that references it fails.
    MalformedInstance(u32),

    /// An inside reference names an instance index that does not exist.
    DanglingIndex(u32),

    /// An outside reference names an external object the caller did not
    /// register.
    UnresolvedExternal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "Allocator Exhausted"),
            Self::Format(s) => write!(f, "Format Error: {s}"),
            Self::Mismatch(s) => write!(f, "Type Mismatch: {s}"),
            Self::MalformedInstance(i) => write!(f, "Malformed Instance {i}"),
            Self::DanglingIndex(i) => write!(f, "Dangling Instance Index {i}"),
            Self::UnresolvedExternal(n) => write!(f, "Unresolved External Reference '{n}'"),
        }
    }
}

impl std::error::Error for Error {}
