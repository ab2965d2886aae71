//! Graph-aware parallel binary serialization.
//!
//! This is the heart of the crate: it flattens an arbitrary object graph —
//! shared ownership, cycles and externally named pointers included — into
//! one binary blob, and rebuilds an equivalent graph from it. The layout is
//! chosen so both directions parallelize per instance:
//!
//! ```text
//! encode:  user value ──walk──▶ per-instance buffers ──stitch──▶ Binary
//!                        │  (one pooled task per referent)
//!                        └─ address→index map dedupes shared edges
//!
//! decode:  Binary ──scan──▶ instance frames ──parse──▶ DataNode forest
//!                             (one pooled task per frame)
//!          forest ──materialize──▶ object graph (links by index / name)
//! ```
//!
//! ## The two user surfaces
//!
//! Types opt in by implementing the trait pair:
//!
//! ```rust
//! use elekicore::serial::{Deserialize, Deserializer, Serialize, Serializer};
//! use elekicore::Result;
//!
//! #[derive(Default)]
//! struct Player {
//!     hp: u32,
//!     name: String,
//! }
//!
//! impl Serialize for Player {
//!     fn serialize(&self, s: &mut Serializer<'_>) {
//!         s.begin_struct()
//!             .field("hp", &self.hp)
//!             .field("name", &self.name)
//!             .end();
//!     }
//! }
//!
//! impl Deserialize for Player {
//!     fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
//!         d.field("hp", &mut self.hp)?;
//!         d.field("name", &mut self.name)?;
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Entry points: [`to_binary`] / [`from_binary`], with [`decode_nodes`]
//! exposed for callers that want the raw node forest.
//!
//! ## Identity, sharing, cycles
//!
//! [`Counted`](crate::pointer::Counted) and [`Weak`](crate::pointer::Weak)
//! fields are *reference edges*: every distinct referent gets exactly one
//! instance frame, every edge to it cites that frame's index, and a cycle
//! simply cites an index that is still being written. Decoding rebuilds one
//! allocation per frame, so two edges that shared a target before encoding
//! share one afterwards.
//!
//! Objects that must not be inlined at all — engine singletons, assets
//! owned elsewhere — are *named*: listed in a [`NameTable`] on encode, they
//! appear as `REFERENCE` + name and get no frame; listed in an
//! [`ExternTable`] on decode, the rebuilt fields point at the caller's
//! registered objects.

pub mod format;

mod decode;
mod encode;
mod impls;
mod node;

pub use decode::{from_binary, Deserializer, ExternTable};
pub use encode::{to_binary, NameTable, Serializer};
pub use impls::KeyValuePair;
pub use node::{decode_nodes, DataNode};

use crate::error::Result;

/// Types that can write themselves to a [`Serializer`].
///
/// Implementations stream the value through the typed writers; compound
/// types open an `ARRAY`/`STRUCT` and close it with `end`. Writing cannot
/// fail mid-stream — allocator exhaustion is sticky in the session buffers
/// and surfaces once per encode call.
pub trait Serialize {
    /// Writes this value.
    fn serialize(&self, serializer: &mut Serializer<'_>);
}

/// Types that can populate themselves from a [`Deserializer`].
///
/// Implementations read the mirror of what they wrote. Shape mismatches
/// and broken links are errors; the materializer fails the whole decode on
/// the first one.
pub trait Deserialize {
    /// Populates this value from the current node.
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()>;
}
