//! # ELEKi Core
//!
//! The runtime substrate of the ELEKi engine: pooled memory, tracked
//! reference pointers, a work pool, and — the reason the rest exists — a
//! **graph-aware parallel binary serializer**. Instead of treating data as
//! one monolithic stream, the serializer flattens an object graph into
//! per-instance frames whose layout permits both parallel emission and
//! parallel parsing, while keeping the reference topology — sharing,
//! cycles, externally named pointers — fully reconstructible.
//!
//! ## Subsystems
//!
//! | Module | Role |
//! |---|---|
//! | [`memory`] | Tiered slab allocator with malloc fallback; frame (arena) allocators |
//! | [`pointer`] | Unique / counted / weak handles over one control block per payload |
//! | [`tasks`] | Process-wide FIFO pool whose `join` can steal queued work inline |
//! | [`binary`] | Growable byte buffers on a pluggable allocator |
//! | [`serial`] | The binary format, encoder, decoder and materializer |
//! | [`datalog`] | The two-call logging facade (`print` / `print_error`) |
//!
//! The serializer leans on the other three in a tight loop: every newly
//! discovered referent becomes a [`tasks`] task writing its own [`binary`]
//! buffer allocated through [`memory`], and decoded graphs come back as
//! [`pointer`] handles so shared structure survives.
//!
//! ## A round trip
//!
//! ```rust
//! use elekicore::pointer::Counted;
//! use elekicore::serial::{
//!     from_binary, to_binary, Deserialize, Deserializer, ExternTable, NameTable, Serialize,
//!     Serializer,
//! };
//! use elekicore::Result;
//!
//! #[derive(Default)]
//! struct Scene {
//!     name: String,
//!     player: Counted<Body>,
//!     camera_target: Counted<Body>, // shares the player's body
//! }
//!
//! #[derive(Default)]
//! struct Body {
//!     x: f32,
//!     y: f32,
//! }
//!
//! impl Serialize for Scene {
//!     fn serialize(&self, s: &mut Serializer<'_>) {
//!         s.begin_struct()
//!             .field("name", &self.name)
//!             .field("player", &self.player)
//!             .field("camera_target", &self.camera_target)
//!             .end();
//!     }
//! }
//! impl Deserialize for Scene {
//!     fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
//!         d.field("name", &mut self.name)?;
//!         d.field("player", &mut self.player)?;
//!         d.field("camera_target", &mut self.camera_target)?;
//!         Ok(())
//!     }
//! }
//! impl Serialize for Body {
//!     fn serialize(&self, s: &mut Serializer<'_>) {
//!         s.begin_struct().field("x", &self.x).field("y", &self.y).end();
//!     }
//! }
//! impl Deserialize for Body {
//!     fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
//!         d.field("x", &mut self.x)?;
//!         d.field("y", &mut self.y)?;
//!         Ok(())
//!     }
//! }
//!
//! let body = Counted::new(Body { x: 1.0, y: 2.0 });
//! let scene = Scene {
//!     name: "overworld".into(),
//!     player: body.clone(),
//!     camera_target: body,
//! };
//!
//! let blob = to_binary(&scene, &NameTable::new());
//!
//! let restored = Counted::new(Scene::default());
//! assert!(from_binary(&restored, &blob, &ExternTable::new()));
//! // The two edges still point at one body.
//! let restored = restored.get().unwrap();
//! assert!(std::ptr::eq(
//!     restored.player.get().unwrap() as *const Body,
//!     restored.camera_target.get().unwrap() as *const Body,
//! ));
//! ```
//!
//! ## Error handling
//!
//! Bad input never panics: decode failures are logged values (see
//! [`error`]), malformed instances degrade to placeholders, and the only
//! aborting condition is dereferencing a null handle — which is a contract
//! violation, not input.
//!
//! Unsafe code is concentrated where the design demands raw memory: the
//! allocator internals, the control blocks, the buffer, and the two
//! lifetime-erasure shims that hand borrowed data to the task pool (both
//! joined before their borrows expire).

#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod binary;
pub mod datalog;
pub mod error;
pub mod memory;
pub mod pointer;
pub mod serial;
pub mod tasks;

pub use binary::Binary;
pub use error::{Error, Result};
pub use memory::{Allocator, Memory};
pub use pointer::{Counted, ErasedCounted, Unique, Weak};
pub use serial::{
    decode_nodes, from_binary, to_binary, DataNode, Deserialize, Deserializer, ExternTable,
    KeyValuePair, NameTable, Serialize, Serializer,
};
pub use tasks::{parallel, Task, TaskId, TaskPool, ThreadMode};
