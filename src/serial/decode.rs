//! Node tree → object graph.
//!
//! The materializer walks the decoded forest and rebuilds live objects:
//! primitive fields populate from their nodes, inside references re-link by
//! instance index and outside references re-link by name through the
//! caller's [`ExternTable`].
//!
//! Instances materialize on first demand from a reference edge:
//! default-construct the payload, register its handle in the session's
//! instance registry, *then* populate it from its node tree. Registering
//! before populating is what closes cycles — a self-loop or a mutual cycle
//! finds the half-built instance already in the registry and links to the
//! same allocation. Every edge citing one index resolves to one control
//! block, so sharing survives the round trip. The order in which instances
//! materialize is not observable to user types, because their hooks only
//! receive pointer identities — the moral analogue of a two-pass linker.
//!
//! Failure is total here (unlike the per-instance decoder): a dangling
//! index, an unresolved external name, a malformed instance or a node shape
//! mismatch fails the whole call. The registry's strong handles drop with
//! the session, undoing the allocations.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use twox_hash::XxHash64;

use super::node::{decode_nodes, DataNode};
use super::Deserialize;
use crate::binary::Binary;
use crate::datalog::print_error;
use crate::error::{Error, Result};
use crate::pointer::{Counted, ErasedCounted};

/// Registry of externally supplied objects for decoding: name → live handle.
///
/// The encoding side names addresses through a
/// [`NameTable`](super::NameTable); decoding resolves those names to the
/// handles registered here, so re-linked fields point at the caller's
/// objects — the exact addresses, not copies.
#[derive(Default)]
pub struct ExternTable {
    entries: HashMap<String, ErasedCounted>,
}

impl ExternTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live handle under `name`.
    ///
    /// The decoded graph must agree with the registered payload type; the
    /// table is type-erased and cannot check.
    pub fn insert<T>(&mut self, name: &str, target: &Counted<T>) {
        self.entries.insert(name.to_owned(), target.erase());
    }

    fn resolve(&self, name: &str) -> Option<&ErasedCounted> {
        self.entries.get(name)
    }
}

pub(crate) struct DecodeSession<'a> {
    nodes: &'a [DataNode],
    /// Instance index → materialized handle; populated on first demand.
    instances: HashMap<u32, ErasedCounted, BuildHasherDefault<XxHash64>>,
    externs: &'a ExternTable,
}

impl<'a> DecodeSession<'a> {
    fn materialize<T: Deserialize + Default>(&mut self, index: u32) -> Result<Counted<T>> {
        if let Some(entry) = self.instances.get(&index) {
            // Every edge citing this index shares one control block.
            return Ok(unsafe { entry.cast::<T>() });
        }
        let nodes: &'a [DataNode] = self.nodes;
        let node = nodes.get(index as usize).ok_or(Error::DanglingIndex(index))?;
        if matches!(node, DataNode::Nil) {
            return Err(Error::MalformedInstance(index));
        }
        let handle = Counted::new(T::default());
        // Register before populating so cycles through this instance
        // resolve to the allocation being built.
        self.instances.insert(index, handle.erase());
        let payload = handle.as_ptr();
        let mut deserializer = Deserializer {
            node,
            session: self,
        };
        unsafe { (*payload).deserialize(&mut deserializer)? };
        Ok(handle)
    }

    fn external<T>(&mut self, name: &str) -> Result<Counted<T>> {
        let entry = self
            .externs
            .resolve(name)
            .ok_or_else(|| Error::UnresolvedExternal(name.to_owned()))?;
        Ok(unsafe { entry.cast::<T>() })
    }
}

/// The read surface handed to [`Deserialize`] implementations: one node of
/// the forest plus the session that resolves reference edges.
pub struct Deserializer<'a, 's> {
    pub(crate) node: &'a DataNode,
    pub(crate) session: &'s mut DecodeSession<'a>,
}

impl<'a, 's> Deserializer<'a, 's> {
    /// Returns the node being read.
    pub fn node(&self) -> &'a DataNode {
        self.node
    }

    /// Populates any deserializable value from the current node.
    pub fn value<T: Deserialize>(&mut self, out: &mut T) -> Result<()> {
        out.deserialize(self)
    }

    /// Populates `out` from the struct entry under `key`.
    ///
    /// Key order inside the struct does not matter; the first occurrence of
    /// `key` wins. A missing key is a mismatch.
    pub fn field<T: Deserialize>(&mut self, key: &str, out: &mut T) -> Result<()> {
        let DataNode::Struct(pairs) = self.node else {
            return Err(Error::Mismatch(format!(
                "expected STRUCT, found {:?}",
                self.node.sign()
            )));
        };
        let node = pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
            .ok_or_else(|| Error::Mismatch(format!("missing field '{key}'")))?;
        let mut child = Deserializer {
            node,
            session: &mut *self.session,
        };
        out.deserialize(&mut child)
    }

    /// Returns a reader positioned on `node` within the same session.
    pub fn child(&mut self, node: &'a DataNode) -> Deserializer<'a, '_> {
        Deserializer {
            node,
            session: &mut *self.session,
        }
    }

    /// Resolves the current reference node to a strong handle.
    pub(crate) fn counted<T: Deserialize + Default>(&mut self) -> Result<Counted<T>> {
        match self.node {
            DataNode::InsideRef(index) => self.session.materialize::<T>(*index),
            DataNode::OutsideRef(name) => self.session.external::<T>(name),
            other => Err(Error::Mismatch(format!(
                "expected REFERENCE, found {:?}",
                other.sign()
            ))),
        }
    }
}

/// Decodes `binary` into `target`'s payload, re-linking the whole graph.
///
/// `target` supplies the root allocation (instance 0 populates in place)
/// and `externs` resolves outside references. Returns false — with the
/// first failure logged — on a bad header, a malformed root, a dangling
/// index, an unresolved external or a node shape mismatch; in that case the
/// instances materialized so far are released.
pub fn from_binary<T: Deserialize>(
    target: &Counted<T>,
    binary: &Binary,
    externs: &ExternTable,
) -> bool {
    if target.is_null() {
        print_error("deserialize: null target");
        return false;
    }
    let nodes = decode_nodes(binary.as_slice());
    if nodes.is_empty() {
        return false;
    }
    if matches!(nodes[0], DataNode::Nil) {
        print_error("deserialize: malformed instance 0");
        return false;
    }
    let mut session = DecodeSession {
        nodes: &nodes,
        instances: HashMap::default(),
        externs,
    };
    session.instances.insert(0, target.erase());
    let payload = target.as_ptr();
    let result = {
        let mut deserializer = Deserializer {
            node: &nodes[0],
            session: &mut session,
        };
        unsafe { (*payload).deserialize(&mut deserializer) }
    };
    match result {
        Ok(()) => true,
        Err(error) => {
            print_error(&format!("deserialize failed: {error}"));
            false
        }
    }
}
