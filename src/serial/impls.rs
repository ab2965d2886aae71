//! [`Serialize`]/[`Deserialize`] implementations for standard and crate
//! types.
//!
//! One impl pair per scalar width, generated by `serial_scalar!` — the
//! sign-to-writer table of the format, expressed as per-type trait impls.
//! Containers encode as `ARRAY` of their elements; a map element is a
//! [`KeyValuePair`] struct with the fixed keys `"key"` and `"value"`.
//! [`Counted`] and [`Weak`] edges go through the reference machinery so
//! graph identity survives; a null handle is a `NIL`, as is `Option::None`.
//!
//! `usize`/`isize` deliberately have no impls (their width is
//! host-dependent); pick an explicit width at the field.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use super::node::DataNode;
use super::{Deserialize, Deserializer, Serialize, Serializer};
use crate::binary::Binary;
use crate::error::{Error, Result};
use crate::pointer::{Counted, Weak};

fn mismatch(expected: &str, found: &DataNode) -> Error {
    Error::Mismatch(format!("expected {expected}, found {:?}", found.sign()))
}

macro_rules! serial_scalar {
    ($ty:ty, $node:ident, $write:ident) => {
        impl Serialize for $ty {
            fn serialize(&self, serializer: &mut Serializer<'_>) {
                serializer.$write(*self);
            }
        }

        impl Deserialize for $ty {
            fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
                match deserializer.node() {
                    DataNode::$node(value) => {
                        *self = *value;
                        Ok(())
                    }
                    other => Err(mismatch(stringify!($node), other)),
                }
            }
        }
    };
}

serial_scalar!(i8, I8, write_i8);
serial_scalar!(u8, U8, write_u8);
serial_scalar!(i16, I16, write_i16);
serial_scalar!(u16, U16, write_u16);
serial_scalar!(i32, I32, write_i32);
serial_scalar!(u32, U32, write_u32);
serial_scalar!(i64, I64, write_i64);
serial_scalar!(u64, U64, write_u64);
serial_scalar!(f32, F32, write_f32);
serial_scalar!(f64, F64, write_f64);

impl Serialize for bool {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.write_bool(*self);
    }
}

impl Deserialize for bool {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        match deserializer.node() {
            DataNode::Bool(value) => {
                *self = *value;
                Ok(())
            }
            other => Err(mismatch("TRUE or FALSE", other)),
        }
    }
}

// A char travels as its U32 scalar value and is re-validated on decode.
impl Serialize for char {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.write_u32(*self as u32);
    }
}

impl Deserialize for char {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        match deserializer.node() {
            DataNode::U32(value) => {
                *self = char::from_u32(*value)
                    .ok_or_else(|| Error::Mismatch(format!("invalid char scalar {value}")))?;
                Ok(())
            }
            other => Err(mismatch("U32", other)),
        }
    }
}

impl Serialize for String {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.write_str(self);
    }
}

impl Serialize for &str {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.write_str(self);
    }
}

impl Deserialize for String {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        match deserializer.node() {
            DataNode::Str(value) => {
                self.clear();
                self.push_str(value);
                Ok(())
            }
            other => Err(mismatch("STRING", other)),
        }
    }
}

impl Serialize for Binary {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.write_bytes(self.as_slice());
    }
}

impl Deserialize for Binary {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        match deserializer.node() {
            DataNode::Bin(bytes) => {
                let mut out = Binary::with_capacity(bytes.len());
                out.extend_from_slice(bytes);
                if out.failed() {
                    return Err(Error::Exhausted);
                }
                *self = out;
                Ok(())
            }
            other => Err(mismatch("BINARY", other)),
        }
    }
}

impl<T: Serialize> Serialize for Vec<T> {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.begin_array();
        for item in self {
            serializer.value(item);
        }
        serializer.end();
    }
}

impl<T: Deserialize + Default> Deserialize for Vec<T> {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        let DataNode::Array(items) = deserializer.node() else {
            return Err(mismatch("ARRAY", deserializer.node()));
        };
        self.clear();
        self.reserve(items.len());
        for item in items {
            let mut element = T::default();
            element.deserialize(&mut deserializer.child(item))?;
            self.push(element);
        }
        Ok(())
    }
}

impl<T: Serialize, const N: usize> Serialize for [T; N] {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.begin_array();
        for item in self {
            serializer.value(item);
        }
        serializer.end();
    }
}

impl<T: Deserialize, const N: usize> Deserialize for [T; N] {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        let DataNode::Array(items) = deserializer.node() else {
            return Err(mismatch("ARRAY", deserializer.node()));
        };
        if items.len() != N {
            return Err(Error::Mismatch(format!(
                "expected {N} elements, found {}",
                items.len()
            )));
        }
        for (slot, item) in self.iter_mut().zip(items) {
            slot.deserialize(&mut deserializer.child(item))?;
        }
        Ok(())
    }
}

impl<T: Serialize + Eq + Hash> Serialize for HashSet<T> {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.begin_array();
        for item in self {
            serializer.value(item);
        }
        serializer.end();
    }
}

impl<T: Deserialize + Default + Eq + Hash> Deserialize for HashSet<T> {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        let DataNode::Array(items) = deserializer.node() else {
            return Err(mismatch("ARRAY", deserializer.node()));
        };
        self.clear();
        for item in items {
            let mut element = T::default();
            element.deserialize(&mut deserializer.child(item))?;
            self.insert(element);
        }
        Ok(())
    }
}

impl<K: Serialize, V: Serialize> Serialize for HashMap<K, V> {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.begin_array();
        for (key, value) in self {
            serializer.begin_struct();
            serializer.field("key", key);
            serializer.field("value", value);
            serializer.end();
        }
        serializer.end();
    }
}

impl<K, V> Deserialize for HashMap<K, V>
where
    K: Deserialize + Default + Eq + Hash,
    V: Deserialize + Default,
{
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        let DataNode::Array(items) = deserializer.node() else {
            return Err(mismatch("ARRAY", deserializer.node()));
        };
        self.clear();
        for item in items {
            let mut pair = KeyValuePair::<K, V>::default();
            pair.deserialize(&mut deserializer.child(item))?;
            self.insert(pair.key, pair.value);
        }
        Ok(())
    }
}

impl<T: Serialize> Serialize for Option<T> {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        match self {
            Some(value) => {
                serializer.value(value);
            }
            None => {
                serializer.write_nil();
            }
        }
    }
}

impl<T: Deserialize + Default> Deserialize for Option<T> {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        if matches!(deserializer.node(), DataNode::Nil) {
            *self = None;
            return Ok(());
        }
        let mut value = T::default();
        value.deserialize(deserializer)?;
        *self = Some(value);
        Ok(())
    }
}

/// A key/value pair; encodes as a `STRUCT` with the fixed keys `"key"` and
/// `"value"`. Map containers encode as arrays of these.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValuePair<K, V> {
    /// The entry key.
    pub key: K,
    /// The entry value.
    pub value: V,
}

impl<K: Serialize, V: Serialize> Serialize for KeyValuePair<K, V> {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        serializer.begin_struct();
        serializer.field("key", &self.key);
        serializer.field("value", &self.value);
        serializer.end();
    }
}

impl<K: Deserialize, V: Deserialize> Deserialize for KeyValuePair<K, V> {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        deserializer.field("key", &mut self.key)?;
        deserializer.field("value", &mut self.value)?;
        Ok(())
    }
}

impl<T: Serialize + 'static> Serialize for Counted<T> {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        match self.get() {
            Some(value) => {
                serializer.reference(value);
            }
            None => {
                serializer.write_nil();
            }
        }
    }
}

impl<T: Deserialize + Default> Deserialize for Counted<T> {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        if matches!(deserializer.node(), DataNode::Nil) {
            *self = Counted::null();
            return Ok(());
        }
        *self = deserializer.counted::<T>()?;
        Ok(())
    }
}

impl<T: Serialize + 'static> Serialize for Weak<T> {
    fn serialize(&self, serializer: &mut Serializer<'_>) {
        match self.get() {
            Some(value) => {
                serializer.reference(value);
            }
            None => {
                serializer.write_nil();
            }
        }
    }
}

impl<T: Deserialize + Default> Deserialize for Weak<T> {
    fn deserialize(&mut self, deserializer: &mut Deserializer<'_, '_>) -> Result<()> {
        if matches!(deserializer.node(), DataNode::Nil) {
            *self = Weak::null();
            return Ok(());
        }
        // The registry (or the extern table's owner) holds the strong
        // handle; this edge only observes it.
        let counted = deserializer.counted::<T>()?;
        *self = counted.downgrade();
        Ok(())
    }
}
