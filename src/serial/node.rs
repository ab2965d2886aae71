//! Binary → node tree.
//!
//! [`decode_nodes`] verifies the header, slices the body into instance
//! frames and parses every frame into a [`DataNode`] tree on the task pool.
//! Parsing is purely local — a task reads exactly its own slice and shares
//! nothing — so the instances parse embarrassingly parallel.
//!
//! Failure is per-instance: a malformed frame (unknown sign, truncated
//! scalar, struct key that is not a string, inconsistent `BINARY` chunking,
//! invalid UTF-8, trailing bytes) logs and becomes a `NIL` placeholder node
//! without invalidating the other instances. A well-formed instance never
//! has a bare `NIL` payload — null edges are inlined where they occur and
//! get no frame — so the placeholder is unambiguous, and the materializer
//! refuses to link anything that references it.

use super::format::{self, Sign, HEADER_SIZE};
use crate::datalog::print_error;
use crate::error::{Error, Result};
use crate::tasks::{parallel, Task, ThreadMode};

/// A tagged tree node: the intermediate representation between raw bytes
/// and user objects. Built by the decoder, consumed by the materializer;
/// nodes do not outlive one decode call.
#[derive(Debug, Clone, PartialEq)]
pub enum DataNode {
    /// An `I8` scalar.
    I8(i8),
    /// A `U8` scalar.
    U8(u8),
    /// An `I16` scalar.
    I16(i16),
    /// A `U16` scalar.
    U16(u16),
    /// An `I32` scalar.
    I32(i32),
    /// A `U32` scalar.
    U32(u32),
    /// An `I64` scalar.
    I64(i64),
    /// A `U64` scalar.
    U64(u64),
    /// An `F32` scalar.
    F32(f32),
    /// An `F64` scalar.
    F64(f64),
    /// A `TRUE` or `FALSE` sign.
    Bool(bool),
    /// A null edge — or, at the top of an instance, the malformed-instance
    /// placeholder.
    Nil,
    /// A reference to another instance by body index.
    InsideRef(u32),
    /// A reference to an externally supplied object by name.
    OutsideRef(String),
    /// An ordered sequence of values.
    Array(Vec<DataNode>),
    /// String-keyed entries; order is preserved but not semantic.
    Struct(Vec<(String, DataNode)>),
    /// A UTF-8 string.
    Str(String),
    /// An opaque byte blob.
    Bin(Vec<u8>),
}

impl DataNode {
    /// Returns the sign this node was parsed from.
    pub fn sign(&self) -> Sign {
        match self {
            Self::I8(_) => Sign::I8,
            Self::U8(_) => Sign::U8,
            Self::I16(_) => Sign::I16,
            Self::U16(_) => Sign::U16,
            Self::I32(_) => Sign::I32,
            Self::U32(_) => Sign::U32,
            Self::I64(_) => Sign::I64,
            Self::U64(_) => Sign::U64,
            Self::F32(_) => Sign::F32,
            Self::F64(_) => Sign::F64,
            Self::Bool(true) => Sign::True,
            Self::Bool(false) => Sign::False,
            Self::Nil => Sign::Nil,
            Self::InsideRef(_) | Self::OutsideRef(_) => Sign::Reference,
            Self::Array(_) => Sign::Array,
            Self::Struct(_) => Sign::Struct,
            Self::Str(_) => Sign::String,
            Self::Bin(_) => Sign::Binary,
        }
    }

    /// Looks a key up in a `Struct` node (first occurrence wins).
    pub fn get(&self, key: &str) -> Option<&DataNode> {
        match self {
            Self::Struct(pairs) => pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

struct SendSlice {
    pointer: *const u8,
    start: usize,
    size: usize,
}
// The blob outlives the decode call, which joins every parse task before
// returning.
unsafe impl Send for SendSlice {}

/// Decodes a blob into its instance forest (the root at index 0).
///
/// A blob without the exact magic and version yields an empty forest and an
/// error log. Malformed instances come back as `NIL` placeholders; the
/// well-formed rest of the forest is unaffected.
pub fn decode_nodes(binary: &[u8]) -> Vec<DataNode> {
    if !format::check_header(binary) {
        print_error("deserialize: not an ELEKIBINARY blob or wrong version");
        return Vec::new();
    }

    // Pass 1: find the instance frames. A truncated trailing frame still
    // occupies one (malformed) slot.
    let mut spans: Vec<Option<(usize, usize)>> = Vec::new();
    let mut position = HEADER_SIZE;
    while position < binary.len() {
        if binary.len() - position < 4 {
            spans.push(None);
            break;
        }
        let size = format::u32_host([
            binary[position],
            binary[position + 1],
            binary[position + 2],
            binary[position + 3],
        ]) as usize;
        position += 4;
        if binary.len() - position < size {
            spans.push(None);
            break;
        }
        spans.push(Some((position, size)));
        position += size;
    }

    // Pass 2: parse every frame on the pool.
    let mut tasks: Vec<Option<Task<Result<DataNode>>>> = Vec::with_capacity(spans.len());
    for span in &spans {
        tasks.push(span.map(|(start, size)| {
            let slice = SendSlice {
                pointer: binary.as_ptr(),
                start,
                size,
            };
            parallel(
                move || {
                    let slice = slice;
                    let bytes =
                        unsafe { std::slice::from_raw_parts(slice.pointer.add(slice.start), slice.size) };
                    Parser::new(bytes).parse()
                },
                ThreadMode::Pooled,
            )
        }));
    }

    let mut nodes = Vec::with_capacity(tasks.len());
    for (index, task) in tasks.into_iter().enumerate() {
        match task {
            None => {
                print_error(&format!("malformed instance {index}: truncated frame"));
                nodes.push(DataNode::Nil);
            }
            Some(mut task) => match task.join() {
                Some(Ok(node)) => nodes.push(node),
                Some(Err(error)) => {
                    print_error(&format!("malformed instance {index}: {error}"));
                    nodes.push(DataNode::Nil);
                }
                None => {
                    print_error(&format!("malformed instance {index}: parse task lost"));
                    nodes.push(DataNode::Nil);
                }
            },
        }
    }
    nodes
}

/// Recursive-descent parser over one instance payload.
struct Parser<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn parse(mut self) -> Result<DataNode> {
        let node = self.value()?;
        if self.position != self.bytes.len() {
            return Err(Error::Format("trailing bytes after value".into()));
        }
        Ok(node)
    }

    fn byte(&mut self) -> Result<u8> {
        if self.position >= self.bytes.len() {
            return Err(Error::Format("unexpected end of instance".into()));
        }
        let byte = self.bytes[self.position];
        self.position += 1;
        Ok(byte)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.bytes.len() - self.position < N {
            return Err(Error::Format("truncated scalar".into()));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.position..self.position + N]);
        self.position += N;
        Ok(out)
    }

    fn sign(&mut self) -> Result<Sign> {
        let byte = self.byte()?;
        Sign::from_u8(byte).ok_or_else(|| Error::Format(format!("unknown sign {byte}")))
    }

    fn value(&mut self) -> Result<DataNode> {
        let sign = self.sign()?;
        self.value_of(sign)
    }

    fn value_of(&mut self, sign: Sign) -> Result<DataNode> {
        match sign {
            Sign::End => Err(Error::Format("unexpected END".into())),
            Sign::I8 => Ok(DataNode::I8(self.take::<1>()?[0] as i8)),
            Sign::U8 => Ok(DataNode::U8(self.take::<1>()?[0])),
            Sign::I16 => Ok(DataNode::I16(format::u16_host(self.take()?) as i16)),
            Sign::U16 => Ok(DataNode::U16(format::u16_host(self.take()?))),
            Sign::I32 => Ok(DataNode::I32(format::u32_host(self.take()?) as i32)),
            Sign::U32 => Ok(DataNode::U32(format::u32_host(self.take()?))),
            Sign::I64 => Ok(DataNode::I64(format::u64_host(self.take()?) as i64)),
            Sign::U64 => Ok(DataNode::U64(format::u64_host(self.take()?))),
            Sign::F32 => Ok(DataNode::F32(format::f32_host(self.take()?))),
            Sign::F64 => Ok(DataNode::F64(format::f64_host(self.take()?))),
            Sign::True => Ok(DataNode::Bool(true)),
            Sign::False => Ok(DataNode::Bool(false)),
            Sign::Nil => Ok(DataNode::Nil),
            Sign::Reference => {
                let inner = self.sign()?;
                match inner {
                    Sign::U32 => Ok(DataNode::InsideRef(format::u32_host(self.take()?))),
                    Sign::String => Ok(DataNode::OutsideRef(self.string_body()?)),
                    other => Err(Error::Format(format!(
                        "reference must cite an index or a name, found {other:?}"
                    ))),
                }
            }
            Sign::Array => {
                let mut items = Vec::new();
                loop {
                    let sign = self.sign()?;
                    if sign == Sign::End {
                        break;
                    }
                    items.push(self.value_of(sign)?);
                }
                Ok(DataNode::Array(items))
            }
            Sign::Struct => {
                let mut pairs = Vec::new();
                loop {
                    let sign = self.sign()?;
                    if sign == Sign::End {
                        break;
                    }
                    if sign != Sign::String {
                        return Err(Error::Format(format!(
                            "struct key must be a string, found {sign:?}"
                        )));
                    }
                    let key = self.string_body()?;
                    let value = self.value()?;
                    pairs.push((key, value));
                }
                Ok(DataNode::Struct(pairs))
            }
            Sign::String => Ok(DataNode::Str(self.string_body()?)),
            Sign::Binary => {
                let mut bytes = Vec::new();
                loop {
                    let size = format::u32_host(self.take()?) as usize;
                    if self.bytes.len() - self.position < size {
                        return Err(Error::Format("truncated binary chunk".into()));
                    }
                    bytes.extend_from_slice(&self.bytes[self.position..self.position + size]);
                    self.position += size;
                    let next = self.byte()?;
                    if next == Sign::End.as_u8() {
                        break;
                    }
                    if next != Sign::Binary.as_u8() {
                        return Err(Error::Format(format!(
                            "binary chunk followed by sign {next}"
                        )));
                    }
                }
                Ok(DataNode::Bin(bytes))
            }
        }
    }

    /// Reads the body of a `STRING` whose sign is already consumed.
    fn string_body(&mut self) -> Result<String> {
        let start = self.position;
        loop {
            let byte = self
                .byte()
                .map_err(|_| Error::Format("unterminated string".into()))?;
            if byte == Sign::End.as_u8() {
                let bytes = &self.bytes[start..self.position - 1];
                return String::from_utf8(bytes.to_vec())
                    .map_err(|_| Error::Format("invalid UTF-8 in string".into()));
            }
        }
    }
}
