//! Object graph → binary.
//!
//! Encoding flattens an arbitrary object graph — shared ownership, cycles
//! and externally named pointers included — into one blob, emitting the
//! per-instance payloads in parallel.
//!
//! ## How a call proceeds
//!
//! 1. A [`SerializeSession`] is created: the per-instance buffers, the
//!    address→index map, the address→name map and the outstanding task
//!    list, all behind one mutex. The root's address is registered as
//!    instance 0 *before* traversal, so a self-loop on the root resolves.
//! 2. The root serializes into buffer 0 on the calling thread. Whenever a
//!    reference edge reaches a new address, [`Serializer::reference`]
//!    assigns the next instance index, allocates that instance's buffer and
//!    enqueues a pooled task that serializes the referent into it — then
//!    emits the reference token and continues without waiting. Edges to
//!    known addresses emit their existing index; edges to named addresses
//!    emit the name instead and get no buffer.
//! 3. The drain loop repeatedly takes the session task list and joins every
//!    task. A join may steal its target and run it inline, and stolen tasks
//!    may enqueue more work, so the loop runs until the list stays empty —
//!    this terminates even when the pool is saturated with this very
//!    encoder's tasks.
//! 4. The stitch computes each frame's offset by prefix sum and copies the
//!    header and all frames into the output. Frame regions are disjoint, so
//!    the copies run in parallel.
//!
//! Only its owning task ever writes a given buffer; the address maps are
//! the sole cross-task state and sit behind the session mutex, held for
//! map lookups only — never across a join or a user callback.
//!
//! Allocator exhaustion does not interrupt traversal: buffers go sticky
//! (see [`Binary`]) and the stitch reports once, yielding an empty blob and
//! an error log.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

use rayon::prelude::*;
use twox_hash::XxHash64;

use super::format::{self, Endian, Sign, HEADER_SIZE};
use super::Serialize;
use crate::binary::Binary;
use crate::datalog::print_error;
use crate::pointer::Counted;
use crate::tasks::{parallel, Task, ThreadMode};

type AddressMap<V> = HashMap<usize, V, BuildHasherDefault<XxHash64>>;

/// Registry of externally named objects for encoding: address → name.
///
/// An edge to a registered address encodes as `REFERENCE` + `STRING` and
/// the target gets no instance frame; the decoding side supplies the same
/// names through [`ExternTable`](super::ExternTable).
#[derive(Debug, Default)]
pub struct NameTable {
    names: AddressMap<String>,
}

impl NameTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the payload of `target`.
    pub fn insert<T>(&mut self, target: &Counted<T>, name: &str) {
        if let Some(value) = target.get() {
            self.insert_ref(value, name);
        }
    }

    /// Names a plain object by its address.
    pub fn insert_ref<T>(&mut self, target: &T, name: &str) {
        self.names
            .insert(target as *const T as usize, name.to_owned());
    }
}

pub(crate) struct SerializeSession {
    state: Mutex<EncodeState>,
}

struct EncodeState {
    /// Per-instance buffers, boxed so their addresses survive list growth.
    buffers: Vec<Box<Binary>>,
    /// Visited referent address → instance index.
    ids: AddressMap<u32>,
    /// Referent address → external name.
    names: AddressMap<String>,
    /// Outstanding per-instance emission tasks.
    tasks: Vec<Task<()>>,
}

impl SerializeSession {
    fn lock(&self) -> MutexGuard<'_, EncodeState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

struct SendConst(*const ());
// Referents are only read by the emission task, and the drain joins every
// task before the encode call returns the borrow.
unsafe impl Send for SendConst {}

struct SendBuffer(*mut Binary);
// Each buffer is written by exactly one task; the box keeps its address
// stable while the session list grows.
unsafe impl Send for SendBuffer {}

/// The streaming write surface handed to [`Serialize`] implementations.
///
/// Typed writers append tagged values to the current instance buffer;
/// [`reference`](Self::reference) is the graph-aware edge writer. Writers
/// return `&mut Self` so field sequences chain.
pub struct Serializer<'a> {
    binary: &'a mut Binary,
    session: &'a Arc<SerializeSession>,
}

impl<'a> Serializer<'a> {
    fn sign(&mut self, sign: Sign) {
        self.binary.push(sign.as_u8());
    }

    /// Writes any serializable value inline.
    pub fn value<T: Serialize>(&mut self, value: &T) -> &mut Self {
        value.serialize(self);
        self
    }

    /// Writes an `I8` value.
    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.sign(Sign::I8);
        self.binary.push(value as u8);
        self
    }

    /// Writes a `U8` value.
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.sign(Sign::U8);
        self.binary.push(value);
        self
    }

    /// Writes an `I16` value.
    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.sign(Sign::I16);
        self.binary.extend_from_slice(&format::u16_wire(value as u16));
        self
    }

    /// Writes a `U16` value.
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.sign(Sign::U16);
        self.binary.extend_from_slice(&format::u16_wire(value));
        self
    }

    /// Writes an `I32` value.
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.sign(Sign::I32);
        self.binary.extend_from_slice(&format::u32_wire(value as u32));
        self
    }

    /// Writes a `U32` value.
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.sign(Sign::U32);
        self.binary.extend_from_slice(&format::u32_wire(value));
        self
    }

    /// Writes an `I64` value.
    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.sign(Sign::I64);
        self.binary.extend_from_slice(&format::u64_wire(value as u64));
        self
    }

    /// Writes a `U64` value.
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.sign(Sign::U64);
        self.binary.extend_from_slice(&format::u64_wire(value));
        self
    }

    /// Writes an `F32` value.
    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.sign(Sign::F32);
        self.binary.extend_from_slice(&format::f32_wire(value));
        self
    }

    /// Writes an `F64` value.
    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.sign(Sign::F64);
        self.binary.extend_from_slice(&format::f64_wire(value));
        self
    }

    /// Writes a `TRUE` or `FALSE` sign.
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.sign(if value { Sign::True } else { Sign::False });
        self
    }

    /// Writes a `NIL` sign (a null edge).
    pub fn write_nil(&mut self) -> &mut Self {
        self.sign(Sign::Nil);
        self
    }

    /// Writes a `STRING` value. The text must not contain NUL.
    pub fn write_str(&mut self, value: &str) -> &mut Self {
        self.sign(Sign::String);
        self.binary.extend_from_slice(value.as_bytes());
        self.sign(Sign::End);
        self
    }

    /// Writes a `BINARY` blob in size-prefixed chunks.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.sign(Sign::Binary);
        if bytes.is_empty() {
            self.binary.extend_from_slice(&format::u32_wire(0));
        } else {
            for (index, chunk) in bytes.chunks(u32::MAX as usize).enumerate() {
                if index > 0 {
                    self.sign(Sign::Binary);
                }
                self.binary
                    .extend_from_slice(&format::u32_wire(chunk.len() as u32));
                self.binary.extend_from_slice(chunk);
            }
        }
        self.sign(Sign::End);
        self
    }

    /// Opens an `ARRAY`; close it with [`end`](Self::end).
    pub fn begin_array(&mut self) -> &mut Self {
        self.sign(Sign::Array);
        self
    }

    /// Opens a `STRUCT`; close it with [`end`](Self::end).
    pub fn begin_struct(&mut self) -> &mut Self {
        self.sign(Sign::Struct);
        self
    }

    /// Writes one `STRUCT` entry: a `STRING` key followed by the value.
    pub fn field<T: Serialize>(&mut self, key: &str, value: &T) -> &mut Self {
        self.write_str(key);
        self.value(value)
    }

    /// Closes the innermost `ARRAY` or `STRUCT`.
    pub fn end(&mut self) -> &mut Self {
        self.sign(Sign::End);
        self
    }

    /// Writes a reference edge to `value`, preserving graph identity.
    ///
    /// First visit of an address assigns it the next instance index,
    /// allocates its buffer and enqueues a task emitting the referent in
    /// parallel; later visits — including the visit currently in flight
    /// when the graph has a cycle — emit the already-assigned index.
    /// Addresses listed in the encode call's [`NameTable`] emit the name
    /// instead and get no instance frame.
    pub fn reference<T: Serialize + 'static>(&mut self, value: &T) -> &mut Self {
        let address = value as *const T as usize;
        let mut inside: Option<u32> = None;
        let mut outside: Option<String> = None;
        {
            let mut state = self.session.lock();
            if let Some(name) = state.names.get(&address) {
                outside = Some(name.clone());
            } else if let Some(&id) = state.ids.get(&address) {
                inside = Some(id);
            } else {
                let id = state.buffers.len() as u32;
                state.ids.insert(address, id);
                let mut buffer = Box::new(Binary::new());
                let target = SendBuffer(&mut *buffer);
                state.buffers.push(buffer);

                let session = Arc::clone(self.session);
                let source = SendConst(value as *const T as *const ());
                let task = parallel(
                    move || {
                        let (source, target) = (source, target);
                        let value = unsafe { &*(source.0 as *const T) };
                        let binary = unsafe { &mut *target.0 };
                        let mut serializer = Serializer {
                            binary,
                            session: &session,
                        };
                        value.serialize(&mut serializer);
                    },
                    ThreadMode::Pooled,
                );
                state.tasks.push(task);
                inside = Some(id);
            }
        }
        self.sign(Sign::Reference);
        match outside {
            Some(name) => self.write_str(&name),
            None => {
                self.sign(Sign::U32);
                self.binary
                    .extend_from_slice(&format::u32_wire(inside.unwrap_or(0)));
                self
            }
        }
    }
}

/// Encodes `value` as the root of a binary blob.
///
/// Addresses in `names` encode as outside references; everything else
/// reachable through reference edges gets an instance frame. On allocator
/// exhaustion the result is an empty blob and an error log.
pub fn to_binary<T: Serialize>(value: &T, names: &NameTable) -> Binary {
    if format::host_endian() == Endian::Middle {
        print_error("serialize: middle-endian host, numeric payloads will be zero");
    }
    let session = Arc::new(SerializeSession {
        state: Mutex::new(EncodeState {
            buffers: Vec::new(),
            ids: AddressMap::default(),
            names: names.names.clone(),
            tasks: Vec::new(),
        }),
    });

    // Buffer 0 belongs to the root; registering its address first makes
    // self-loops on the root resolve to index 0.
    let root = {
        let mut state = session.lock();
        state.ids.insert(value as *const T as usize, 0);
        let mut buffer = Box::new(Binary::new());
        let pointer: *mut Binary = &mut *buffer;
        state.buffers.push(buffer);
        pointer
    };
    {
        let mut serializer = Serializer {
            binary: unsafe { &mut *root },
            session: &session,
        };
        value.serialize(&mut serializer);
    }

    // Drain until no task is left; joined tasks may steal inline and
    // enqueue further work, which the next round picks up.
    loop {
        let mut tasks = {
            let mut state = session.lock();
            mem::take(&mut state.tasks)
        };
        if tasks.is_empty() {
            break;
        }
        for task in &mut tasks {
            task.join();
        }
    }

    let buffers = {
        let mut state = session.lock();
        mem::take(&mut state.buffers)
    };
    stitch(&buffers)
}

/// Lays out `16 + Σ (4 + len)` bytes and copies the frames in parallel.
fn stitch(buffers: &[Box<Binary>]) -> Binary {
    for buffer in buffers {
        if buffer.failed() {
            print_error("serialize failed: allocator exhausted, emitting empty binary");
            return Binary::new();
        }
        if buffer.len() > u32::MAX as usize {
            print_error("serialize failed: instance payload exceeds the u32 frame size");
            return Binary::new();
        }
    }
    let total = HEADER_SIZE + buffers.iter().map(|b| 4 + b.len()).sum::<usize>();
    let mut out = Binary::new();
    if !out.reserve(total) {
        return Binary::new();
    }
    // Every byte below `total` is written below: 16 header bytes, then one
    // exactly-sized region per frame.
    unsafe { out.set_len(total) };

    let (header, mut rest) = out.as_mut_slice().split_at_mut(HEADER_SIZE);
    format::write_header(header);

    let mut frames = Vec::with_capacity(buffers.len());
    for buffer in buffers {
        let (frame, tail) = mem::take(&mut rest).split_at_mut(4 + buffer.len());
        frames.push(frame);
        rest = tail;
    }
    frames
        .into_par_iter()
        .zip(buffers.par_iter())
        .for_each(|(frame, buffer)| {
            frame[..4].copy_from_slice(&format::u32_wire(buffer.len() as u32));
            frame[4..].copy_from_slice(buffer.as_slice());
        });
    out
}
