//! Tiered memory allocation.
//!
//! The process-wide allocator serves small blocks from fixed-class slab
//! pools and falls back to `malloc` above the largest class:
//!
//! ```text
//! request size      1..=16  17..=32  33..=64  65..=128  129..=256  257..
//! served by         pool16  pool32   pool64   pool128   pool256    malloc
//! ```
//!
//! Every returned block carries one hidden machine word in front of the
//! user pointer:
//!
//! ```text
//! ┌────────────────────┬─────────────────────────────┐
//! │ prefix (1 word)    │ payload (user pointer here) │
//! ├────────────────────┼─────────────────────────────┤
//! │ chunk back-pointer │ pooled block (non-zero)     │
//! │ zero               │ malloc fallback             │
//! └────────────────────┴─────────────────────────────┘
//! ```
//!
//! [`Memory::deallocate`] reads that prefix and routes to the matching
//! release path — callers never remember where a block came from. Returned
//! pointers are word-aligned (8 bytes); payloads that need more are not
//! supported by the slab geometry.
//!
//! The tiered state is created lazily behind a one-shot guard and mutated
//! under a single mutex, because serializer worker tasks allocate
//! concurrently. The frame allocators in [`frame`] are single-owner and
//! take no part in that locking.
//!
//! Exhaustion is the only failure and is reported as a null pointer;
//! callers must check.

mod frame;
mod pool;

pub use frame::{DynamicFrameMemory, StaticFrameMemory};
pub use pool::{DynamicMemoryPool, StaticMemoryPool};

use std::ptr;
use std::sync::Mutex;

use once_cell::sync::Lazy;

/// One machine word: the size of the hidden block prefix.
pub(crate) const WORD: usize = std::mem::size_of::<usize>();

/// A memory system handing out raw blocks.
///
/// `deallocate` takes only the pointer; implementations route internally
/// (for the shared allocator, via the prefix word).
pub trait Allocator: Sync {
    /// Returns a block of at least `byte_size` bytes, or null on exhaustion.
    fn allocate(&self, byte_size: usize) -> *mut u8;

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `pointer` must have been returned by `allocate` on this allocator and
    /// must not be released twice.
    unsafe fn deallocate(&self, pointer: *mut u8);
}

const CLASS_SIZES: [usize; 5] = [16, 32, 64, 128, 256];
const CLASS_COUNTS: [usize; 5] = [32, 32, 32, 16, 16];

struct Tiered {
    pools: [Box<DynamicMemoryPool>; 5],
    live_blocks: usize,
}

// The raw pointers inside the pools are reachable only through this struct,
// which is only touched under the control mutex.
unsafe impl Send for Tiered {}

impl Tiered {
    fn new() -> Self {
        Self {
            pools: [
                DynamicMemoryPool::new(CLASS_SIZES[0], CLASS_COUNTS[0]),
                DynamicMemoryPool::new(CLASS_SIZES[1], CLASS_COUNTS[1]),
                DynamicMemoryPool::new(CLASS_SIZES[2], CLASS_COUNTS[2]),
                DynamicMemoryPool::new(CLASS_SIZES[3], CLASS_COUNTS[3]),
                DynamicMemoryPool::new(CLASS_SIZES[4], CLASS_COUNTS[4]),
            ],
            live_blocks: 0,
        }
    }

    fn allocate(&mut self, byte_size: usize) -> *mut u8 {
        if byte_size == 0 {
            return ptr::null_mut();
        }
        let pointer = match CLASS_SIZES.iter().position(|&class| byte_size <= class) {
            Some(index) => self.pools[index].allocate(),
            None => unsafe {
                let raw = libc::malloc(WORD + byte_size) as *mut u8;
                if raw.is_null() {
                    return ptr::null_mut();
                }
                (raw as *mut usize).write(0);
                raw.add(WORD)
            },
        };
        if !pointer.is_null() {
            self.live_blocks += 1;
        }
        pointer
    }

    unsafe fn deallocate(&mut self, pointer: *mut u8) {
        if pointer.is_null() {
            return;
        }
        let prefix = (pointer.sub(WORD) as *const usize).read();
        if prefix != 0 {
            DynamicMemoryPool::deallocate(pointer);
        } else {
            libc::free(pointer.sub(WORD).cast());
        }
        self.live_blocks -= 1;
    }
}

static CONTROL: Lazy<Mutex<Tiered>> = Lazy::new(|| Mutex::new(Tiered::new()));

/// The process-wide tiered allocator.
pub struct Memory;

impl Memory {
    /// Returns a block of at least `byte_size` bytes, or null on exhaustion.
    pub fn allocate(byte_size: usize) -> *mut u8 {
        CONTROL
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .allocate(byte_size)
    }

    /// Releases a block, routed by its prefix word.
    ///
    /// # Safety
    ///
    /// `pointer` must have been returned by [`Memory::allocate`] and must
    /// not be released twice.
    pub unsafe fn deallocate(pointer: *mut u8) {
        CONTROL
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .deallocate(pointer)
    }

    /// Returns the shared [`Allocator`] handle routing through this type.
    pub fn allocator() -> &'static dyn Allocator {
        &GlobalAllocator
    }

    /// Returns the number of currently live blocks (pooled and fallback).
    pub fn live_blocks() -> usize {
        CONTROL
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .live_blocks
    }
}

/// [`Allocator`] implementation backed by the process-wide [`Memory`].
pub struct GlobalAllocator;

impl Allocator for GlobalAllocator {
    fn allocate(&self, byte_size: usize) -> *mut u8 {
        Memory::allocate(byte_size)
    }

    unsafe fn deallocate(&self, pointer: *mut u8) {
        Memory::deallocate(pointer)
    }
}
