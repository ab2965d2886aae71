//! Frame (bump) allocators.
//!
//! A frame allocator hands out memory from the front of a pre-reserved
//! buffer and releases everything at once — the pattern used for per-frame
//! scratch data, where individual lifetimes do not matter but the reset
//! must be O(1).
//!
//! Two flavors:
//!
//! - [`StaticFrameMemory`] owns exactly one buffer and fails (returns null)
//!   when the cursor would pass the end.
//! - [`DynamicFrameMemory`] chains buffers of a fixed size on overflow and
//!   frees all but the initial one on bulk reset.
//!
//! Frame allocators are single-owner state machines: they take `&mut self`
//! and are not synchronized. Returned pointers are byte-granular — callers
//! that store typed data are responsible for their own alignment.

use std::ptr;

/// A fixed buffer consumed front to back and released in one call.
pub struct StaticFrameMemory {
    buffer_size: usize,
    use_size: usize,
    buffer: *mut u8,
}

impl StaticFrameMemory {
    /// Reserves a buffer of `buffer_size` bytes (a zero request reserves one
    /// byte so the allocator always owns storage).
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = if buffer_size == 0 { 1 } else { buffer_size };
        let buffer = unsafe { libc::malloc(buffer_size) as *mut u8 };
        Self {
            buffer_size: if buffer.is_null() { 0 } else { buffer_size },
            use_size: 0,
            buffer,
        }
    }

    /// Splits `byte_size` bytes off the unused region.
    ///
    /// Returns null once the buffer cannot satisfy the request; nothing is
    /// consumed in that case.
    pub fn allocate(&mut self, byte_size: usize) -> *mut u8 {
        if self.buffer.is_null() || self.buffer_size - self.use_size < byte_size {
            return ptr::null_mut();
        }
        let pointer = unsafe { self.buffer.add(self.use_size) };
        self.use_size += byte_size;
        pointer
    }

    /// Releases every allocation by resetting the cursor.
    pub fn deallocate(&mut self) {
        self.use_size = 0;
    }

    /// Returns the reserved buffer size.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns the number of bytes consumed so far.
    pub fn use_size(&self) -> usize {
        self.use_size
    }
}

impl Drop for StaticFrameMemory {
    fn drop(&mut self) {
        unsafe { libc::free(self.buffer.cast()) };
    }
}

struct FrameNode {
    memory: StaticFrameMemory,
    prev: *mut FrameNode,
}

/// A chain of [`StaticFrameMemory`] buffers that grows on overflow.
///
/// Every buffer in the chain has the same size; a request larger than that
/// size can never succeed and returns null immediately.
pub struct DynamicFrameMemory {
    buffer_size: usize,
    top: *mut FrameNode,
}

impl DynamicFrameMemory {
    /// Creates the allocator with one initial buffer of `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Self {
        let node = Box::into_raw(Box::new(FrameNode {
            memory: StaticFrameMemory::new(buffer_size),
            prev: ptr::null_mut(),
        }));
        Self { buffer_size, top: node }
    }

    /// Splits `byte_size` bytes off the current buffer, chaining a fresh
    /// buffer first when the current one cannot hold the request.
    pub fn allocate(&mut self, byte_size: usize) -> *mut u8 {
        if self.buffer_size < byte_size {
            return ptr::null_mut();
        }
        unsafe {
            let top = &mut *self.top;
            if top.memory.buffer_size() - top.memory.use_size() < byte_size {
                self.top = Box::into_raw(Box::new(FrameNode {
                    memory: StaticFrameMemory::new(self.buffer_size),
                    prev: self.top,
                }));
            }
            (*self.top).memory.allocate(byte_size)
        }
    }

    /// Releases every allocation, freeing all buffers except the initial one.
    pub fn deallocate(&mut self) {
        unsafe {
            while !(*self.top).prev.is_null() {
                let node = self.top;
                self.top = (*node).prev;
                drop(Box::from_raw(node));
            }
            (*self.top).memory.deallocate();
        }
    }

    /// Returns the size of each chained buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Drop for DynamicFrameMemory {
    fn drop(&mut self) {
        unsafe {
            while !self.top.is_null() {
                let node = self.top;
                self.top = (*node).prev;
                drop(Box::from_raw(node));
            }
        }
    }
}
