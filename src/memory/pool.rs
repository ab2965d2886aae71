//! Fixed-size slab pools.
//!
//! A pool serves blocks of one element size in O(1) by threading the free
//! slots into an intrusive singly linked list: while a slot is free, its
//! first word stores the next free slot.
//!
//! [`StaticMemoryPool`] owns one buffer of `element_size * elements_count`
//! bytes. [`DynamicMemoryPool`] chains such buffers ("chunks") on a circular
//! doubly linked list, grows when the active chunk runs dry, and releases a
//! non-active chunk once every one of its slots has been returned.
//!
//! Dynamic-pool slots carry one extra word in front of the payload: a
//! back-pointer to the owning chunk. [`DynamicMemoryPool::deallocate`] needs
//! nothing but the pointer — it follows the back-pointer to the chunk and
//! the chunk's `owner` field to the pool. The same word doubles as the
//! routing prefix of the tiered allocator: it is always non-zero for pooled
//! blocks, while malloc-fallback blocks store zero there.

use std::ptr;

use super::WORD;

/// A fixed buffer divided into equally sized slots with an embedded free
/// list.
pub struct StaticMemoryPool {
    element_size: usize,
    elements_count: usize,
    free_elements_count: usize,
    buffer: *mut u8,
    free_top: *mut u8,
}

impl StaticMemoryPool {
    /// Reserves `elements_count` slots of `element_size` bytes each.
    ///
    /// The element size is rounded up to one machine word so a free slot can
    /// hold its link; a zero count reserves a single slot.
    pub fn new(element_size: usize, elements_count: usize) -> Self {
        let element_size = element_size.max(WORD);
        let elements_count = if elements_count == 0 { 1 } else { elements_count };
        let buffer = unsafe { libc::malloc(element_size * elements_count) as *mut u8 };
        let mut pool = Self {
            element_size,
            elements_count,
            free_elements_count: elements_count,
            buffer,
            free_top: ptr::null_mut(),
        };
        if buffer.is_null() {
            pool.elements_count = 0;
            pool.free_elements_count = 0;
            return pool;
        }
        // Thread every slot onto the free list, lowest address ending on top.
        for i in (0..elements_count).rev() {
            unsafe {
                let slot = buffer.add(i * element_size);
                (slot as *mut *mut u8).write(pool.free_top);
                pool.free_top = slot;
            }
        }
        pool
    }

    /// Pops a slot off the free list, or null when the pool is exhausted.
    pub fn allocate(&mut self) -> *mut u8 {
        if self.free_top.is_null() {
            return ptr::null_mut();
        }
        let slot = self.free_top;
        self.free_top = unsafe { (slot as *mut *mut u8).read() };
        self.free_elements_count -= 1;
        slot
    }

    /// Pushes a slot back onto the free list.
    ///
    /// # Safety
    ///
    /// `pointer` must be a slot previously returned by [`allocate`] on this
    /// pool and must not be pushed back twice.
    ///
    /// [`allocate`]: Self::allocate
    pub unsafe fn deallocate(&mut self, pointer: *mut u8) {
        if pointer.is_null() {
            return;
        }
        self.free_elements_count += 1;
        (pointer as *mut *mut u8).write(self.free_top);
        self.free_top = pointer;
    }

    /// Returns the (word-rounded) element size.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Returns the total number of slots.
    pub fn elements_count(&self) -> usize {
        self.elements_count
    }

    /// Returns the number of currently free slots.
    pub fn free_elements_count(&self) -> usize {
        self.free_elements_count
    }
}

impl Drop for StaticMemoryPool {
    fn drop(&mut self) {
        unsafe { libc::free(self.buffer.cast()) };
    }
}

struct PoolNode {
    memory: StaticMemoryPool,
    owner: *mut DynamicMemoryPool,
    prev: *mut PoolNode,
    next: *mut PoolNode,
}

/// A growing slab pool: a circular list of [`StaticMemoryPool`] chunks.
///
/// Returned by [`new`] in a `Box`, and chunks record the pool's address, so
/// the pool must stay where it is while any of its blocks are live.
///
/// [`new`]: Self::new
pub struct DynamicMemoryPool {
    element_size: usize,
    elements_count: usize,
    top: *mut PoolNode,
}

impl DynamicMemoryPool {
    /// Creates a pool serving `element_size`-byte payloads, `elements_count`
    /// slots per chunk. The first chunk is reserved on first use.
    pub fn new(element_size: usize, elements_count: usize) -> Box<Self> {
        Box::new(Self {
            element_size,
            elements_count,
            top: ptr::null_mut(),
        })
    }

    /// Returns one payload block, or null on exhaustion.
    ///
    /// The block is one word past the slot start; the slot's first word is
    /// the chunk back-pointer consumed by [`deallocate`].
    ///
    /// [`deallocate`]: Self::deallocate
    pub fn allocate(&mut self) -> *mut u8 {
        unsafe {
            if self.top.is_null() {
                let node = self.new_node(ptr::null_mut(), ptr::null_mut());
                if node.is_null() {
                    return ptr::null_mut();
                }
                (*node).prev = node;
                (*node).next = node;
                self.top = node;
            }
            if (*self.top).memory.free_elements_count() == 0 {
                // [prev]-[old top]  becomes  [prev]-[new top]-[old top]
                let node = self.new_node((*self.top).prev, self.top);
                if node.is_null() {
                    return ptr::null_mut();
                }
                (*(*node).prev).next = node;
                (*(*node).next).prev = node;
                self.top = node;
            }
            let slot = (*self.top).memory.allocate();
            if slot.is_null() {
                return ptr::null_mut();
            }
            (slot as *mut *mut PoolNode).write(self.top);
            slot.add(WORD)
        }
    }

    /// Returns a block to whichever pool and chunk it came from.
    ///
    /// A non-active chunk whose slots are all free afterwards is unlinked
    /// and released.
    ///
    /// # Safety
    ///
    /// `pointer` must come from [`DynamicMemoryPool::allocate`] and the
    /// owning pool must still be alive at its original address.
    pub unsafe fn deallocate(pointer: *mut u8) {
        let slot = pointer.sub(WORD);
        let node = (slot as *mut *mut PoolNode).read();
        (*node).memory.deallocate(slot);

        let owner = (*node).owner;
        if node != (*owner).top
            && (*node).memory.free_elements_count() == (*node).memory.elements_count()
        {
            (*(*node).prev).next = (*node).next;
            (*(*node).next).prev = (*node).prev;
            drop(Box::from_raw(node));
        }
    }

    /// Returns the payload element size.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    unsafe fn new_node(&mut self, prev: *mut PoolNode, next: *mut PoolNode) -> *mut PoolNode {
        let memory = StaticMemoryPool::new(WORD + self.element_size, self.elements_count);
        if memory.elements_count() == 0 {
            return ptr::null_mut();
        }
        Box::into_raw(Box::new(PoolNode {
            memory,
            owner: self,
            prev,
            next,
        }))
    }
}

impl Drop for DynamicMemoryPool {
    fn drop(&mut self) {
        if self.top.is_null() {
            return;
        }
        unsafe {
            let first = self.top;
            let mut node = first;
            loop {
                let next = (*node).next;
                drop(Box::from_raw(node));
                if next == first {
                    break;
                }
                node = next;
            }
        }
    }
}
