//! Allocator behavior: routing, accounting, frame reset semantics.
//!
//! The tests that talk to the process-wide [`Memory`] singleton take
//! [`MEMORY_LOCK`] first: the harness runs tests on parallel threads, and
//! an exact `live_blocks` delta only holds while no other test allocates.
//! The frame and pool tests own their buffers and need no lock.

use std::sync::Mutex;

use elekicore::memory::{DynamicFrameMemory, Memory, StaticFrameMemory, StaticMemoryPool};
use once_cell::sync::Lazy;

static MEMORY_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[test]
fn tiered_allocator_routes_and_counts() {
    let _guard = MEMORY_LOCK
        .lock()
        .unwrap_or_else(|poison| poison.into_inner());
    let before = Memory::live_blocks();
    let sizes = [1usize, 16, 17, 32, 33, 64, 128, 255, 256, 257, 1024, 64 * 1024];
    let mut blocks = Vec::new();
    for &size in &sizes {
        let pointer = Memory::allocate(size);
        assert!(!pointer.is_null(), "allocation of {size} bytes failed");
        // The block must be writable over its whole span.
        unsafe { std::ptr::write_bytes(pointer, 0xAB, size) };
        blocks.push(pointer);
    }
    assert_eq!(Memory::live_blocks(), before + sizes.len());

    for pointer in blocks {
        unsafe { Memory::deallocate(pointer) };
    }
    assert_eq!(Memory::live_blocks(), before);

    // Zero-size requests fail, they do not count.
    assert!(Memory::allocate(0).is_null());
    assert_eq!(Memory::live_blocks(), before);
}

#[test]
fn tiered_allocator_reuses_pooled_slots() {
    let _guard = MEMORY_LOCK
        .lock()
        .unwrap_or_else(|poison| poison.into_inner());
    // Same class, sequential free/alloc: the slab free list hands the slot
    // back out.
    let first = Memory::allocate(48);
    assert!(!first.is_null());
    unsafe { Memory::deallocate(first) };
    let second = Memory::allocate(48);
    assert!(!second.is_null());
    unsafe { Memory::deallocate(second) };
}

#[test]
fn static_pool_exhausts_and_recycles() {
    let mut pool = StaticMemoryPool::new(24, 4);
    assert_eq!(pool.elements_count(), 4);
    assert_eq!(pool.free_elements_count(), 4);

    let mut slots = Vec::new();
    for _ in 0..4 {
        let slot = pool.allocate();
        assert!(!slot.is_null());
        slots.push(slot);
    }
    assert_eq!(pool.free_elements_count(), 0);
    assert!(pool.allocate().is_null(), "exhausted pool must return null");

    unsafe { pool.deallocate(slots.pop().unwrap()) };
    assert_eq!(pool.free_elements_count(), 1);
    let again = pool.allocate();
    assert!(!again.is_null());
    unsafe {
        pool.deallocate(again);
        for slot in slots {
            pool.deallocate(slot);
        }
    }
    assert_eq!(pool.free_elements_count(), 4);
}

#[test]
fn static_pool_rounds_element_size_to_a_word() {
    let pool = StaticMemoryPool::new(1, 2);
    assert_eq!(pool.element_size(), std::mem::size_of::<usize>());
}

#[test]
fn static_frame_bumps_and_resets() {
    let mut frame = StaticFrameMemory::new(64);
    assert_eq!(frame.buffer_size(), 64);
    assert_eq!(frame.use_size(), 0);

    let first = frame.allocate(40);
    assert!(!first.is_null());
    assert_eq!(frame.use_size(), 40);

    // 40 + 40 > 64: fails without consuming anything.
    assert!(frame.allocate(40).is_null());
    assert_eq!(frame.use_size(), 40);

    let second = frame.allocate(24);
    assert!(!second.is_null());
    assert_eq!(frame.use_size(), 64);

    frame.deallocate();
    assert_eq!(frame.use_size(), 0);
    assert!(!frame.allocate(64).is_null());
}

#[test]
fn dynamic_frame_chains_and_keeps_initial_buffer() {
    let mut frame = DynamicFrameMemory::new(32);

    // A request beyond one buffer can never succeed.
    assert!(frame.allocate(33).is_null());

    // Three full buffers' worth forces chaining.
    for _ in 0..6 {
        assert!(!frame.allocate(16).is_null());
    }

    frame.deallocate();
    // After reset the initial buffer serves again from the start.
    assert!(!frame.allocate(32).is_null());
}
