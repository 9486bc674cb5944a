//! Steady-state allocation guard for driver threads.
//!
//! Driver loops must not touch the allocator once they reach steady state
//! (every iteration after the first). The crate installs `CountingAllocator`
//! as the global allocator; a thread that has called `engage()` records any
//! `alloc`/`dealloc`/`realloc` it performs in a process-wide violation
//! counter. The counter is a diagnostic, not a trap: runs continue, tests
//! and the shutdown log assert on it.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static VIOLATIONS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static ENGAGED: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as steady-state; allocator calls from it now
/// count as violations.
pub fn engage() {
    let _ = ENGAGED.try_with(|e| e.set(true));
}

/// Clears the steady-state mark, e.g. before teardown paths that are
/// allowed to free.
pub fn disengage() {
    let _ = ENGAGED.try_with(|e| e.set(false));
}

pub fn is_engaged() -> bool {
    ENGAGED.try_with(|e| e.get()).unwrap_or(false)
}

/// Total allocator calls observed on engaged threads since process start.
pub fn violations() -> u64 {
    VIOLATIONS.load(Ordering::Relaxed)
}

#[inline]
fn record() {
    // try_with: TLS may already be torn down during thread exit.
    if ENGAGED.try_with(|e| e.get()).unwrap_or(false) {
        VIOLATIONS.fetch_add(1, Ordering::Relaxed);
    }
}

/// Pass-through system allocator that attributes hot-path allocations.
pub struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        record();
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        record();
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        record();
        unsafe { System.realloc(ptr, layout, new_size) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        record();
        unsafe { System.alloc_zeroed(layout) }
    }
}
