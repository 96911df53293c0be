//! # palloc - A Parallel Memory Allocator Library
//!
//! A general-purpose, thread-safe heap manager that obtains raw address
//! space from the operating system with `mmap` and sub-allocates it into
//! blocks of arbitrary size.
//!
//! ## Overview
//!
//! ```text
//!   caller ──► facade ──► heap core ──► page provider ──► OS (mmap/munmap)
//!
//!   ┌─────────────────────────────────────────────────────────────────┐
//!   │                        HEAP ADDRESS SPACE                       │
//!   │                                                                 │
//!   │   ┌───────────┬────────┬───────────┬─────────────────────────┐  │
//!   │   │ ALLOCATED │  FREE  │ ALLOCATED │          FREE           │  │
//!   │   └───────────┴────────┴───────────┴─────────────────────────┘  │
//!   │                                                                 │
//!   │   Blocks are disjoint, address-ordered, and contiguous FREE     │
//!   │   neighbors are coalesced eagerly on free().                    │
//!   └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Allocation walks the free blocks with a selectable policy (first-fit,
//! best-fit, worst-fit), splits off what it needs, and grows the heap with
//! a fresh page reservation when nothing fits. A single coarse mutex
//! linearizes all operations, so any number of threads can share the one
//! process-wide heap.
//!
//! ## Crate Structure
//!
//! ```text
//!   palloc
//!   ├── align      - alignment unit and rounding macros
//!   ├── error      - error kinds with stable negative codes
//!   ├── page       - page provider: tracked mmap reservations (all unsafe
//!   │                code lives here)
//!   ├── block      - block metadata (internal)
//!   ├── heap       - heap core: ordered blocks, fit strategies, coalescing
//!   └── alloc/free/init/cleanup/stats/verify/dump - process-wide facade
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! fn main() {
//!   palloc::init(true).expect("allocator init");
//!
//!   let ptr = palloc::alloc(1024);
//!   assert!(!ptr.is_null());
//!
//!   unsafe {
//!     // The caller owns [ptr, ptr + 1024) until the free below.
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!   }
//!
//!   palloc::free(ptr).expect("free");
//!   palloc::cleanup().expect("cleanup");
//! }
//! ```
//!
//! The explicit `init` is optional: the first `alloc` or `free` initializes
//! the allocator on demand (with locking enabled). `init_with` exposes the
//! tuning knobs: initial reservation size, growth minimum, and fit
//! strategy.
//!
//! ## Safety
//!
//! The allocator itself is safe Rust except for the two unavoidable
//! boundaries: the page provider's `mmap`/`munmap` calls, and the caller's
//! use of the returned raw pointer. Callers must not touch an address
//! after freeing it; `free` of a forged or stale address is detected and
//! rejected without corrupting allocator state.

pub mod align;
mod allocator;
mod block;
pub mod error;
pub mod heap;
pub mod page;

pub use allocator::{alloc, cleanup, dump, free, init, init_with, leak_check, stats, verify};
pub use error::AllocError;
pub use heap::{Heap, HeapOptions, Stats, Strategy};
pub use page::{PageProvider, Reservation, page_size};
