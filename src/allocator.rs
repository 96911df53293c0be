//! Process-wide allocator facade.
//!
//! Owns the single heap instance behind a `RwLock<Option<Heap>>`:
//!
//! ```text
//!   Uninitialised ── init() / first alloc()/free() ──► Running
//!         ▲                                               │
//!         └────────────────── cleanup() ──────────────────┘
//! ```
//!
//! The write lock is the initialization mutex; `alloc`/`free` check for a
//! live heap under the read lock and re-check under the write lock before
//! constructing one (double-checked). Per-operation serialization is the
//! heap's own mutex, so steady-state callers only ever share the read lock.

use std::io::{self, Write};
use std::ptr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error};

use crate::error::AllocError;
use crate::heap::{Heap, HeapOptions, Stats};

static HEAP: RwLock<Option<Heap>> = RwLock::new(None);

// The heap's internal mutations are all-or-nothing, so a poisoned global
// still holds a consistent value.
fn read_global() -> RwLockReadGuard<'static, Option<Heap>> {
  HEAP.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_global() -> RwLockWriteGuard<'static, Option<Heap>> {
  HEAP.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ensure_initialized() -> Result<(), AllocError> {
  if read_global().is_some() {
    return Ok(());
  }

  // init_with re-checks under the write lock
  init(true)
}

/// Explicitly initializes the process-wide allocator with default tuning.
///
/// `concurrency` is recorded as the heap's `lock_enabled` configuration.
/// Idempotent: a second call succeeds without changing anything.
pub fn init(concurrency: bool) -> Result<(), AllocError> {
  init_with(HeapOptions {
    lock_enabled: concurrency,
    ..HeapOptions::default()
  })
}

/// Initializes the process-wide allocator with explicit tuning.
pub fn init_with(options: HeapOptions) -> Result<(), AllocError> {
  let mut global = write_global();

  if global.is_some() {
    debug!("init: already initialized");
    return Ok(());
  }

  *global = Some(Heap::new(options)?);
  debug!("init: heap ready");

  Ok(())
}

/// Allocates `size` bytes and returns the payload address.
///
/// Returns null when `size` is 0 (no allocation happens) and on any
/// allocator failure. The first call auto-initializes the allocator with
/// concurrency enabled.
///
/// The caller may read and write `[ptr, ptr + size)` until it passes `ptr`
/// to [`free`].
pub fn alloc(size: usize) -> *mut u8 {
  if size == 0 {
    debug!("alloc: size is 0, returning null");
    return ptr::null_mut();
  }

  if ensure_initialized().is_err() {
    error!("alloc: auto-init failed");
    return ptr::null_mut();
  }

  let global = read_global();
  let Some(heap) = global.as_ref() else {
    // torn down between the init check and here
    return ptr::null_mut();
  };

  match heap.allocate(size) {
    Ok(addr) => addr as *mut u8,
    Err(err) => {
      debug!("alloc: {err}");
      ptr::null_mut()
    }
  }
}

/// Releases an address previously returned by [`alloc`].
///
/// `free(null)` is a successful no-op. Errors distinguish an address that
/// is not the start of a live allocation ([`AllocError::InvalidAddress`])
/// from a repeated release ([`AllocError::DoubleFree`]).
pub fn free(ptr: *mut u8) -> Result<(), AllocError> {
  if ptr.is_null() {
    debug!("free: null pointer, no-op");
    return Ok(());
  }

  ensure_initialized()?;

  let global = read_global();
  match global.as_ref() {
    Some(heap) => heap.free(ptr as usize),
    None => Err(AllocError::Uninitialized),
  }
}

/// Counter snapshot taken in one critical section.
pub fn stats() -> Result<Stats, AllocError> {
  let global = read_global();
  global.as_ref().map(Heap::stats).ok_or(AllocError::Uninitialized)
}

/// Checks every heap invariant without mutating anything.
pub fn verify() -> Result<(), AllocError> {
  let global = read_global();
  match global.as_ref() {
    Some(heap) => heap.verify(),
    None => Err(AllocError::Uninitialized),
  }
}

/// Writes a human-readable state dump to stderr.
pub fn dump() {
  let global = read_global();
  let mut out = io::stderr().lock();

  match global.as_ref() {
    Some(heap) => {
      let _ = heap.dump(&mut out);
    }
    None => {
      let _ = writeln!(out, "allocator: not initialized");
    }
  }
}

/// Reports how many bytes are still allocated; 0 means no leak.
pub fn leak_check() -> Result<usize, AllocError> {
  let stats = stats()?;

  if stats.allocated > 0 {
    error!(
      "leak: {} bytes not freed (peak was {})",
      stats.allocated, stats.peak
    );
  } else {
    debug!("leak: none detected");
  }

  Ok(stats.allocated)
}

/// Tears down the heap and returns every reservation to the OS. The
/// allocator is uninitialized afterwards; a later `init` or `alloc` starts
/// fresh. Succeeds when already uninitialized.
pub fn cleanup() -> Result<(), AllocError> {
  let mut global = write_global();

  if let Some(heap) = global.take() {
    heap.cleanup();
    debug!("cleanup: done");
  }

  Ok(())
}
