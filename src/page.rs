//! # Page Provider
//!
//! Adapts the OS page-mapping primitive (`mmap`/`munmap`) into a safe,
//! tracked reservation pool. The heap core never talks to the OS directly;
//! it asks this module for whole reservations and hands them back on
//! teardown.
//!
//! ```text
//!   Process virtual address space
//!
//!   ┌──────────────┐     ┌────────────────────┐      ┌──────────┐
//!   │ Reservation 0│ ... │   Reservation 1    │ ...  │  Res. 2  │
//!   └──────────────┘     └────────────────────┘      └──────────┘
//!    ▲ start, len          obtained lazily on          each one a
//!    │                     heap growth                 multiple of
//!    └── tracked here so it can be returned exactly    the page size
//! ```
//!
//! Every reservation is readable, writable, private, anonymous and
//! zero-initialized. `release` demands the exact `{start, len}` pair that
//! `reserve` recorded; a failed call leaves no partial state behind.
//!
//! This module is the only place in the crate that contains `unsafe` code.

use std::io;
use std::ptr;
use std::sync::OnceLock;

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void};
use log::{debug, error};

use crate::error::AllocError;
use crate::is_aligned;

/// System page size in bytes. Queried from the OS once, then cached.
pub fn page_size() -> usize {
  static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

  // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions.
  *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}

/// A contiguous range of process virtual address space obtained from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
  /// Page-aligned start address.
  pub start: usize,
  /// Length in bytes, a positive multiple of the page size.
  pub len: usize,
}

impl Reservation {
  /// Whether `[start, start + len)` lies entirely inside this reservation.
  pub fn contains_range(
    &self,
    start: usize,
    len: usize,
  ) -> bool {
    start >= self.start && start + len <= self.start + self.len
  }
}

/// Tracked pool of reservations. Not thread-safe on its own; the heap core
/// funnels all access through its lock.
pub struct PageProvider {
  regions: Vec<Reservation>,
  total_reserved: usize,
}

impl PageProvider {
  /// Creates an empty provider. No OS interaction happens until `reserve`.
  pub fn new() -> Self {
    Self {
      regions: Vec::new(),
      total_reserved: 0,
    }
  }

  /// Reserves `len` bytes of fresh address space.
  ///
  /// `len` must be a positive multiple of the page size, and `hint` (a
  /// placement suggestion the OS is free to ignore) must be page-aligned if
  /// given. The new region is recorded in the tracker before the address is
  /// returned.
  pub fn reserve(
    &mut self,
    hint: Option<usize>,
    len: usize,
  ) -> Result<usize, AllocError> {
    let page = page_size();

    if len == 0 || !is_aligned!(len, page) {
      error!("reserve: invalid length {len} (not page-aligned)");
      return Err(AllocError::InvalidArgument);
    }

    if let Some(addr) = hint {
      if !is_aligned!(addr, page) {
        error!("reserve: misaligned hint {addr:#x}");
        return Err(AllocError::InvalidArgument);
      }
    }

    let hint_ptr = hint.map_or(ptr::null_mut(), |addr| addr as *mut c_void);

    // SAFETY: anonymous private mapping with no file descriptor; the kernel
    // picks or validates the address. Nothing is dereferenced here.
    let mapped = unsafe {
      libc::mmap(
        hint_ptr,
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if mapped == MAP_FAILED {
      error!(
        "reserve: mmap failed for {len} bytes: {}",
        io::Error::last_os_error()
      );
      return Err(AllocError::OutOfMemory);
    }

    let start = mapped as usize;
    self.regions.push(Reservation { start, len });
    self.total_reserved += len;

    debug!(
      "reserve: {len} bytes at {start:#x}, total={}, count={}",
      self.total_reserved,
      self.regions.len()
    );

    Ok(start)
  }

  /// Returns a reservation to the OS. The `{start, len}` pair must match a
  /// tracked reservation exactly.
  pub fn release(
    &mut self,
    start: usize,
    len: usize,
  ) -> Result<(), AllocError> {
    let index = match self.regions.iter().position(|r| r.start == start) {
      Some(index) => index,
      None => {
        error!("release: no reservation at {start:#x}");
        return Err(AllocError::InvalidAddress);
      }
    };

    if self.regions[index].len != len {
      error!(
        "release: length mismatch at {start:#x}: expected {}, got {len}",
        self.regions[index].len
      );
      return Err(AllocError::InvalidArgument);
    }

    // SAFETY: the range was obtained from mmap with exactly this length and
    // has not been released since (it is still tracked).
    let rc = unsafe { libc::munmap(start as *mut c_void, len) };
    if rc != 0 {
      error!(
        "release: munmap failed at {start:#x}: {}",
        io::Error::last_os_error()
      );
      return Err(AllocError::InvalidArgument);
    }

    self.regions.swap_remove(index);
    self.total_reserved -= len;

    debug!(
      "release: {len} bytes at {start:#x}, total={}, count={}",
      self.total_reserved,
      self.regions.len()
    );

    Ok(())
  }

  /// Releases every still-tracked reservation and empties the tracker.
  pub fn cleanup(&mut self) {
    debug!("cleanup: releasing {} regions", self.regions.len());

    for region in self.regions.drain(..) {
      // SAFETY: tracked regions are live mmap results with exact lengths.
      let rc = unsafe { libc::munmap(region.start as *mut c_void, region.len) };
      if rc != 0 {
        error!(
          "cleanup: munmap failed at {:#x}: {}",
          region.start,
          io::Error::last_os_error()
        );
      }
    }

    self.total_reserved = 0;
  }

  /// Finds the reservation containing `addr`, if any.
  pub fn find(
    &self,
    addr: usize,
  ) -> Option<&Reservation> {
    self
      .regions
      .iter()
      .find(|r| addr >= r.start && addr < r.start + r.len)
  }

  /// Total bytes currently reserved from the OS.
  pub fn total_reserved(&self) -> usize {
    self.total_reserved
  }

  /// Number of outstanding reservations.
  pub fn region_count(&self) -> usize {
    self.regions.len()
  }

  /// Writes a human-readable listing of all reservations.
  pub fn dump<W: io::Write>(
    &self,
    out: &mut W,
  ) -> io::Result<()> {
    writeln!(out, "=== VM Regions Dump ===")?;
    writeln!(out, "Total regions: {}", self.regions.len())?;
    writeln!(out, "Total reserved: {} bytes", self.total_reserved)?;

    let page = page_size();
    for (i, region) in self.regions.iter().enumerate() {
      writeln!(
        out,
        "[Region {i}] addr={:#x} size={} ({} pages)",
        region.start,
        region.len,
        region.len / page
      )?;
    }

    writeln!(out, "======================")
  }
}

impl Default for PageProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for PageProvider {
  fn drop(&mut self) {
    if !self.regions.is_empty() {
      self.cleanup();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn page_size_is_a_power_of_two() {
    let page = page_size();
    assert!(page >= 4096);
    assert!(page.is_power_of_two());
  }

  #[test]
  fn reserve_rejects_zero_and_unaligned_lengths() {
    let mut provider = PageProvider::new();

    assert_eq!(provider.reserve(None, 0), Err(AllocError::InvalidArgument));
    assert_eq!(
      provider.reserve(None, page_size() + 1),
      Err(AllocError::InvalidArgument)
    );
    assert_eq!(provider.region_count(), 0);
    assert_eq!(provider.total_reserved(), 0);
  }

  #[test]
  fn reserve_rejects_misaligned_hint() {
    let mut provider = PageProvider::new();

    assert_eq!(
      provider.reserve(Some(0x1001), page_size()),
      Err(AllocError::InvalidArgument)
    );
  }

  #[test]
  fn reserved_memory_is_zeroed_and_writable() {
    let mut provider = PageProvider::new();
    let len = 2 * page_size();
    let start = provider.reserve(None, len).unwrap();

    assert!(is_aligned!(start, page_size()));
    assert_eq!(provider.region_count(), 1);
    assert_eq!(provider.total_reserved(), len);

    // SAFETY: the range [start, start + len) was just mapped read/write.
    unsafe {
      let first = start as *mut u8;
      let last = (start + len - 1) as *mut u8;
      assert_eq!(first.read(), 0);
      assert_eq!(last.read(), 0);
      first.write(0xAB);
      last.write(0xCD);
      assert_eq!(first.read(), 0xAB);
      assert_eq!(last.read(), 0xCD);
    }

    provider.release(start, len).unwrap();
    assert_eq!(provider.region_count(), 0);
  }

  #[test]
  fn release_requires_exact_match() {
    let mut provider = PageProvider::new();
    let len = page_size();
    let start = provider.reserve(None, len).unwrap();

    assert_eq!(
      provider.release(start + page_size(), len),
      Err(AllocError::InvalidAddress)
    );
    assert_eq!(
      provider.release(start, 2 * len),
      Err(AllocError::InvalidArgument)
    );
    // Failed releases change nothing.
    assert_eq!(provider.region_count(), 1);
    assert_eq!(provider.total_reserved(), len);

    provider.release(start, len).unwrap();
    assert_eq!(provider.release(start, len), Err(AllocError::InvalidAddress));
  }

  #[test]
  fn cleanup_releases_everything() {
    let mut provider = PageProvider::new();
    provider.reserve(None, page_size()).unwrap();
    provider.reserve(None, 3 * page_size()).unwrap();
    assert_eq!(provider.region_count(), 2);

    provider.cleanup();
    assert_eq!(provider.region_count(), 0);
    assert_eq!(provider.total_reserved(), 0);
  }

  #[test]
  fn find_locates_the_containing_reservation() {
    let mut provider = PageProvider::new();
    let len = 2 * page_size();
    let start = provider.reserve(None, len).unwrap();

    let found = provider.find(start + 100).unwrap();
    assert_eq!(found.start, start);
    assert!(found.contains_range(start + 100, 8));
    assert!(!found.contains_range(start + len - 4, 8));
    assert!(provider.find(start + len).is_none());

    provider.cleanup();
  }
}
