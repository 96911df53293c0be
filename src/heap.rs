//! # Heap Core
//!
//! Owns the collection of blocks covering all currently reserved pages and
//! sub-allocates them into caller-visible intervals.
//!
//! ## Block collection
//!
//! Blocks live in a `BTreeMap` keyed by start address. The map replaces the
//! classic intrusive doubly-linked block list: iteration order is address
//! order, a payload address resolves to its block with one `range` query,
//! and a block's neighbors are the adjacent map entries.
//!
//! ```text
//!         Reservation 0 (initial)                Reservation 1 (growth)
//!   ┌───────────┬──────────┬────────────┐     ┌─────────────────────────┐
//!   │ ALLOCATED │ FREE     │ ALLOCATED  │ ... │ FREE                    │
//!   └───────────┴──────────┴────────────┘     └─────────────────────────┘
//!    ▲           ▲          ▲                  ▲
//!    └───────────┴──────────┴──────────────────┴── BTreeMap keys (sorted)
//! ```
//!
//! Invariants maintained at every observable moment:
//!
//! 1. Block intervals are pairwise disjoint.
//! 2. Blocks are sorted strictly by start address (free with the map).
//! 3. No two contiguous blocks of the same reservation are both FREE;
//!    `free` coalesces eagerly.
//! 4. The running counters equal the per-state sums over all blocks, and
//!    the peak never drops below the current allocated total.
//! 5. Every block lies inside exactly one reservation (recorded in the
//!    block's `region` field).
//!
//! ## Locking
//!
//! The whole mutable state sits behind one mutex; every public operation
//! holds it for its full duration, which linearizes concurrent callers.
//! Coarse by intent: correctness under concurrency, not peak throughput.
//! The page provider is only ever touched while this lock is held.

use std::collections::BTreeMap;
use std::io;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Mutex, MutexGuard};

use log::{debug, error, trace};

use crate::block::{Block, BlockState};
use crate::error::AllocError;
use crate::page::{self, PageProvider};
use crate::{align, align_to, is_aligned};

/// Free-block selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
  /// First match in address order.
  #[default]
  FirstFit,
  /// Smallest sufficient block; ties go to the lower address.
  BestFit,
  /// Largest free block; ties go to the lower address.
  WorstFit,
}

/// Tuning knobs for [`Heap::new`]. `Default` gives a 10-page initial
/// reservation, a 20-page growth minimum, first-fit, and locking on.
#[derive(Debug, Clone, Copy)]
pub struct HeapOptions {
  /// Size of the first reservation. Positive multiple of the page size.
  pub initial_size: usize,
  /// Minimum additional reservation when the heap is exhausted. Positive
  /// multiple of the page size.
  pub growth_min: usize,
  pub strategy: Strategy,
  /// Recorded configuration; see the locking note on [`Heap`].
  pub lock_enabled: bool,
}

impl Default for HeapOptions {
  fn default() -> Self {
    let page = page::page_size();

    Self {
      initial_size: 10 * page,
      growth_min: 20 * page,
      strategy: Strategy::FirstFit,
      lock_enabled: true,
    }
  }
}

/// Byte counters snapshot. All three values come from the same critical
/// section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
  pub allocated: usize,
  pub free: usize,
  pub peak: usize,
}

struct HeapState {
  blocks: BTreeMap<usize, Block>,
  provider: PageProvider,
  total_allocated: usize,
  total_free: usize,
  peak_allocated: usize,
  strategy: Strategy,
}

/// A thread-safe heap manager over a [`PageProvider`].
///
/// The mutex and the state it guards are one value, so operations are
/// serialized whether or not the caller asked for concurrency support; the
/// `lock_enabled` flag from [`HeapOptions`] is kept as configuration and
/// shows up in [`Heap::dump`].
pub struct Heap {
  state: Mutex<HeapState>,
  growth_min: usize,
  lock_enabled: bool,
}

impl Heap {
  /// Builds a heap with one initial reservation and a single FREE block
  /// spanning it.
  pub fn new(options: HeapOptions) -> Result<Self, AllocError> {
    let page = page::page_size();

    if options.initial_size == 0 || !is_aligned!(options.initial_size, page) {
      error!("heap: invalid initial size {}", options.initial_size);
      return Err(AllocError::InvalidArgument);
    }

    if options.growth_min == 0 || !is_aligned!(options.growth_min, page) {
      error!("heap: invalid growth minimum {}", options.growth_min);
      return Err(AllocError::InvalidArgument);
    }

    let mut provider = PageProvider::new();
    let start = provider.reserve(None, options.initial_size)?;

    let mut blocks = BTreeMap::new();
    blocks.insert(
      start,
      Block::new(start, options.initial_size, BlockState::Free, start),
    );

    debug!(
      "heap: initialized with {} bytes at {start:#x}, strategy {:?}",
      options.initial_size, options.strategy
    );

    Ok(Self {
      state: Mutex::new(HeapState {
        blocks,
        provider,
        total_allocated: 0,
        total_free: options.initial_size,
        peak_allocated: 0,
        strategy: options.strategy,
      }),
      growth_min: options.growth_min,
      lock_enabled: options.lock_enabled,
    })
  }

  // Every mutation under the lock is applied completely or not at all, so a
  // guard poisoned by a panicking test thread still protects consistent
  // state.
  fn lock_state(&self) -> MutexGuard<'_, HeapState> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Allocates `size` bytes (rounded up to the alignment unit) and returns
  /// the payload start address.
  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<usize, AllocError> {
    if size == 0 {
      error!("allocate: invalid size 0");
      return Err(AllocError::InvalidArgument);
    }

    let aligned = align!(size);
    trace!("allocate: requesting {size} bytes (aligned to {aligned})");

    let mut state = self.lock_state();

    let start = match select_block(state.strategy, state.blocks.values(), aligned) {
      Some(start) => start,
      None => self.grow(&mut state, aligned)?,
    };

    if let Some(block) = state.blocks.get_mut(&start) {
      if block.size > aligned {
        if let Some(tail) = block.split(aligned) {
          state.blocks.insert(tail.start, tail);
        }
      }
    }

    let Some(block) = state.blocks.get_mut(&start) else {
      error!("allocate: selected block {start:#x} vanished");
      return Err(AllocError::Corrupted);
    };

    block.state = BlockState::Allocated;
    let granted = block.size;

    state.total_allocated += granted;
    state.total_free -= granted;
    state.peak_allocated = state.peak_allocated.max(state.total_allocated);

    trace!("allocate: {granted} bytes at {start:#x}");

    Ok(start)
  }

  /// Releases the block starting exactly at `addr` and coalesces it with
  /// free neighbors of the same reservation.
  ///
  /// Interior addresses are rejected; freeing an already-free block is a
  /// distinct error.
  pub fn free(
    &self,
    addr: usize,
  ) -> Result<(), AllocError> {
    if addr == 0 {
      error!("free: null address");
      return Err(AllocError::InvalidAddress);
    }

    trace!("free: releasing {addr:#x}");

    let mut state = self.lock_state();

    let (start, block) = match state.blocks.range(..=addr).next_back() {
      Some((&start, block)) if block.contains(addr) => (start, *block),
      _ => {
        error!("free: no block contains {addr:#x}");
        return Err(AllocError::InvalidAddress);
      }
    };

    if start != addr {
      error!("free: {addr:#x} points inside the block at {start:#x}");
      return Err(AllocError::InvalidAddress);
    }

    if block.is_free() {
      error!("free: double free at {addr:#x}");
      return Err(AllocError::DoubleFree);
    }

    if let Some(freed) = state.blocks.get_mut(&start) {
      freed.state = BlockState::Free;
    }
    state.total_allocated -= block.size;
    state.total_free += block.size;

    try_merge_adjacent(&mut state.blocks, start);

    Ok(())
  }

  fn grow(
    &self,
    state: &mut HeapState,
    aligned: usize,
  ) -> Result<usize, AllocError> {
    let page = page::page_size();
    let extend = align_to!(aligned, page).max(self.growth_min);

    debug!("allocate: no free block found, extending heap by {extend} bytes");

    let start = state.provider.reserve(None, extend)?;
    state
      .blocks
      .insert(start, Block::new(start, extend, BlockState::Free, start));
    state.total_free += extend;

    Ok(start)
  }

  /// One sweep over the whole sequence merging every mergeable pair.
  /// `free` already coalesces eagerly, so this normally reports 0; it
  /// exists so tests and diagnostics can prove that.
  pub fn merge_free_blocks(&self) -> usize {
    let mut state = self.lock_state();
    let blocks = &mut state.blocks;

    let Some((&first, _)) = blocks.iter().next() else {
      return 0;
    };

    let mut merges = 0;
    let mut cursor = first;

    loop {
      let Some((&next_start, &next)) = blocks.range((Excluded(cursor), Unbounded)).next() else {
        break;
      };
      let Some(&current) = blocks.get(&cursor) else {
        break;
      };

      if current.is_free()
        && next.is_free()
        && next.region == current.region
        && current.is_adjacent_to(&next)
      {
        blocks.remove(&next_start);
        if let Some(grown) = blocks.get_mut(&cursor) {
          grown.size += next.size;
        }
        merges += 1;
        // stay put: the grown block may touch another free neighbor
      } else {
        cursor = next_start;
      }
    }

    merges
  }

  /// Consistent counter snapshot.
  pub fn stats(&self) -> Stats {
    let state = self.lock_state();

    Stats {
      allocated: state.total_allocated,
      free: state.total_free,
      peak: state.peak_allocated,
    }
  }

  /// Walks the block sequence checking the structural invariants. Never
  /// mutates.
  pub fn verify(&self) -> Result<(), AllocError> {
    let state = self.lock_state();

    let mut counted_allocated = 0usize;
    let mut counted_free = 0usize;
    let mut prev: Option<Block> = None;

    for (&start, block) in &state.blocks {
      if start != block.start {
        error!(
          "verify: key {start:#x} does not match block start {:#x}",
          block.start
        );
        return Err(AllocError::Corrupted);
      }

      if !block.check() {
        error!("verify: malformed block {block:?}");
        return Err(AllocError::Corrupted);
      }

      let backed = state
        .provider
        .find(block.start)
        .is_some_and(|r| r.start == block.region && r.contains_range(block.start, block.size));
      if !backed {
        error!("verify: block {:#x} not backed by its reservation", block.start);
        return Err(AllocError::Corrupted);
      }

      if let Some(p) = prev {
        if p.end() > block.start {
          error!("verify: blocks overlap at {:#x}", block.start);
          return Err(AllocError::Corrupted);
        }
        if p.is_free() && block.is_free() && p.region == block.region && p.is_adjacent_to(block) {
          error!("verify: adjacent free blocks at {:#x}", block.start);
          return Err(AllocError::Corrupted);
        }
      }

      match block.state {
        BlockState::Free => counted_free += block.size,
        BlockState::Allocated => counted_allocated += block.size,
      }

      prev = Some(*block);
    }

    if counted_allocated != state.total_allocated || counted_free != state.total_free {
      error!(
        "verify: counter mismatch (allocated {counted_allocated} vs {}, free {counted_free} vs {})",
        state.total_allocated, state.total_free
      );
      return Err(AllocError::Corrupted);
    }

    if state.peak_allocated < state.total_allocated {
      error!("verify: peak below current allocation");
      return Err(AllocError::Corrupted);
    }

    trace!("verify: OK");

    Ok(())
  }

  /// Writes a human-readable dump of the heap and its reservations.
  pub fn dump<W: io::Write>(
    &self,
    out: &mut W,
  ) -> io::Result<()> {
    let state = self.lock_state();

    writeln!(out, "=== Heap Dump ===")?;
    writeln!(out, "Strategy: {:?}", state.strategy)?;
    writeln!(out, "Lock enabled: {}", self.lock_enabled)?;
    writeln!(out, "Total blocks: {}", state.blocks.len())?;
    writeln!(out, "Allocated: {} bytes", state.total_allocated)?;
    writeln!(out, "Free: {} bytes", state.total_free)?;
    writeln!(out, "Peak: {} bytes", state.peak_allocated)?;

    for (i, block) in state.blocks.values().enumerate() {
      let state_str = if block.is_free() { "FREE" } else { "ALLOCATED" };
      writeln!(
        out,
        "[Block {i}] addr={:#x} size={} state={state_str}",
        block.start, block.size
      )?;
    }

    state.provider.dump(out)?;
    writeln!(out, "=================")
  }

  /// Returns every reservation to the OS and discards all block metadata.
  /// The heap is empty afterwards; counters read zero.
  pub fn cleanup(&self) {
    debug!("cleanup: releasing all reservations");

    let mut state = self.lock_state();
    state.blocks.clear();
    state.provider.cleanup();
    state.total_allocated = 0;
    state.total_free = 0;
    state.peak_allocated = 0;
  }

  /// Number of blocks in the sequence.
  pub fn block_count(&self) -> usize {
    self.lock_state().blocks.len()
  }

  /// Number of outstanding reservations.
  pub fn region_count(&self) -> usize {
    self.lock_state().provider.region_count()
  }

  /// Total bytes reserved from the OS.
  pub fn total_reserved(&self) -> usize {
    self.lock_state().provider.total_reserved()
  }

  pub fn strategy(&self) -> Strategy {
    self.lock_state().strategy
  }

  pub fn lock_enabled(&self) -> bool {
    self.lock_enabled
  }
}

/// Pure selection over the address-ordered block iterator. Iteration order
/// breaks best/worst ties in favor of the lower address.
fn select_block<'a, I>(
  strategy: Strategy,
  blocks: I,
  size: usize,
) -> Option<usize>
where
  I: IntoIterator<Item = &'a Block>,
{
  let mut candidates = blocks.into_iter().filter(|b| b.can_satisfy(size));

  match strategy {
    Strategy::FirstFit => candidates.next().map(|b| b.start),
    Strategy::BestFit => {
      let mut selected: Option<&Block> = None;
      for block in candidates {
        if selected.map_or(true, |s| block.size < s.size) {
          selected = Some(block);
        }
      }
      selected.map(|b| b.start)
    }
    Strategy::WorstFit => {
      let mut selected: Option<&Block> = None;
      for block in candidates {
        if selected.map_or(true, |s| block.size > s.size) {
          selected = Some(block);
        }
      }
      selected.map(|b| b.start)
    }
  }
}

/// Merges the free block at `start` with its free neighbors, successor
/// first, then predecessor. At most one merge per side; merges never cross
/// a reservation boundary.
fn try_merge_adjacent(
  blocks: &mut BTreeMap<usize, Block>,
  start: usize,
) -> usize {
  let mut merges = 0;

  let Some(&block) = blocks.get(&start) else {
    return 0;
  };
  if !block.is_free() {
    return 0;
  }

  if let Some((&next_start, &next)) = blocks.range((Excluded(start), Unbounded)).next() {
    if next.is_free() && next.region == block.region && block.is_adjacent_to(&next) {
      blocks.remove(&next_start);
      if let Some(grown) = blocks.get_mut(&start) {
        grown.size += next.size;
      }
      merges += 1;
    }
  }

  let Some(&block) = blocks.get(&start) else {
    return merges;
  };
  if let Some((&prev_start, &prev)) = blocks.range(..start).next_back() {
    if prev.is_free() && prev.region == block.region && prev.is_adjacent_to(&block) {
      blocks.remove(&start);
      if let Some(grown) = blocks.get_mut(&prev_start) {
        grown.size += block.size;
      }
      merges += 1;
    }
  }

  merges
}

#[cfg(test)]
mod tests {
  use super::*;

  fn heap_with(strategy: Strategy) -> Heap {
    Heap::new(HeapOptions {
      strategy,
      lock_enabled: false,
      ..HeapOptions::default()
    })
    .unwrap()
  }

  fn blocks_of(heap: &Heap) -> Vec<Block> {
    heap.lock_state().blocks.values().copied().collect()
  }

  #[test]
  fn init_rejects_bad_sizes() {
    let page = page::page_size();

    for initial_size in [0, 100, page + 1] {
      let result = Heap::new(HeapOptions {
        initial_size,
        ..HeapOptions::default()
      });
      assert_eq!(result.err(), Some(AllocError::InvalidArgument));
    }

    let result = Heap::new(HeapOptions {
      growth_min: page / 2,
      ..HeapOptions::default()
    });
    assert_eq!(result.err(), Some(AllocError::InvalidArgument));
  }

  #[test]
  fn fresh_heap_is_one_free_block() {
    let heap = heap_with(Strategy::FirstFit);
    let blocks = blocks_of(&heap);

    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].is_free());
    assert_eq!(blocks[0].size, 10 * page::page_size());

    let stats = heap.stats();
    assert_eq!(stats.allocated, 0);
    assert_eq!(stats.free, blocks[0].size);
    assert_eq!(stats.peak, 0);
    assert!(heap.verify().is_ok());
  }

  #[test]
  fn allocate_rounds_up_and_splits() {
    let heap = heap_with(Strategy::FirstFit);

    let addr = heap.allocate(100).unwrap();
    assert!(is_aligned!(addr, 8));

    let blocks = blocks_of(&heap);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].start, addr);
    assert_eq!(blocks[0].size, 104);
    assert_eq!(blocks[0].state, BlockState::Allocated);
    assert!(blocks[1].is_free());
    assert!(blocks[0].is_adjacent_to(&blocks[1]));

    assert_eq!(heap.stats().allocated, 104);
    assert!(heap.verify().is_ok());
  }

  #[test]
  fn allocate_zero_is_an_error() {
    let heap = heap_with(Strategy::FirstFit);
    assert_eq!(heap.allocate(0), Err(AllocError::InvalidArgument));
    assert_eq!(heap.stats().allocated, 0);
  }

  #[test]
  fn allocations_are_disjoint_and_aligned() {
    let heap = heap_with(Strategy::FirstFit);
    let sizes = [100usize, 200, 512, 1024, 2048, 4096, 512, 256, 128, 64];

    let mut addrs = Vec::new();
    for size in sizes {
      let addr = heap.allocate(size).unwrap();
      assert!(is_aligned!(addr, 8));
      addrs.push((addr, align!(size)));
    }

    for (i, &(a_start, a_size)) in addrs.iter().enumerate() {
      for &(b_start, b_size) in addrs.iter().skip(i + 1) {
        let disjoint = a_start + a_size <= b_start || b_start + b_size <= a_start;
        assert!(disjoint, "intervals overlap: {a_start:#x} and {b_start:#x}");
      }
    }

    assert!(heap.verify().is_ok());
  }

  #[test]
  fn split_and_coalesce_round_trip() {
    let heap = heap_with(Strategy::FirstFit);
    let page = page::page_size();

    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(200).unwrap();
    let c = heap.allocate(50).unwrap();

    assert_eq!(b, a + 104);
    assert_eq!(c, b + 200);
    assert_eq!(heap.block_count(), 4);

    // middle free: neighbors allocated, nothing merges
    heap.free(b).unwrap();
    assert_eq!(heap.block_count(), 4);
    assert!(heap.verify().is_ok());

    // a joins the b-hole into one 304-byte free region
    heap.free(a).unwrap();
    assert_eq!(heap.block_count(), 3);
    let blocks = blocks_of(&heap);
    assert_eq!(blocks[0].start, a);
    assert_eq!(blocks[0].size, 104 + 200);
    assert!(blocks[0].is_free());

    // c merges both sides: one free block spans the whole reservation
    heap.free(c).unwrap();
    assert_eq!(heap.block_count(), 1);
    let blocks = blocks_of(&heap);
    assert_eq!(blocks[0].size, 10 * page);
    assert!(blocks[0].is_free());

    assert_eq!(heap.stats().allocated, 0);
    assert_eq!(heap.merge_free_blocks(), 0);
    assert!(heap.verify().is_ok());
  }

  #[test]
  fn exhaustion_triggers_growth() {
    let page = page::page_size();
    let heap = Heap::new(HeapOptions {
      initial_size: page,
      ..HeapOptions::default()
    })
    .unwrap();

    let addr = heap.allocate(page + 8).unwrap();
    assert!(is_aligned!(addr, 8));
    assert_eq!(heap.region_count(), 2);

    let stats = heap.stats();
    assert_eq!(stats.allocated, page + 8);
    assert!(stats.free > 0);
    assert_eq!(stats.free, page + 20 * page - (page + 8));
    assert!(heap.verify().is_ok());

    heap.free(addr).unwrap();
    assert_eq!(heap.stats().allocated, 0);
    assert!(heap.verify().is_ok());
  }

  #[test]
  fn exact_fit_consumes_the_whole_block_without_growth() {
    let page = page::page_size();
    let heap = Heap::new(HeapOptions {
      initial_size: page,
      ..HeapOptions::default()
    })
    .unwrap();

    let addr = heap.allocate(page).unwrap();
    assert_eq!(heap.region_count(), 1);
    assert_eq!(heap.block_count(), 1);
    assert_eq!(heap.stats().free, 0);

    heap.free(addr).unwrap();
    assert_eq!(heap.stats().free, page);
    assert_eq!(heap.block_count(), 1);
  }

  #[test]
  fn first_best_and_worst_fit_pick_different_holes() {
    // layout per heap: big(512) g(8) small(128) g(8) tail, then free big+small
    let build = |strategy| {
      let heap = heap_with(strategy);
      let big = heap.allocate(512).unwrap();
      let _g1 = heap.allocate(8).unwrap();
      let small = heap.allocate(128).unwrap();
      let _g2 = heap.allocate(8).unwrap();
      heap.free(big).unwrap();
      heap.free(small).unwrap();
      (heap, big, small)
    };

    let (heap, big, _) = build(Strategy::FirstFit);
    assert_eq!(heap.allocate(96).unwrap(), big);

    let (heap, _, small) = build(Strategy::BestFit);
    assert_eq!(heap.allocate(96).unwrap(), small);

    let (heap, big, small) = build(Strategy::WorstFit);
    let addr = heap.allocate(96).unwrap();
    assert_ne!(addr, big);
    assert_ne!(addr, small);
    assert!(heap.verify().is_ok());
  }

  #[test]
  fn best_fit_ties_break_by_address_order() {
    let heap = heap_with(Strategy::BestFit);

    let x = heap.allocate(128).unwrap();
    let _g1 = heap.allocate(8).unwrap();
    let y = heap.allocate(128).unwrap();
    let _g2 = heap.allocate(8).unwrap();
    heap.free(x).unwrap();
    heap.free(y).unwrap();

    assert_eq!(heap.allocate(96).unwrap(), x);
  }

  #[test]
  fn free_rejects_unknown_and_interior_addresses() {
    let heap = heap_with(Strategy::FirstFit);
    let addr = heap.allocate(64).unwrap();

    assert_eq!(heap.free(0), Err(AllocError::InvalidAddress));
    assert_eq!(heap.free(0x10), Err(AllocError::InvalidAddress));
    assert_eq!(heap.free(addr + 8), Err(AllocError::InvalidAddress));
    // interior of the free tail block
    assert_eq!(heap.free(addr + 72), Err(AllocError::InvalidAddress));

    // the failed frees changed nothing
    assert_eq!(heap.stats().allocated, 64);
    heap.free(addr).unwrap();
    assert_eq!(heap.stats().allocated, 0);
  }

  #[test]
  fn double_free_is_detected() {
    let heap = heap_with(Strategy::FirstFit);
    let addr = heap.allocate(64).unwrap();

    heap.free(addr).unwrap();
    assert_eq!(heap.free(addr), Err(AllocError::DoubleFree));
    assert!(heap.verify().is_ok());
  }

  #[test]
  fn peak_tracks_the_high_water_mark() {
    let heap = heap_with(Strategy::FirstFit);

    let a = heap.allocate(1000).unwrap();
    let b = heap.allocate(2000).unwrap();
    assert_eq!(heap.stats().peak, align!(1000) + 2000);

    heap.free(a).unwrap();
    heap.free(b).unwrap();

    let stats = heap.stats();
    assert_eq!(stats.allocated, 0);
    assert_eq!(stats.peak, align!(1000) + 2000);
  }

  #[test]
  fn verify_detects_counter_tampering() {
    let heap = heap_with(Strategy::FirstFit);
    let _addr = heap.allocate(64).unwrap();
    assert!(heap.verify().is_ok());

    heap.lock_state().total_allocated += 8;
    assert_eq!(heap.verify(), Err(AllocError::Corrupted));
  }

  #[test]
  fn verify_detects_uncoalesced_free_neighbors() {
    let heap = heap_with(Strategy::FirstFit);

    // manufacture two adjacent free blocks by splitting the initial one
    {
      let mut state = heap.lock_state();
      let (&start, _) = state.blocks.iter().next().unwrap();
      let tail = state
        .blocks
        .get_mut(&start)
        .unwrap()
        .split(4096)
        .unwrap();
      state.blocks.insert(tail.start, tail);
    }

    assert_eq!(heap.verify(), Err(AllocError::Corrupted));

    // the sweep repairs exactly one pair, after which verify passes again
    assert_eq!(heap.merge_free_blocks(), 1);
    assert!(heap.verify().is_ok());
  }

  #[test]
  fn cleanup_empties_the_heap() {
    let heap = heap_with(Strategy::FirstFit);
    let _a = heap.allocate(100).unwrap();
    let _b = heap.allocate(200).unwrap();

    heap.cleanup();

    assert_eq!(heap.block_count(), 0);
    assert_eq!(heap.region_count(), 0);
    assert_eq!(heap.total_reserved(), 0);
    let stats = heap.stats();
    assert_eq!(stats.allocated, 0);
    assert_eq!(stats.free, 0);
    assert_eq!(stats.peak, 0);
  }

  #[test]
  fn dump_lists_every_block() {
    let heap = heap_with(Strategy::FirstFit);
    let _addr = heap.allocate(64).unwrap();

    let mut out = Vec::new();
    heap.dump(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("=== Heap Dump ==="));
    assert!(text.contains("state=ALLOCATED"));
    assert!(text.contains("state=FREE"));
    assert!(text.contains("=== VM Regions Dump ==="));
  }
}
