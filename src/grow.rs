//! Heap growth.
//!
//! A [`HeapGrower`] hands out raw regions; [`extend`] turns one region into a
//! single free block ready to be linked into the free list.
//!
//! ```text
//!   grower.grow(n)                       extend()
//!   ┌────────────────────────────┐       ┌──────┬─────────────────────┐
//!   │   len >= n zeroed bytes    │  ──►  │header│ payload: len - 16   │
//!   └────────────────────────────┘       └──────┴─────────────────────┘
//!   page aligned                          free, link = null
//! ```

use std::{
  alloc::{self, Layout},
  ptr::{self, NonNull},
};

use libc::{c_void, intptr_t};
use log::{debug, warn};

use crate::{
  align::{ALIGNMENT, checked_round_up},
  block::{Block, HEADER_SIZE},
  error::AllocError,
};

/// A raw memory region obtained from a [`HeapGrower`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
  pub start: NonNull<u8>,
  pub len: usize,
}

impl Region {
  pub fn end(&self) -> usize {
    self.start.addr().get() + self.len
  }

  pub fn contains(
    &self,
    addr: usize,
  ) -> bool {
    addr >= self.start.addr().get() && addr < self.end()
  }
}

/// The raw heap-growth primitive the allocator is built on.
///
/// # Safety
///
/// A successful [`grow`](Self::grow) must return a region that is
///
/// - at least `min_bytes` long and a multiple of [`ALIGNMENT`] in length,
/// - aligned to at least [`ALIGNMENT`],
/// - zero-filled, readable and writable,
/// - exclusively owned by the caller for as long as the grower is alive, and
///   disjoint from every region returned before.
///
/// Successive regions need not be contiguous.
pub unsafe trait HeapGrower {
  fn grow(
    &mut self,
    min_bytes: usize,
  ) -> Result<Region, AllocError>;

  /// Granularity that requests are rounded up to.
  fn granularity(&self) -> usize;
}

/// Obtains a region of at least `min_bytes` and formats it as one free block
/// spanning the whole region.
pub(crate) fn extend<G: HeapGrower>(
  grower: &mut G,
  min_bytes: usize,
) -> Result<(*mut Block, Region), AllocError> {
  let region = grower.grow(min_bytes).inspect_err(|_| {
    warn!("heap grower could not supply {min_bytes} bytes");
  })?;

  assert!(
    region.len >= min_bytes && region.len > HEADER_SIZE,
    "grower returned a short region ({} < {min_bytes} bytes)",
    region.len
  );
  assert!(
    region.len.is_multiple_of(ALIGNMENT),
    "grower returned a region length that is not a multiple of {ALIGNMENT}"
  );

  let block =
    unsafe { Block::initialize(region.start.as_ptr(), region.len - HEADER_SIZE, false) };

  debug!(
    "heap grew by {} bytes at {:p} (requested {min_bytes})",
    region.len, block
  );

  Ok((block, region))
}

fn page_size() -> usize {
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  usize::try_from(size).unwrap_or(4096)
}

/// Grows the heap with anonymous private `mmap` mappings.
///
/// Mappings are never unmapped; the heap lives as long as the process.
pub struct MmapGrower {
  page_size: usize,
}

impl MmapGrower {
  pub fn new() -> Self {
    Self {
      page_size: page_size(),
    }
  }
}

impl Default for MmapGrower {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl HeapGrower for MmapGrower {
  fn grow(
    &mut self,
    min_bytes: usize,
  ) -> Result<Region, AllocError> {
    let oom = AllocError::OutOfMemory {
      requested: min_bytes,
    };
    let len = checked_round_up(min_bytes.max(1), self.page_size).ok_or(oom)?;

    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(oom);
    }

    let start = NonNull::new(address.cast::<u8>()).ok_or(oom)?;
    Ok(Region { start, len })
  }

  fn granularity(&self) -> usize {
    self.page_size
  }
}

/// Grows the heap by moving the program break with `sbrk(2)`.
///
/// The break is page-aligned before every growth, so every region is page
/// aligned. Each region starts where the previous one ended unless something
/// else in the process moved the break in between; the heap copes with
/// either.
pub struct SbrkGrower {
  page_size: usize,
}

impl SbrkGrower {
  pub fn new() -> Self {
    Self {
      page_size: page_size(),
    }
  }

  /// Current program break.
  pub fn program_break() -> *mut u8 {
    unsafe { libc::sbrk(0).cast::<u8>() }
  }

  fn bump(increment: usize) -> Option<*mut u8> {
    let increment = intptr_t::try_from(increment).ok()?;
    let address = unsafe { libc::sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return None;
    }

    Some(address.cast::<u8>())
  }
}

impl Default for SbrkGrower {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl HeapGrower for SbrkGrower {
  fn grow(
    &mut self,
    min_bytes: usize,
  ) -> Result<Region, AllocError> {
    let oom = AllocError::OutOfMemory {
      requested: min_bytes,
    };
    let len = checked_round_up(min_bytes.max(1), self.page_size).ok_or(oom)?;

    let padding = Self::program_break().align_offset(self.page_size);
    if padding > 0 {
      Self::bump(padding).ok_or(oom)?;
    }

    let address = Self::bump(len).ok_or(oom)?;
    debug_assert!(address.addr().is_multiple_of(self.page_size));

    // Memory given back by an earlier shrink of the break may not be zero.
    unsafe { address.write_bytes(0, len) };

    let start = NonNull::new(address).ok_or(oom)?;
    Ok(Region { start, len })
  }

  fn granularity(&self) -> usize {
    self.page_size
  }
}

/// Hands out consecutive regions of one buffer reserved up front from the
/// Rust global allocator, mimicking a bounded `sbrk`.
///
/// Useful to embed a heap in a fixed memory budget, and gives tests a
/// deterministic, contiguous address space with a reachable out-of-memory
/// condition. The buffer is released when the grower is dropped, which
/// invalidates every pointer handed out from it.
pub struct ArenaGrower {
  buffer: NonNull<u8>,
  layout: Layout,
  used: usize,
  granularity: usize,
}

impl ArenaGrower {
  const BUFFER_ALIGN: usize = 4096;

  /// Reserves `capacity` zeroed bytes, with regions rounded to 4 KiB.
  pub fn new(capacity: usize) -> Self {
    Self::with_granularity(capacity, Self::BUFFER_ALIGN)
  }

  /// Reserves `capacity` zeroed bytes; regions are rounded up to
  /// `granularity`, which must be a non-zero multiple of [`ALIGNMENT`].
  pub fn with_granularity(
    capacity: usize,
    granularity: usize,
  ) -> Self {
    assert!(
      granularity > 0 && granularity.is_multiple_of(ALIGNMENT),
      "arena granularity must be a multiple of {ALIGNMENT}"
    );

    let layout = Layout::from_size_align(capacity.max(1), Self::BUFFER_ALIGN)
      .unwrap_or_else(|_| panic!("arena capacity {capacity} is too large"));
    let buffer = unsafe { alloc::alloc_zeroed(layout) };
    let Some(buffer) = NonNull::new(buffer) else {
      alloc::handle_alloc_error(layout);
    };

    Self {
      buffer,
      layout,
      used: 0,
      granularity,
    }
  }

  pub fn capacity(&self) -> usize {
    self.layout.size()
  }

  pub fn remaining(&self) -> usize {
    self.capacity() - self.used
  }

  /// Address of the first byte of the arena.
  pub fn base(&self) -> *mut u8 {
    self.buffer.as_ptr()
  }
}

unsafe impl HeapGrower for ArenaGrower {
  fn grow(
    &mut self,
    min_bytes: usize,
  ) -> Result<Region, AllocError> {
    let oom = AllocError::OutOfMemory {
      requested: min_bytes,
    };
    let len = checked_round_up(min_bytes.max(1), self.granularity).ok_or(oom)?;

    if len > self.remaining() {
      return Err(oom);
    }

    let start = unsafe { self.buffer.add(self.used) };
    self.used += len;

    Ok(Region { start, len })
  }

  fn granularity(&self) -> usize {
    self.granularity
  }
}

impl Drop for ArenaGrower {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.buffer.as_ptr(), self.layout) };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_regions_are_contiguous() {
    let mut grower = ArenaGrower::with_granularity(1024, 64);

    let first = grower.grow(100).unwrap();
    let second = grower.grow(64).unwrap();

    assert_eq!(first.start.as_ptr(), grower.base());
    assert_eq!(first.len, 128);
    assert_eq!(second.start.addr().get(), first.end());
    assert_eq!(second.len, 64);
    assert_eq!(grower.remaining(), 1024 - 192);
  }

  #[test]
  fn test_arena_exhaustion() {
    let mut grower = ArenaGrower::with_granularity(256, 16);

    assert!(grower.grow(200).is_ok());
    assert_eq!(
      grower.grow(64),
      Err(AllocError::OutOfMemory { requested: 64 })
    );
    assert!(grower.grow(48).is_ok());
    assert_eq!(grower.remaining(), 0);
  }

  #[test]
  fn test_mmap_region_is_page_aligned_and_zeroed() {
    let mut grower = MmapGrower::new();
    let page = grower.granularity();

    let region = grower.grow(page + 1).unwrap();

    assert_eq!(region.len, 2 * page);
    assert_eq!(region.start.addr().get() % page, 0);
    unsafe {
      let bytes = std::slice::from_raw_parts(region.start.as_ptr(), region.len);
      assert!(bytes.iter().all(|&byte| byte == 0));
    }
  }

  #[test]
  fn test_extend_formats_one_free_block() {
    let mut grower = ArenaGrower::with_granularity(4096, 16);

    let (block, region) = extend(&mut grower, 1000).unwrap();

    assert_eq!(region.len, 1008);
    assert_eq!(block.cast::<u8>(), region.start.as_ptr());
    unsafe {
      assert!(!Block::is_allocated(block));
      assert_eq!(Block::payload_size(block), 1008 - HEADER_SIZE);
      assert!(Block::next(block).is_null());
      assert_eq!(Block::end_address(block), region.end());
    }
  }

  #[test]
  fn test_extend_propagates_exhaustion() {
    let mut grower = ArenaGrower::with_granularity(512, 16);

    assert_eq!(
      extend(&mut grower, 1024).map(|(_, region)| region.len),
      Err(AllocError::OutOfMemory { requested: 1024 })
    );
    assert_eq!(grower.remaining(), 512);
  }
}
