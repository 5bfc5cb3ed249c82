//! Block header codec.
//!
//! Every block, free or allocated, starts with a [`Block`] header followed by
//! its payload:
//!
//! ```text
//!   header address                  payload address
//!   │                               │
//!   ▼                               ▼
//!   ┌───────────────┬───────────────┬──────────────────────────┐
//!   │ size_and_flag │     link      │   payload (size bytes)   │
//!   └───────────────┴───────────────┴──────────────────────────┘
//!    bit 0: allocated                                          ▲
//!    bits 4..: payload size                                    │
//!                                                          end address
//! ```
//!
//! This module is the only place that knows the bit layout or does the
//! header/payload address arithmetic.

use std::{mem, ptr};

use crate::align::{ALIGNMENT, checked_align};

const ALLOCATED: usize = 0x1;

/// Size in bytes of a block header.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

const _: () = assert!(HEADER_SIZE == ALIGNMENT);
const _: () = assert!(mem::align_of::<Block>() == ALIGNMENT);

#[repr(C, align(16))]
pub struct Block {
  size_and_flag: usize,
  link: *mut Block,
}

impl Block {
  /// Payload size of the block that serves a request for `requested` bytes:
  /// rounded up to the alignment, and never smaller than one alignment unit
  /// so that every allocation owns at least one writable byte.
  pub fn fitted_size(requested: usize) -> Option<usize> {
    checked_align(requested.max(1), ALIGNMENT)
  }

  /// Writes a fresh header at `addr` with a null link.
  ///
  /// # Safety
  ///
  /// `addr` must point to at least `HEADER_SIZE + size` writable bytes that
  /// the heap owns.
  pub unsafe fn initialize(
    addr: *mut u8,
    size: usize,
    allocated: bool,
  ) -> *mut Block {
    assert!(!addr.is_null(), "block header must not be null");
    assert!(
      addr.addr().is_multiple_of(ALIGNMENT),
      "block header must be {ALIGNMENT}-byte aligned"
    );
    assert!(
      size.is_multiple_of(ALIGNMENT),
      "block size {size} is not a multiple of {ALIGNMENT}"
    );

    let block = addr.cast::<Block>();
    unsafe {
      block.write(Block {
        size_and_flag: size | usize::from(allocated),
        link: ptr::null_mut(),
      });
    }
    block
  }

  pub unsafe fn is_allocated(block: *const Block) -> bool {
    assert!(!block.is_null(), "block header must not be null");
    unsafe { (*block).size_and_flag & ALLOCATED != 0 }
  }

  pub unsafe fn mark_allocated(block: *mut Block) {
    assert!(!block.is_null(), "block header must not be null");
    unsafe { (*block).size_and_flag |= ALLOCATED }
  }

  pub unsafe fn mark_free(block: *mut Block) {
    assert!(!block.is_null(), "block header must not be null");
    unsafe { (*block).size_and_flag &= !ALLOCATED }
  }

  /// Payload size of the block, header excluded.
  pub unsafe fn payload_size(block: *const Block) -> usize {
    assert!(!block.is_null(), "block header must not be null");
    unsafe { (*block).size_and_flag & !ALLOCATED }
  }

  /// Bytes the block occupies in the heap, header included.
  pub unsafe fn footprint(block: *const Block) -> usize {
    unsafe { HEADER_SIZE + Self::payload_size(block) }
  }

  pub fn payload_address_of(block: *mut Block) -> *mut u8 {
    assert!(!block.is_null(), "block header must not be null");
    block.cast::<u8>().wrapping_add(HEADER_SIZE)
  }

  /// Recovers the header from a payload pointer. The result is only a
  /// candidate; callers validate it before dereferencing.
  pub fn header_of(payload: *mut u8) -> *mut Block {
    assert!(!payload.is_null(), "payload must not be null");
    payload.wrapping_sub(HEADER_SIZE).cast::<Block>()
  }

  /// One past the last payload byte, i.e. where the next block in memory
  /// would start.
  pub unsafe fn end(block: *mut Block) -> *mut u8 {
    unsafe { block.cast::<u8>().wrapping_add(Self::footprint(block)) }
  }

  pub unsafe fn end_address(block: *const Block) -> usize {
    unsafe { block.addr() + Self::footprint(block) }
  }

  /// Next free block in address order. Only meaningful for free blocks.
  pub unsafe fn next(block: *const Block) -> *mut Block {
    assert!(!block.is_null(), "block header must not be null");
    unsafe { (*block).link }
  }

  pub unsafe fn set_next(
    block: *mut Block,
    next: *mut Block,
  ) {
    assert!(!block.is_null(), "block header must not be null");
    unsafe { (*block).link = next }
  }
}
