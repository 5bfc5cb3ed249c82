//! Address-ordered free list and the allocation side of the engine.
//!
//! Allocation is first-fit: [`FreeList::find`] walks from the lowest address
//! and stops at the first block that can hold the request, then
//! [`FreeList::split`] carves the allocated prefix off it:
//!
//! ```text
//!   before:  prev ──► ┌──────┬──────────────────────────────────┐ ──► next
//!                     │ hdr  │             capacity             │
//!                     └──────┴──────────────────────────────────┘
//!
//!   after:   prev ─────────────────────────────┐
//!                     ┌──────┬──────────┐┌──────▼┬──────────────┐ ──► next
//!                     │ hdr  │   size   ││ hdr   │  remainder   │
//!                     └──────┴──────────┘└───────┴──────────────┘
//!                       allocated          free
//! ```
//!
//! A remainder is only kept if it has room for a header and at least one
//! alignment unit of payload; otherwise the whole block is handed out.

use std::{marker::PhantomData, ptr};

use log::trace;

use crate::block::{Block, HEADER_SIZE};

/// A first-fit match: the block found and the free block linked before it
/// (null when the match is the head).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fit {
  pub prev: *mut Block,
  pub block: *mut Block,
}

pub(crate) struct FreeList {
  pub(crate) head: *mut Block,
}

impl FreeList {
  pub const fn new() -> Self {
    Self {
      head: ptr::null_mut(),
    }
  }

  pub fn head(&self) -> *mut Block {
    self.head
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_null()
  }

  /// Walks the free list in address order.
  ///
  /// # Safety
  ///
  /// The list must be well formed (acyclic, every node a valid header) for
  /// as long as the iterator is used. The consistency checker does its own
  /// guarded walk instead.
  pub unsafe fn iter(&self) -> Iter<'_> {
    Iter {
      current: self.head,
      _list: PhantomData,
    }
  }

  /// First block in address order whose payload can hold `size` bytes.
  /// `size` must already be a fitted size.
  pub unsafe fn find(
    &self,
    size: usize,
  ) -> Option<Fit> {
    unsafe {
      let mut prev = ptr::null_mut();
      let mut current = self.head;

      while !current.is_null() {
        if Block::payload_size(current) >= size {
          trace!(
            "find({size}): first fit at {:p} ({} bytes)",
            current,
            Block::payload_size(current)
          );
          return Some(Fit {
            prev,
            block: current,
          });
        }
        prev = current;
        current = Block::next(current);
      }

      trace!("find({size}): no free block is large enough");
      None
    }
  }

  /// Allocates `size` bytes out of `fit.block`, keeping any usable remainder
  /// on the list in the block's place. Returns the now-allocated block.
  pub unsafe fn split(
    &mut self,
    fit: Fit,
    size: usize,
  ) -> *mut Block {
    unsafe {
      let block = fit.block;
      let capacity = Block::payload_size(block);
      let next = Block::next(block);
      let need = size + HEADER_SIZE;

      assert!(capacity >= size, "split of a block that does not fit");
      debug_assert!(fit.prev.is_null() || Block::next(fit.prev) == block);

      let spare = capacity.saturating_sub(need);

      let successor = if spare >= HEADER_SIZE {
        let fitted = Block::initialize(block.cast(), size, true);
        let remainder = Block::initialize(Block::end(fitted), spare, false);
        Block::set_next(remainder, next);

        trace!(
          "split {:p}: {size} allocated, {} left free at {:p}",
          block,
          Block::payload_size(remainder),
          remainder
        );
        remainder
      } else {
        Block::mark_allocated(block);
        trace!("split {:p}: whole block of {capacity} bytes allocated", block);
        next
      };

      self.relink(fit.prev, successor);
      block
    }
  }

  /// Points `prev` (or the head, if `prev` is null) at `next`.
  unsafe fn relink(
    &mut self,
    prev: *mut Block,
    next: *mut Block,
  ) {
    if prev.is_null() {
      self.head = next;
    } else {
      unsafe { Block::set_next(prev, next) };
    }
  }
}

pub(crate) struct Iter<'a> {
  current: *mut Block,
  _list: PhantomData<&'a FreeList>,
}

impl Iterator for Iter<'_> {
  type Item = *mut Block;

  fn next(&mut self) -> Option<Self::Item> {
    if self.current.is_null() {
      return None;
    }

    let block = self.current;
    self.current = unsafe { Block::next(block) };
    Some(block)
  }
}
