//! Re-inserting freed blocks and merging them with their free neighbours.
//!
//! A freed block is linked in at its address-ordered position, then merged
//! forward into its successor and backward into its predecessor where the
//! two are adjacent in memory. Both merges may happen, in which case three
//! blocks collapse into one:
//!
//! ```text
//!   prev              block             next
//!   ┌────┬────────┐   ┌────┬────────┐   ┌────┬────────┐
//!   │free│        │   │free│        │   │free│        │
//!   └────┴────────┘   └────┴────────┘   └────┴────────┘
//!                 ▲ adjacent        ▲ adjacent
//!
//!   ┌────┬──────────────────────────────────────────────┐
//!   │free│                 merged payload               │
//!   └────┴──────────────────────────────────────────────┘
//! ```

use std::ptr;

use log::trace;

use crate::{block::Block, error::UsageError, free_list::FreeList};

impl FreeList {
  /// Links the free `block` into the list in address order and coalesces it
  /// with adjacent free neighbours.
  ///
  /// The list is left untouched if `block` overlaps a block already on it.
  pub unsafe fn add_to_heap(
    &mut self,
    block: *mut Block,
  ) -> Result<(), UsageError> {
    unsafe {
      assert!(!Block::is_allocated(block), "only free blocks can be linked");

      let (prev, next) = self.position_of(block)?;
      Block::set_next(block, ptr::null_mut());

      match (prev.is_null(), next.is_null()) {
        (true, true) => {
          trace!("add_to_heap {:p}: only free block", block);
          self.head = block;
        }
        (true, false) => {
          trace!("add_to_heap {:p}: new head", block);
          Self::coalesce(block, next);
          self.head = block;
        }
        (false, true) => {
          trace!("add_to_heap {:p}: new tail", block);
          Self::coalesce(prev, block);
        }
        (false, false) => {
          trace!("add_to_heap {:p}: between {:p} and {:p}", block, prev, next);
          Self::coalesce(block, next);
          Self::coalesce(prev, block);
        }
      }

      Ok(())
    }
  }

  /// Free neighbours that `block` belongs between, as `(prev, next)`; either
  /// is null at the ends of the list.
  unsafe fn position_of(
    &self,
    block: *mut Block,
  ) -> Result<(*mut Block, *mut Block), UsageError> {
    unsafe {
      let mut prev: *mut Block = ptr::null_mut();
      let mut current = self.head;

      while !current.is_null() && current < block {
        prev = current;
        current = Block::next(current);
      }

      let addr = Block::payload_address_of(block).addr();

      if current == block {
        return Err(UsageError::DoubleFree { addr });
      }
      if !prev.is_null() && Block::end_address(prev) > block.addr() {
        return Err(UsageError::Overlap { addr });
      }
      if !current.is_null() && Block::end_address(block) > current.addr() {
        return Err(UsageError::Overlap { addr });
      }

      Ok((prev, current))
    }
  }

  /// Makes `trailer` follow `lead` on the list, folding it into `lead` when
  /// the two are adjacent in memory.
  ///
  /// `lead` must sit below `trailer` without overlapping it.
  unsafe fn coalesce(
    lead: *mut Block,
    trailer: *mut Block,
  ) {
    unsafe {
      let lead_end = Block::end_address(lead);
      let trailer_start = trailer.addr();
      assert!(
        trailer_start >= lead_end,
        "free block {:p} overlaps {:p}",
        lead,
        trailer
      );

      if trailer_start != lead_end {
        Block::set_next(lead, trailer);
        return;
      }

      let merged = Block::payload_size(lead) + Block::footprint(trailer);
      let link = Block::next(trailer);
      trace!(
        "coalesce {:p} + {:p} -> {merged} bytes",
        lead,
        trailer
      );

      Block::initialize(lead.cast(), merged, false);
      Block::set_next(lead, link);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    block::HEADER_SIZE,
    free_list::tests::{snapshot, with_free_blocks},
  };

  /// Initializes a free, unlinked block at `offset` in `buffer`.
  unsafe fn freed(
    buffer: *mut u8,
    offset: usize,
    size: usize,
  ) -> *mut Block {
    unsafe { Block::initialize(buffer.add(offset), size, false) }
  }

  #[test]
  fn test_into_empty_list() {
    with_free_blocks(256, &[], |buffer, list| unsafe {
      list.add_to_heap(freed(buffer, 64, 32)).unwrap();
      assert_eq!(snapshot(list), vec![(buffer.addr() + 64, 32)]);
    });
  }

  #[test]
  fn test_new_head_merges_forward() {
    with_free_blocks(512, &[(64, 64), (256, 32)], |buffer, list| unsafe {
      list.add_to_heap(freed(buffer, 0, 48)).unwrap();

      assert_eq!(
        snapshot(list),
        vec![(buffer.addr(), 48 + HEADER_SIZE + 64), (buffer.addr() + 256, 32)]
      );
    });
  }

  #[test]
  fn test_new_head_not_adjacent() {
    with_free_blocks(512, &[(128, 64)], |buffer, list| unsafe {
      list.add_to_heap(freed(buffer, 0, 48)).unwrap();

      assert_eq!(
        snapshot(list),
        vec![(buffer.addr(), 48), (buffer.addr() + 128, 64)]
      );
    });
  }

  #[test]
  fn test_new_tail_merges_backward() {
    with_free_blocks(512, &[(0, 16), (64, 48)], |buffer, list| unsafe {
      list.add_to_heap(freed(buffer, 128, 64)).unwrap();

      assert_eq!(
        snapshot(list),
        vec![(buffer.addr(), 16), (buffer.addr() + 64, 48 + HEADER_SIZE + 64)]
      );
    });
  }

  #[test]
  fn test_new_tail_not_adjacent() {
    with_free_blocks(512, &[(0, 16)], |buffer, list| unsafe {
      let block = freed(buffer, 256, 64);
      list.add_to_heap(block).unwrap();

      assert_eq!(
        snapshot(list),
        vec![(buffer.addr(), 16), (buffer.addr() + 256, 64)]
      );
      assert!(Block::next(block).is_null());
    });
  }

  #[test]
  fn test_between_merges_both_ways() {
    with_free_blocks(512, &[(0, 48), (128, 32)], |buffer, list| unsafe {
      list.add_to_heap(freed(buffer, 64, 48)).unwrap();

      assert_eq!(
        snapshot(list),
        vec![(buffer.addr(), 48 + 64 + 48)]
      );
    });
  }

  #[test]
  fn test_between_merges_backward_only() {
    with_free_blocks(512, &[(0, 48), (256, 32)], |buffer, list| unsafe {
      list.add_to_heap(freed(buffer, 64, 48)).unwrap();

      assert_eq!(
        snapshot(list),
        vec![(buffer.addr(), 48 + 64), (buffer.addr() + 256, 32)]
      );
    });
  }

  #[test]
  fn test_between_merges_forward_only() {
    with_free_blocks(512, &[(0, 16), (128, 32)], |buffer, list| unsafe {
      list.add_to_heap(freed(buffer, 64, 48)).unwrap();

      assert_eq!(
        snapshot(list),
        vec![(buffer.addr(), 16), (buffer.addr() + 64, 48 + HEADER_SIZE + 32)]
      );
    });
  }

  #[test]
  fn test_between_without_merge() {
    with_free_blocks(512, &[(0, 16), (256, 32)], |buffer, list| unsafe {
      list.add_to_heap(freed(buffer, 96, 48)).unwrap();

      assert_eq!(
        snapshot(list),
        vec![
          (buffer.addr(), 16),
          (buffer.addr() + 96, 48),
          (buffer.addr() + 256, 32)
        ]
      );
    });
  }

  #[test]
  fn test_rejects_block_already_on_list() {
    with_free_blocks(512, &[(0, 16), (64, 32)], |buffer, list| unsafe {
      let before = snapshot(list);
      let block = buffer.add(64).cast::<Block>();

      assert_eq!(
        list.add_to_heap(block),
        Err(UsageError::DoubleFree {
          addr: buffer.addr() + 64 + HEADER_SIZE
        })
      );
      assert_eq!(snapshot(list), before);
    });
  }

  #[test]
  fn test_rejects_overlap() {
    with_free_blocks(512, &[(0, 64), (256, 32)], |buffer, list| unsafe {
      let before = snapshot(list);

      let inside_prev = freed(buffer, 48, 16);
      assert!(matches!(
        list.add_to_heap(inside_prev),
        Err(UsageError::Overlap { .. })
      ));

      let into_next = freed(buffer, 160, 96);
      assert!(matches!(
        list.add_to_heap(into_next),
        Err(UsageError::Overlap { .. })
      ));
      assert_eq!(snapshot(list), before);
    });
  }
}
