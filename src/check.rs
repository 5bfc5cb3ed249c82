//! Heap consistency checker.
//!
//! A read-only walk of the free list that verifies the heap's invariants.
//! It never touches allocator state, so it can run between any two
//! operations in a test without changing what happens next.

use std::ops::ControlFlow;

use thiserror::Error;

use crate::{
  align::ALIGNMENT,
  block::{Block, HEADER_SIZE},
  free_list::FreeList,
  heap::Ledger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
  /// Stop at the first violation.
  FailFast,
  /// Collect every violation the walk can reach.
  #[default]
  ReportAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvariantViolation {
  #[error("heap is initialized but owns no memory")]
  NoRegions,
  #[error("free list is empty but {unaccounted} bytes are not allocated")]
  MissingHead { unaccounted: usize },
  #[error("block {addr:#x} on the free list is marked allocated")]
  AllocatedInFreeList { addr: usize },
  #[error("free list goes backwards from {addr:#x} to {next:#x}")]
  OutOfOrder { addr: usize, next: usize },
  #[error("free block {addr:#x} overlaps the next free block {next:#x}")]
  Overlapping { addr: usize, next: usize },
  #[error("free blocks {addr:#x} and {next:#x} are adjacent but not coalesced")]
  Uncoalesced { addr: usize, next: usize },
  #[error("free block {addr:#x} is not 16-byte aligned")]
  Misaligned { addr: usize },
  #[error("free block {addr:#x} lies outside the heap")]
  OutsideHeap { addr: usize },
  #[error("free block {addr:#x} runs past the end of its region at {region_end:#x}")]
  PastRegionEnd { addr: usize, region_end: usize },
  #[error("blocks account for {accounted} bytes but the heap obtained {obtained}")]
  Conservation { obtained: usize, accounted: usize },
}

struct Report {
  mode: CheckMode,
  violations: Vec<InvariantViolation>,
}

impl Report {
  fn flag(
    &mut self,
    violation: InvariantViolation,
  ) -> ControlFlow<()> {
    self.violations.push(violation);
    match self.mode {
      CheckMode::FailFast => ControlFlow::Break(()),
      CheckMode::ReportAll => ControlFlow::Continue(()),
    }
  }
}

/// Checks the free list against the heap's bookkeeping.
///
/// # Safety
///
/// Every node reachable from the head through links that pass the
/// alignment and bounds checks must be readable memory. That holds for any
/// list the allocator itself produced, corrupted or not.
pub(crate) unsafe fn check(
  list: &FreeList,
  ledger: &Ledger,
  mode: CheckMode,
) -> Result<(), Vec<InvariantViolation>> {
  let mut report = Report {
    mode,
    violations: Vec::new(),
  };

  let _ = unsafe { walk(list, ledger, &mut report) };

  if report.violations.is_empty() {
    Ok(())
  } else {
    Err(report.violations)
  }
}

unsafe fn walk(
  list: &FreeList,
  ledger: &Ledger,
  report: &mut Report,
) -> ControlFlow<()> {
  if !ledger.initialized {
    return ControlFlow::Continue(());
  }

  if ledger.regions == 0 {
    report.flag(InvariantViolation::NoRegions)?;
  }

  if list.is_empty() {
    let allocated = ledger.allocated_bytes + ledger.allocated_blocks * HEADER_SIZE;
    if allocated != ledger.obtained {
      report.flag(InvariantViolation::MissingHead {
        unaccounted: ledger.obtained.saturating_sub(allocated),
      })?;
    }
  }

  let mut free_blocks = 0;
  let mut free_bytes = 0;
  let mut current = list.head();

  while !current.is_null() {
    let addr = current.addr();

    // Nodes that fail these two are not safe to read.
    if !addr.is_multiple_of(ALIGNMENT) {
      report.flag(InvariantViolation::Misaligned { addr })?;
      return ControlFlow::Continue(());
    }
    let Some(span) = ledger
      .span_of(addr)
      .filter(|span| addr + HEADER_SIZE <= span.end())
    else {
      report.flag(InvariantViolation::OutsideHeap { addr })?;
      return ControlFlow::Continue(());
    };

    unsafe {
      if Block::is_allocated(current) {
        report.flag(InvariantViolation::AllocatedInFreeList { addr })?;
      }
      if Block::end_address(current) > span.end() {
        report.flag(InvariantViolation::PastRegionEnd {
          addr,
          region_end: span.end(),
        })?;
      }

      free_blocks += 1;
      free_bytes += Block::payload_size(current);

      let next = Block::next(current);
      if !next.is_null() {
        let end = Block::end_address(current);

        if next <= current {
          // A backwards link may be a cycle; the rest of the list cannot be
          // trusted.
          report.flag(InvariantViolation::OutOfOrder {
            addr,
            next: next.addr(),
          })?;
          return ControlFlow::Continue(());
        }
        if end > next.addr() {
          report.flag(InvariantViolation::Overlapping {
            addr,
            next: next.addr(),
          })?;
        } else if end == next.addr() {
          report.flag(InvariantViolation::Uncoalesced {
            addr,
            next: next.addr(),
          })?;
        }
      }

      current = next;
    }
  }

  let accounted = free_bytes
    + ledger.allocated_bytes
    + (free_blocks + ledger.allocated_blocks) * HEADER_SIZE;
  if accounted != ledger.obtained {
    report.flag(InvariantViolation::Conservation {
      obtained: ledger.obtained,
      accounted,
    })?;
  }

  ControlFlow::Continue(())
}
