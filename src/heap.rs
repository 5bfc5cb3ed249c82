use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::{
  align::{ALIGNMENT, checked_round_up},
  block::{Block, HEADER_SIZE},
  check::{self, CheckMode, InvariantViolation},
  config::HeapConfig,
  error::{AllocError, UsageError},
  free_list::FreeList,
  grow::{self, HeapGrower, MmapGrower, Region},
};

/// Bookkeeping the heap keeps beside the free list, used to validate
/// pointers and by the consistency checker.
#[derive(Debug, Clone, Default)]
pub(crate) struct Ledger {
  pub initialized: bool,
  /// Regions obtained from the grower, in address order, with regions that
  /// touch folded into one span. Blocks tile each span exactly.
  pub spans: Vec<Region>,
  /// Number of successful grower calls.
  pub regions: usize,
  /// Bytes obtained from the grower so far.
  pub obtained: usize,
  pub allocated_blocks: usize,
  /// Payload bytes of allocated blocks, headers excluded.
  pub allocated_bytes: usize,
}

impl Ledger {
  fn record(
    &mut self,
    region: &Region,
  ) {
    self.regions += 1;
    self.obtained += region.len;

    let at = self.spans.partition_point(|span| span.start < region.start);
    self.spans.insert(at, *region);

    // A free block may straddle two touching regions, so they must be
    // walked as one.
    let touches = |lower: &Region, upper: &Region| lower.end() == upper.start.addr().get();

    if at + 1 < self.spans.len() && touches(&self.spans[at], &self.spans[at + 1]) {
      let above = self.spans.remove(at + 1);
      self.spans[at].len += above.len;
    }
    if at > 0 && touches(&self.spans[at - 1], &self.spans[at]) {
      let merged = self.spans.remove(at);
      self.spans[at - 1].len += merged.len;
    }
  }

  /// The span holding the byte at `addr`.
  pub fn span_of(
    &self,
    addr: usize,
  ) -> Option<&Region> {
    let at = self
      .spans
      .partition_point(|span| span.start.addr().get() <= addr);
    at.checked_sub(1)
      .map(|at| &self.spans[at])
      .filter(|span| span.contains(addr))
  }
}

/// A snapshot of how the heap's memory is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
  pub regions: usize,
  pub obtained_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
}

/// A first-fit heap with an address-ordered, coalescing free list.
///
/// The heap is single-threaded: every operation takes `&mut self`, and the
/// type is neither `Send` nor `Sync`. Memory obtained from the grower is
/// never returned to it.
pub struct Heap<G: HeapGrower = MmapGrower> {
  free_list: FreeList,
  grower: G,
  config: HeapConfig,
  ledger: Ledger,
}

impl Heap<MmapGrower> {
  /// A heap growing through anonymous `mmap` with the default configuration.
  pub fn new() -> Self {
    Self::with_grower(MmapGrower::new())
  }
}

impl Default for Heap<MmapGrower> {
  fn default() -> Self {
    Self::new()
  }
}

impl<G: HeapGrower> Heap<G> {
  pub fn with_grower(grower: G) -> Self {
    Self::with_config(grower, HeapConfig::default())
  }

  pub fn with_config(
    grower: G,
    config: HeapConfig,
  ) -> Self {
    Self {
      free_list: FreeList::new(),
      grower,
      config,
      ledger: Ledger::default(),
    }
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn grower(&self) -> &G {
    &self.grower
  }

  pub fn is_initialized(&self) -> bool {
    self.ledger.initialized
  }

  /// Obtains the first region and seeds the free list with it. Must be
  /// called once before any allocation.
  pub fn initialize(&mut self) -> Result<(), AllocError> {
    if self.ledger.initialized {
      return Err(AllocError::AlreadyInitialized);
    }

    let requested = self.config.initial_region.max(2 * HEADER_SIZE);
    let request = checked_round_up(requested, self.grower.granularity())
      .ok_or(AllocError::OutOfMemory { requested })?;

    self.grow(request)?;
    self.ledger.initialized = true;

    debug!("heap initialized with {} bytes", self.ledger.obtained);
    Ok(())
  }

  /// Allocates `size` bytes and returns a 16-byte aligned pointer to them.
  ///
  /// Searches the free list first-fit; if nothing fits, grows the heap once
  /// and searches again.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if !self.ledger.initialized {
      return Err(AllocError::Uninitialized);
    }

    let oom = AllocError::OutOfMemory { requested: size };
    let fitted = Block::fitted_size(size).ok_or(oom)?;
    let need = fitted.checked_add(HEADER_SIZE).ok_or(oom)?;

    let fit = match unsafe { self.free_list.find(fitted) } {
      Some(fit) => fit,
      None => {
        let request = self
          .config
          .growth_request(need, self.grower.granularity())
          .inspect_err(|_| warn!("allocate({size}): request exceeds the largest region"))?;
        self.grow(request)?;
        unsafe { self.free_list.find(fitted) }.ok_or(oom)?
      }
    };

    let block = unsafe { self.free_list.split(fit, fitted) };
    let usable = unsafe { Block::payload_size(block) };
    self.ledger.allocated_blocks += 1;
    self.ledger.allocated_bytes += usable;

    let payload = Block::payload_address_of(block);
    trace!("allocate({size}) -> {:p} ({usable} usable)", payload);
    NonNull::new(payload).ok_or(oom)
  }

  /// Like [`allocate`](Self::allocate), with the payload zero-filled.
  pub fn allocate_zeroed(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let payload = self.allocate(size)?;
    unsafe {
      let usable = Block::payload_size(Block::header_of(payload.as_ptr()));
      payload.as_ptr().write_bytes(0, usable);
    }
    Ok(payload)
  }

  /// Frees a block previously returned by [`allocate`](Self::allocate).
  ///
  /// # Panics
  ///
  /// Panics on any [`UsageError`]: null, foreign or misaligned pointers and
  /// double frees.
  ///
  /// # Safety
  ///
  /// `ptr` must not be used after this call, and no write may have run past
  /// the end of a payload: pointers are validated against the block headers,
  /// so a clobbered header defeats the check.
  pub unsafe fn deallocate(
    &mut self,
    ptr: *mut u8,
  ) {
    if let Err(err) = unsafe { self.try_deallocate(ptr) } {
      panic!("invalid deallocation: {err}");
    }
  }

  /// Frees a block, reporting misuse instead of aborting. On error the heap
  /// is left exactly as it was.
  ///
  /// # Safety
  ///
  /// See [`deallocate`](Self::deallocate).
  pub unsafe fn try_deallocate(
    &mut self,
    ptr: *mut u8,
  ) -> Result<(), UsageError> {
    let block = unsafe { self.validate(ptr) }.inspect_err(|err| warn!("{err}"))?;

    unsafe {
      let usable = Block::payload_size(block);
      Block::mark_free(block);

      if let Err(err) = self.free_list.add_to_heap(block) {
        Block::mark_allocated(block);
        warn!("{err}");
        return Err(err);
      }

      self.ledger.allocated_blocks -= 1;
      self.ledger.allocated_bytes -= usable;
    }

    trace!("deallocate({:p})", ptr);
    Ok(())
  }

  /// Payload capacity of a live allocation, which may exceed what was asked
  /// for.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live pointer returned by this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> Result<usize, UsageError> {
    unsafe {
      let block = self.validate(ptr.as_ptr())?;
      Ok(Block::payload_size(block))
    }
  }

  /// Recovers the header behind `ptr`, which must be the payload address of
  /// a block that is currently allocated.
  ///
  /// The block is located by walking its span from the start, so a pointer
  /// into the middle of a payload is rejected whatever the payload holds, and
  /// memory outside the heap's regions is never read.
  unsafe fn validate(
    &self,
    ptr: *mut u8,
  ) -> Result<*mut Block, UsageError> {
    if ptr.is_null() {
      return Err(UsageError::NullPointer);
    }

    let addr = ptr.addr();
    if !addr.is_multiple_of(ALIGNMENT) {
      return Err(UsageError::Misaligned { addr });
    }

    let target = Block::header_of(ptr).addr();
    let foreign = UsageError::ForeignPointer { addr };
    let span = self.ledger.span_of(target).ok_or(foreign)?;

    let mut block = span.start.as_ptr().cast::<Block>();
    // Every header visited lies below `target`, hence inside the span.
    while block.addr() < target {
      block = unsafe { Block::end(block) }.cast::<Block>();
    }
    if block.addr() != target {
      return Err(foreign);
    }

    if !unsafe { Block::is_allocated(block) } {
      return Err(UsageError::DoubleFree { addr });
    }
    Ok(block)
  }

  /// Grows the heap by `request` bytes and links the new region in as one
  /// free block. A contiguous grower makes this an append that merges with
  /// a free tail.
  fn grow(
    &mut self,
    request: usize,
  ) -> Result<(), AllocError> {
    let (block, region) = grow::extend(&mut self.grower, request)?;

    if let Err(err) = unsafe { self.free_list.add_to_heap(block) } {
      panic!("heap grower handed out memory the heap already owns: {err}");
    }
    self.ledger.record(&region);
    Ok(())
  }

  /// Verifies every heap invariant, reporting all violations found.
  pub fn check_consistency(&self) -> Result<(), Vec<InvariantViolation>> {
    self.check_consistency_with(CheckMode::ReportAll)
  }

  pub fn check_consistency_with(
    &self,
    mode: CheckMode,
  ) -> Result<(), Vec<InvariantViolation>> {
    unsafe { check::check(&self.free_list, &self.ledger, mode) }
  }

  /// Address and payload size of every free block, in list order.
  pub fn free_blocks(&self) -> Vec<(usize, usize)> {
    unsafe {
      self
        .free_list
        .iter()
        .map(|block| (block.addr(), Block::payload_size(block)))
        .collect()
    }
  }

  pub fn stats(&self) -> HeapStats {
    let free = self.free_blocks();
    HeapStats {
      regions: self.ledger.regions,
      obtained_bytes: self.ledger.obtained,
      free_blocks: free.len(),
      free_bytes: free.iter().map(|&(_, size)| size).sum(),
      allocated_blocks: self.ledger.allocated_blocks,
      allocated_bytes: self.ledger.allocated_bytes,
    }
  }

  /// Logs the free list at debug level.
  pub fn print_heap(&self) {
    debug!(
      "heap: {} regions, {} bytes",
      self.ledger.regions, self.ledger.obtained
    );
    for span in &self.ledger.spans {
      debug!("  span [{:#x}, {:#x})", span.start.addr().get(), span.end());
    }
    for (addr, size) in self.free_blocks() {
      debug!("  free at {addr:#x}, {size} bytes");
    }
  }
}
