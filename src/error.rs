use thiserror::Error;

/// Recoverable allocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  #[error("out of memory: could not obtain {requested} bytes from the heap grower")]
  OutOfMemory { requested: usize },
  #[error("heap is already initialized")]
  AlreadyInitialized,
  #[error("heap is not initialized")]
  Uninitialized,
}

/// Misuse of a payload pointer. Continuing past one of these would corrupt
/// the heap, so [`Heap::deallocate`](crate::Heap::deallocate) aborts on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
  #[error("attempted to free a null pointer")]
  NullPointer,
  #[error("pointer {addr:#x} is not aligned to a payload boundary")]
  Misaligned { addr: usize },
  #[error("pointer {addr:#x} was not handed out by this heap")]
  ForeignPointer { addr: usize },
  #[error("double free of pointer {addr:#x}")]
  DoubleFree { addr: usize },
  #[error("block at {addr:#x} overlaps a free block")]
  Overlap { addr: usize },
}
