//! # firstfit - A First-Fit Free-List Allocator
//!
//! This crate provides a user-space **first-fit allocator** with an
//! address-ordered, coalescing free list, built on top of a raw heap-growth
//! primitive (`mmap` or `sbrk`).
//!
//! ## Overview
//!
//! Every region of heap memory is a sequence of blocks. Each block starts
//! with a 16-byte header; free blocks are additionally threaded onto a
//! singly linked list in ascending address order:
//!
//! ```text
//!   Heap Region:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ ┌────┬──────┐┌────┬────────────┐┌────┬────┐┌────┬──────────────────┐ │
//!   │ │hdr │ used ││hdr │    free    ││hdr │used││hdr │       free       │ │
//!   │ └────┴──────┘└────┴────────────┘└────┴────┘└────┴──────────────────┘ │
//!   │                ▲        │                    ▲                       │
//!   └────────────────┼────────┼────────────────────┼───────────────────────┘
//!                    │        └────────────────────┘
//!                free head           next free
//! ```
//!
//! - **Allocation** walks the free list from the lowest address and takes
//!   the first block that fits, splitting off the unused tail as a new free
//!   block when it is large enough to be useful.
//! - **Deallocation** links the block back in at its address-ordered
//!   position and merges it with free neighbours that touch it, so no two
//!   free blocks are ever adjacent.
//! - **Growth** happens only when nothing fits: the heap asks its
//!   [`HeapGrower`] for a new region and links it in as one free block.
//!
//! ## Crate Structure
//!
//! ```text
//!   firstfit
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block header codec (internal)
//!   ├── free_list  - Free list, first-fit search and splitting (internal)
//!   ├── coalesce   - Re-insertion and coalescing (internal)
//!   ├── grow       - HeapGrower trait, mmap/sbrk/arena growers
//!   ├── check      - Heap consistency checker
//!   ├── config     - HeapConfig and growth policy
//!   ├── error      - Error types
//!   └── heap       - Heap, the allocator itself
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use firstfit::Heap;
//!
//! let mut heap = Heap::new();
//! heap.initialize().unwrap();
//!
//! let ptr = heap.allocate(100).unwrap();
//! assert_eq!(ptr.as_ptr() as usize % 16, 0);
//!
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 100);
//!     heap.deallocate(ptr.as_ptr());
//! }
//!
//! assert!(heap.check_consistency().is_ok());
//! ```
//!
//! A bounded heap for tests or embedding:
//!
//! ```rust
//! use firstfit::{AllocError, ArenaGrower, Heap, HeapConfig};
//!
//! let config = HeapConfig::default().with_initial_region(4096);
//! let mut heap = Heap::with_config(ArenaGrower::new(8192), config);
//! heap.initialize().unwrap();
//!
//! assert!(matches!(
//!     heap.allocate(64 * 1024),
//!     Err(AllocError::OutOfMemory { .. })
//! ));
//! ```
//!
//! ## Block Layout
//!
//! ```text
//!   Single Block:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         Payload                │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size | alloc    │  │  ┌──────────────────────────┐  │
//!   │  │ next free       │  │  │  size bytes, multiple    │  │
//!   │  └─────────────────┘  │  │  of 16                   │  │
//!   │      16 bytes         │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Memory is never returned** to the operating system
//! - **Linear time**: Allocation and deallocation walk the free list
//! - **Unix-only**: Requires `libc` for `mmap`/`sbrk`
//!
//! ## Safety
//!
//! Freeing and inspecting allocations take raw pointers and are `unsafe`.
//! A pointer is accepted only if a block header sits right before it in the
//! region it points into, so null, misaligned, interior, foreign and
//! double-freed pointers are all rejected. Writes past the end of a payload
//! overwrite the next header and void that guarantee.

pub mod align;
mod block;
mod check;
mod coalesce;
mod config;
mod error;
mod free_list;
mod grow;
mod heap;

pub use block::HEADER_SIZE;
pub use check::{CheckMode, InvariantViolation};
pub use config::{HeapConfig, OversizePolicy};
pub use error::{AllocError, UsageError};
pub use grow::{ArenaGrower, HeapGrower, MmapGrower, Region, SbrkGrower};
pub use heap::{Heap, HeapStats};
