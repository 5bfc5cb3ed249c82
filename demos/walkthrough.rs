use std::io::Read;

use firstfit::{Heap, HeapConfig, SbrkGrower};
use log::{LevelFilter, Log, Metadata, Record};

/// Prints allocator log lines to stderr.
struct StderrLogger;

impl Log for StderrLogger {
  fn enabled(
    &self,
    _metadata: &Metadata,
  ) -> bool {
    true
  }

  fn log(
    &self,
    record: &Record,
  ) {
    eprintln!("  [{:<5}] {}", record.level(), record.args());
  }

  fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how the program break moves.
/// Set `WALKTHROUGH_NO_PAUSE` to run straight through.
fn block_until_enter_pressed() {
  if std::env::var_os("WALKTHROUGH_NO_PAUSE").is_some() {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break = {:?}",
    label,
    std::process::id(),
    SbrkGrower::program_break(),
  );
}

fn print_free_list(heap: &Heap<SbrkGrower>) {
  for (addr, size) in heap.free_blocks() {
    println!("      free block at {addr:#x}: {size} bytes");
  }
  let stats = heap.stats();
  println!(
    "      {} free / {} allocated blocks, {} bytes obtained",
    stats.free_blocks, stats.allocated_blocks, stats.obtained_bytes
  );
}

fn main() {
  log::set_logger(&LOGGER).expect("logger installed twice");
  log::set_max_level(LevelFilter::Debug);

  // A deliberately small first region so that step 6 has to grow the heap.
  let config = HeapConfig::default().with_initial_region(4096);
  let mut heap = Heap::with_config(SbrkGrower::new(), config);

  print_program_break("start");
  heap.initialize().expect("could not obtain the first region");
  print_program_break("after initialize");
  print_free_list(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 100 bytes twice. Each request is rounded to 112 bytes and
  //    carved off the front of the single free block.
  // --------------------------------------------------------------------
  let first = heap.allocate(100).expect("allocation failed");
  let second = heap.allocate(100).expect("allocation failed");
  println!("\n[1] first = {first:p}, second = {second:p}");
  print_free_list(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Free the first block. It is not adjacent to the free tail, so the
  //    free list now has two entries.
  // --------------------------------------------------------------------
  unsafe { heap.deallocate(first.as_ptr()) };
  println!("\n[2] Freed first");
  print_free_list(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Allocate 50 bytes. First-fit finds the freed block before the tail
  //    and reuses it.
  // --------------------------------------------------------------------
  let third = heap.allocate(50).expect("allocation failed");
  println!(
    "\n[3] third = {third:p}: {}",
    if third == first {
      "reused the freed block"
    } else {
      "allocated somewhere else"
    }
  );
  print_free_list(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Write a pattern into the new block and read it back.
  // --------------------------------------------------------------------
  unsafe {
    third.as_ptr().write_bytes(0xAB, 50);
    println!("\n[4] third[49] = {:#X}", third.as_ptr().add(49).read());
  }
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Free everything. The blocks coalesce back into one.
  // --------------------------------------------------------------------
  unsafe {
    heap.deallocate(third.as_ptr());
    heap.deallocate(second.as_ptr());
  }
  println!("\n[5] Freed second and third");
  print_free_list(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Allocate 64 KiB to force growth. Unless something else moved the
  //    break in between, the new region starts where the last one ended
  //    and merges with the free tail.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let big = heap.allocate(64 * 1024).expect("allocation failed");
  println!("\n[6] big = {big:p}");
  print_program_break("after large alloc");
  print_free_list(&heap);
  block_until_enter_pressed();

  unsafe { heap.deallocate(big.as_ptr()) };
  heap.print_heap();

  match heap.check_consistency() {
    Ok(()) => println!("\n[7] Heap is consistent."),
    Err(violations) => {
      for violation in violations {
        println!("\n[7] {violation}");
      }
    }
  }

  println!("\n[8] End of example. Process will exit and the OS will reclaim all memory.");
}
