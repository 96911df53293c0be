//! Basic walk-through of the allocator facade: init, a few allocations,
//! statistics, a state dump, teardown.
//!
//! Run with `RUST_LOG=debug cargo run --example simple_alloc` to watch the
//! allocator's internal logging.

use std::process;
use std::ptr;

fn main() {
  env_logger::init();

  println!("\n=== Simple Allocator Example ===\n");

  println!("1. Initializing allocator...");
  if let Err(err) = palloc::init(true) {
    eprintln!("failed to initialize allocator: {err}");
    process::exit(1);
  }
  println!("   allocator initialized with concurrency support\n");

  println!("2. Allocating memory...");
  let mut regions = Vec::new();
  for size in [1024usize, 2048, 512] {
    let addr = palloc::alloc(size);
    if addr.is_null() {
      eprintln!("failed to allocate {size} bytes");
      process::exit(1);
    }
    println!("   allocated {size} bytes at {addr:p}");
    regions.push((addr, size));
  }
  println!();

  println!("3. Using allocated memory...");
  for (i, &(addr, size)) in regions.iter().enumerate() {
    // SAFETY: each region stays ours until the free below.
    unsafe { ptr::write_bytes(addr, b'A' + i as u8, size) };
  }
  println!("   filled every region with data\n");

  println!("4. Statistics:");
  match palloc::stats() {
    Ok(stats) => {
      println!("   allocated: {} bytes", stats.allocated);
      println!("   free: {} bytes", stats.free);
      println!("   peak: {} bytes\n", stats.peak);
    }
    Err(err) => eprintln!("   stats unavailable: {err}\n"),
  }

  println!("5. Allocator state:");
  palloc::dump();
  println!();

  println!("6. Freeing memory...");
  for &(addr, size) in &regions {
    match palloc::free(addr) {
      Ok(()) => println!("   freed the {size}-byte region at {addr:p}"),
      Err(err) => eprintln!("   free of {addr:p} failed: {err}"),
    }
  }
  println!();

  println!("7. Final check...");
  match palloc::leak_check() {
    Ok(0) => println!("   no memory leaks, all regions returned\n"),
    Ok(bytes) => println!("   warning: {bytes} bytes still allocated\n"),
    Err(err) => eprintln!("   leak check failed: {err}\n"),
  }

  println!("8. Cleaning up...");
  match palloc::cleanup() {
    Ok(()) => println!("   allocator cleaned up\n"),
    Err(err) => eprintln!("   cleanup failed: {err}\n"),
  }
}
