//! Multi-thread stress driver: worker threads hammer the shared heap with
//! randomized allocations, then free everything they own. The main thread
//! verifies the heap invariants and checks for leaks afterwards.

use std::process;
use std::thread;
use std::time::Instant;

use rand::Rng;

const NUM_THREADS: usize = 4;
const ITERATIONS_PER_THREAD: usize = 5000;
const MAX_ALLOC_SIZE: usize = 4096;

struct WorkerReport {
  thread_id: usize,
  alloc_count: usize,
  free_count: usize,
  total_requested: usize,
}

fn worker(thread_id: usize) -> WorkerReport {
  println!("[thread {thread_id}] starting...");

  let mut rng = rand::thread_rng();
  let mut addrs = Vec::with_capacity(ITERATIONS_PER_THREAD);
  let mut report = WorkerReport {
    thread_id,
    alloc_count: 0,
    free_count: 0,
    total_requested: 0,
  };

  for i in 0..ITERATIONS_PER_THREAD {
    let size = rng.gen_range(1..=MAX_ALLOC_SIZE);
    let addr = palloc::alloc(size);

    if addr.is_null() {
      eprintln!("[thread {thread_id}] allocation of {size} bytes failed");
    } else {
      addrs.push(addr as usize);
      report.alloc_count += 1;
      report.total_requested += size;
    }

    if (i + 1) % 500 == 0 {
      println!("[thread {thread_id}] {} allocations", i + 1);
    }
  }

  println!(
    "[thread {thread_id}] allocation phase complete: {} allocations",
    report.alloc_count
  );

  for addr in addrs {
    match palloc::free(addr as *mut u8) {
      Ok(()) => report.free_count += 1,
      Err(err) => eprintln!("[thread {thread_id}] free of {addr:#x} failed: {err}"),
    }
  }

  println!(
    "[thread {thread_id}] free phase complete: {} frees",
    report.free_count
  );

  report
}

fn main() {
  env_logger::init();

  println!("\n=== Concurrent Stress Test ===\n");
  println!("Threads: {NUM_THREADS}");
  println!("Iterations per thread: {ITERATIONS_PER_THREAD}");
  println!("Max allocation size: {MAX_ALLOC_SIZE} bytes\n");

  if let Err(err) = palloc::init(true) {
    eprintln!("failed to initialize allocator: {err}");
    process::exit(1);
  }
  println!("Allocator initialized with concurrency support\n");

  let start = Instant::now();

  println!("Spawning {NUM_THREADS} threads...\n");
  let workers: Vec<_> = (0..NUM_THREADS)
    .map(|thread_id| thread::spawn(move || worker(thread_id)))
    .collect();

  let mut failures = 0usize;
  for handle in workers {
    match handle.join() {
      Ok(report) => {
        println!(
          "[thread {}] summary: {} allocs / {} frees, {} bytes requested",
          report.thread_id, report.alloc_count, report.free_count, report.total_requested
        );
        failures += report.alloc_count - report.free_count;
      }
      Err(_) => {
        eprintln!("a worker thread panicked");
        failures += 1;
      }
    }
  }

  println!("\nAll threads joined in {:?}\n", start.elapsed());

  match palloc::verify() {
    Ok(()) => println!("Heap verify: OK"),
    Err(err) => {
      eprintln!("Heap verify FAILED: {err}");
      failures += 1;
    }
  }

  match palloc::stats() {
    Ok(stats) => {
      println!("Outstanding: {} bytes", stats.allocated);
      println!("Peak: {} bytes", stats.peak);
      if stats.allocated != 0 {
        failures += 1;
      }
    }
    Err(err) => eprintln!("stats unavailable: {err}"),
  }

  if let Err(err) = palloc::cleanup() {
    eprintln!("cleanup failed: {err}");
  }

  if failures > 0 {
    eprintln!("\nStress test finished with {failures} failures");
    process::exit(1);
  }

  println!("\nStress test passed");
}
