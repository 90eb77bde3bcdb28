//! Drives a `Tracker` from a small simulated heap whose call sites are tagged with file, line
//! and allocation API, then prints the allocations that were never freed.
//!
//! The simulated heap plays the role of a hook layer: it decodes the packed call-site tag,
//! assigns request IDs and forwards allocation and deallocation events to the tracker.
//!
//! Run with: `cargo run --example tagged_heap`
//! Set `RUST_LOG=alloc_sites=debug` to see the tracker's log output.

#![allow(
    missing_docs,
    reason = "No need for API documentation in example code"
)]

use std::sync::atomic::{self, AtomicU64};
use std::thread;

use alloc_sites::{FileId, FileRegistry, Kind, Line, PackedLine, RequestId, Tracker};
use tracing_subscriber::EnvFilter;

/// Header the simulated heap keeps with every block, like a debug heap would.
#[derive(Debug)]
struct Block {
    file: FileId,
    packed_line: u32,
    request_id: RequestId,
    data: Vec<u8>,
}

#[derive(Debug)]
struct TaggedHeap {
    files: FileRegistry,
    tracker: Tracker,
    next_request_id: AtomicU64,
}

impl TaggedHeap {
    fn new() -> Self {
        Self {
            files: FileRegistry::new(),
            tracker: Tracker::new(),
            next_request_id: AtomicU64::new(1),
        }
    }

    fn alloc(&self, size: usize, path: &str, packed_line: u32) -> Block {
        let request_id = self.next_request_id.fetch_add(1, atomic::Ordering::Relaxed);
        let file = self.files.intern(path);

        match PackedLine::unpack(packed_line) {
            Ok((line, kind)) => self.tracker.on_allocate(
                u64::try_from(size).expect("usize always fits into u64"),
                file,
                line,
                kind,
                request_id,
            ),
            Err(error) => eprintln!("untracked allocation: {error}"),
        }

        Block {
            file,
            packed_line,
            request_id,
            data: vec![0; size],
        }
    }

    fn free(&self, block: Block) {
        if let Ok((line, kind)) = PackedLine::unpack(block.packed_line) {
            self.tracker
                .on_deallocate(block.file, line, kind, block.request_id);
        }

        drop(block.data);
    }
}

/// Allocates from the heap with the current file and line as the call-site tag.
macro_rules! tagged_alloc {
    ($heap:expr, $kind:expr, $size:expr) => {
        $heap.alloc(
            $size,
            file!(),
            PackedLine::pack(
                Line::new(line!()).expect("source files have fewer than 2^24 lines"),
                $kind,
            ),
        )
    };
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let heap = TaggedHeap::new();
    heap.tracker.start();

    let array = tagged_alloc!(heap, Kind::PrimaryAllocator, 8);
    let first = tagged_alloc!(heap, Kind::PrimaryAllocator, 4);
    let second = tagged_alloc!(heap, Kind::PrimaryAllocator, 4);
    let third = tagged_alloc!(heap, Kind::PrimaryAllocator, 4);
    let untyped = tagged_alloc!(heap, Kind::SecondaryAllocator, 20);
    let raw = tagged_alloc!(heap, Kind::RawAllocator, 50);

    // Untagged allocations pass through the heap without being tracked.
    let scratch = heap.alloc(128, file!(), line!());

    let from_thread = thread::scope(|s| {
        s.spawn(|| tagged_alloc!(heap, Kind::PrimaryAllocator, 512))
            .join()
            .expect("allocating thread panicked")
    });

    heap.free(untyped);
    heap.free(raw);
    heap.free(from_thread);
    heap.free(scratch);

    println!("Outstanding allocations:");
    let report = heap.tracker.snapshot(true);
    print!("{}", report.with_file_names(&heap.files));
    println!(
        "{} blocks, {} bytes outstanding",
        report.total_count(),
        report.total_bytes()
    );

    // Leaked on purpose; they show up in the report above.
    drop((array, first, second, third));
}
