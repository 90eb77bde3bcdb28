//! Benchmarks to measure the compute overhead of recording allocation events.
//!
//! Every event takes the tracker lock, so these numbers bound the cost added to each
//! allocation and deallocation of an instrumented program.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;

use alloc_sites::{FileId, Kind, Line, Tracker};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_sites_record");

    let file = FileId::from_raw(0);
    let line = Line::new(42).expect("42 is a valid line number");

    group.bench_function("ignored_event", |b| {
        let tracker = Tracker::builder().active(true).build();

        b.iter(|| {
            tracker.on_allocate(black_box(8), file, line, Kind::Ignored, black_box(1));
        });
    });

    group.bench_function("allocate_then_free", |b| {
        let tracker = Tracker::builder()
            .active(true)
            .request_capacity(1)
            .build();

        b.iter(|| {
            tracker.on_allocate(black_box(8), file, line, Kind::PrimaryAllocator, 1);
            tracker.on_deallocate(file, line, Kind::PrimaryAllocator, black_box(1));
        });
    });

    group.bench_function("allocate_then_free_with_1000_live", |b| {
        let tracker = Tracker::builder()
            .active(true)
            .request_capacity(1001)
            .build();

        for request_id in 0..1000 {
            tracker.on_allocate(
                8 * (request_id % 16 + 1),
                file,
                line,
                Kind::RawAllocator,
                request_id,
            );
        }

        b.iter(|| {
            tracker.on_allocate(black_box(24), file, line, Kind::PrimaryAllocator, 5000);
            tracker.on_deallocate(file, line, Kind::PrimaryAllocator, black_box(5000));
        });
    });

    group.bench_function("report_100_sites", |b| {
        let tracker = Tracker::builder().active(true).build();

        for request_id in 0..100 {
            let site_line = Line::new(u32::try_from(request_id).expect("fits in u32"))
                .expect("small line numbers are valid");
            tracker.on_allocate(16, file, site_line, Kind::PrimaryAllocator, request_id);
        }

        b.iter(|| black_box(tracker.snapshot(false)));
    });

    group.finish();
}
