//! Benchmarks for Sleuth search performance
//!
//! Run: cargo bench
//! Run specific: cargo bench -- find_columns

use std::fs;
use std::path::Path;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;

use sleuth::search::LineMatcher;
use sleuth::{EventBus, Needle, SearchCoordinator, SearchOptions};

// ============================================================================
// Line Matching
// ============================================================================

fn benchmark_find_columns(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_columns");
    let line = b"    result = compute(value, other_value) + compute(value, 1) # compute again";

    let literal = LineMatcher::new(&[Needle::new("compute", "utf-8")], false).unwrap();
    let regex = LineMatcher::new(&[Needle::new(r"comp\w+\(", "utf-8")], true).unwrap();

    group.throughput(Throughput::Bytes(line.len() as u64));
    group.bench_function("literal", |b| {
        b.iter(|| black_box(literal.find_columns(black_box(line))))
    });
    group.bench_function("regex", |b| {
        b.iter(|| black_box(regex.find_columns(black_box(line))))
    });
    group.finish();
}

// ============================================================================
// Whole Tree Search (I/O bound)
// ============================================================================

fn create_bench_tree(root: &Path, file_count: usize) {
    for i in 0..file_count {
        let dir = root.join(format!("pkg{}", i % 10));
        fs::create_dir_all(&dir).unwrap();
        let body = format!(
            "import os\n\ndef handler_{i}(value):\n    return value * {i}\n\n# end of module {i}\n"
        );
        fs::write(dir.join(format!("mod_{}.py", i)), body).unwrap();
    }
}

fn benchmark_tree_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_search");
    group.sample_size(10); // Fewer samples for I/O-bound benchmarks

    for &file_count in &[100, 500, 1000] {
        let dir = tempdir().unwrap();
        create_bench_tree(dir.path(), file_count);

        group.throughput(Throughput::Elements(file_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            &file_count,
            |b, _| {
                let mut coordinator = SearchCoordinator::new("bench", EventBus::new());
                b.iter(|| {
                    let options = SearchOptions::new(dir.path()).with_text("return").include("*.py");
                    let outcome = coordinator
                        .run_to_completion(options, Duration::from_secs(60))
                        .unwrap();
                    black_box(outcome.total_match_count)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_find_columns, benchmark_tree_search);
criterion_main!(benches);
