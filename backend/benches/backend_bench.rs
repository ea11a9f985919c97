use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use rkb::graph::AsmGraph;
use rkb::layout;
use rkb::linear::to_linear;
use rkb::listing::parse;
use rkb::maybe_store::remove_maybes;
use rkb::optimize::optimize;

// ── Listing generators ──────────────────────────────────────────────────

/// A chain of `n` blocks where every third block branches back and every
/// block touches memory, ending in a shared return path.
fn generate_chain(n: usize) -> String {
    let mut src = String::new();
    src.push_str(".gmember acc group=state\n");
    src.push_str(".fn main writes=acc\n");
    src.push_str(".entry main\n\nmain:\n");
    for i in 0..n {
        if i > 0 {
            src.push_str(&format!("b{i}:\n"));
        }
        src.push_str(&format!("    lda #{}\n", i % 256));
        src.push_str("    sta? acc\n");
        if i % 3 == 2 {
            src.push_str(&format!("    beq b{}\n", (i / 2).max(1)));
        }
    }
    src.push_str("    inc acc\n    rts\n");
    src
}

/// Many distinct return paths sharing a suffix, to stress return merging.
fn generate_returns(n: usize) -> String {
    let mut src = String::new();
    src.push_str(".gmember out group=state\n");
    src.push_str(".fn main writes=out\n");
    src.push_str(".entry main\n\nmain:\n");
    for i in 1..n {
        src.push_str(&format!("    beq r{i}\n"));
    }
    src.push_str("    lda #0\n    sta out\n    rts\n");
    for i in 1..n {
        src.push_str(&format!("r{i}:\n    lda #{}\n    lda #0\n    sta out\n    rts\n", i % 256));
    }
    src
}

// ── Benchmarks ──────────────────────────────────────────────────────────

fn bench_build_and_optimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_optimize");
    for size in [8usize, 32, 128] {
        let source = generate_chain(size);
        let listing = parse(&source).listing.expect("generator emits valid listings");
        group.bench_with_input(BenchmarkId::from_parameter(size), &listing, |b, listing| {
            b.iter(|| {
                let mut graph = AsmGraph::new(listing.entry);
                graph.append_code(&listing.code, &listing.registry).unwrap();
                graph.finish_appending().unwrap();
                optimize(&mut graph);
                black_box(graph.node_count())
            });
        });
    }
    group.finish();
}

fn bench_return_merging(c: &mut Criterion) {
    let mut group = c.benchmark_group("return_merge");
    for size in [4usize, 16, 48] {
        let source = generate_returns(size);
        let listing = parse(&source).listing.expect("generator emits valid listings");
        group.bench_with_input(BenchmarkId::from_parameter(size), &listing, |b, listing| {
            b.iter(|| {
                let mut graph = AsmGraph::new(listing.entry);
                graph.append_code(&listing.code, &listing.registry).unwrap();
                graph.finish_appending().unwrap();
                optimize(&mut graph);
                black_box(graph.node_count())
            });
        });
    }
    group.finish();
}

fn bench_full_backend(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_backend");
    for size in [8usize, 32, 128] {
        let source = generate_chain(size);
        let listing = parse(&source).listing.expect("generator emits valid listings");
        let fun = listing.entry.fn_id().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &listing, |b, listing| {
            b.iter(|| {
                let mut graph = AsmGraph::new(listing.entry);
                graph.append_code(&listing.code, &listing.registry).unwrap();
                graph.finish_appending().unwrap();
                optimize(&mut graph);
                remove_maybes(&mut graph, fun, &listing.registry);
                let order = layout::order(&graph, &listing.registry);
                black_box(to_linear(&mut graph, &order).len())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_build_and_optimize,
    bench_return_merging,
    bench_full_backend
);
criterion_main!(benches);
