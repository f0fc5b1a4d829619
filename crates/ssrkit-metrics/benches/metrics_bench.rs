// Criterion benchmarks for ssrkit-metrics
//
// Run benchmarks with:
//   cargo bench -p ssrkit-metrics

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ssrkit_metrics::{MetricsCollector, RenderMetricsCollector};
use std::time::Instant;

fn bench_record_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_render");
    let collector = RenderMetricsCollector::new(false);

    group.bench_function("single_fragment", |b| {
        b.iter(|| {
            collector.record_render(black_box("Home.js"), black_box(Instant::now()), black_box(true));
        });
    });

    let fragments = ["Home.js", "About.js", "Cart.js", "Product.js", "Search.js"];
    group.bench_function("five_fragments", |b| {
        b.iter(|| {
            for fragment in &fragments {
                collector.record_render(black_box(fragment), black_box(Instant::now()), true);
            }
        });
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let collector = RenderMetricsCollector::new(false);
    for i in 0..100 {
        collector.record_render(&format!("Page{}.js", i % 10), Instant::now(), i % 3 != 0);
        collector.record_cache_hit();
    }

    c.bench_function("snapshot_10_fragments", |b| b.iter(|| collector.snapshot()));
}

criterion_group!(benches, bench_record_render, bench_snapshot);
criterion_main!(benches);
