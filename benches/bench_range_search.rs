use shared::*;

use criterion::{criterion_group, Criterion};
use rtree_index::geometry::Rect;
use rtree_index::rtree::RTree;
use std::hint::black_box;
use tracing::info;

fn bench_range_search<'a, R>(
    name: &str,
    tree: &'a RTree<2, i32>,
    query: &Rect<2>,
    search_fn: impl Fn(&'a RTree<2, i32>, &Rect<2>) -> R,
    cc: &mut Criterion,
) where
    R: 'a,
{
    cc.bench_function(name, |b| {
        b.iter(|| {
            info!("Running range search benchmark: {}", name);
            let res = search_fn(tree, query);
            black_box(res)
        })
    });
}

fn benchmark_range_overlapping_rtree_2d(_c: &mut Criterion) {
    info!("Setting up benchmark_range_overlapping_rtree_2d");
    let rects = generate_rects();
    let mut tree: RTree<2, i32> = RTree::new(BENCH_NODE_CAPACITY);
    for (rect, payload) in rects {
        tree.insert(rect, payload);
    }
    let query = Rect::new(
        [500 - BENCH_RANGE_RADIUS, 500 - BENCH_RANGE_RADIUS],
        [500 + BENCH_RANGE_RADIUS, 500 + BENCH_RANGE_RADIUS],
    );
    let mut cc = configure_criterion();
    bench_range_search("range_overlapping_rtree_2d", &tree, &query, |t, q| t.overlapping(q), &mut cc);
}

fn benchmark_range_count_overlapping_rtree_2d(_c: &mut Criterion) {
    info!("Setting up benchmark_range_count_overlapping_rtree_2d");
    let rects = generate_rects();
    let mut tree: RTree<2, i32> = RTree::new(BENCH_NODE_CAPACITY);
    for (rect, payload) in rects {
        tree.insert(rect, payload);
    }
    let query = BENCH_BOUNDARY;
    let mut cc = configure_criterion();
    bench_range_search(
        "range_count_overlapping_rtree_2d",
        &tree,
        &query,
        |t, q| t.count_overlapping(q),
        &mut cc,
    );
}

criterion_group!(benches, benchmark_range_overlapping_rtree_2d, benchmark_range_count_overlapping_rtree_2d);
