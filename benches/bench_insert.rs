use shared::*;

use criterion::{criterion_group, Criterion};
use rtree_index::geometry::Rect;
use rtree_index::rtree::RTree;
use std::hint::black_box;

fn bench_insert_rtree_2d(_c: &mut Criterion) {
    let rects = generate_rects();
    let (to_insert_rect, to_insert_payload) = rects[rects.len() - 1];
    let mut base_rects = rects.clone();
    base_rects.pop();
    let mut cc = configure_criterion();
    cc.bench_function("insert_2d_rtree", |b| {
        b.iter_with_setup(
            || {
                let mut tree: RTree<2, i32> = RTree::new(BENCH_NODE_CAPACITY);
                for (rect, payload) in base_rects.clone() {
                    tree.insert(rect, payload);
                }
                tree
            },
            |mut tree| {
                black_box(tree.insert(to_insert_rect, to_insert_payload));
            },
        )
    });
}

fn bench_insert_rtree_into_empty_2d(_c: &mut Criterion) {
    let rect = Rect::new([0, 0], [3, 3]);
    let mut cc = configure_criterion();
    cc.bench_function("insert_2d_rtree_empty", |b| {
        b.iter_with_setup(
            || RTree::<2, i32>::new(BENCH_NODE_CAPACITY),
            |mut tree| {
                black_box(tree.insert(rect, 0));
            },
        )
    });
}

criterion_group!(benches, bench_insert_rtree_2d, bench_insert_rtree_into_empty_2d);
