use rtree_index::geometry::Rect;
use rtree_index::rtree::RTree;

fn main() {
    println!("--- 2D RTree Example ---");
    let mut tree2d: RTree<2, &str> = RTree::new(4);

    tree2d.insert(Rect::new([0, 0], [10, 20]), "warehouse");
    tree2d.insert(Rect::new([80, 30], [90, 40]), "depot");
    tree2d.insert(Rect::new([45, 70], [55, 80]), "yard");

    let query = Rect::new([0, 0], [50, 50]);
    let hits = tree2d.overlapping(&query);
    println!("Sites overlapping {query:?}: {hits:?}");

    println!(
        "Total sites in the tree: {}",
        tree2d.count_overlapping(&Rect::new([i32::MIN + 1, i32::MIN + 1], [i32::MAX - 1, i32::MAX - 1]))
    );

    println!("\n--- 3D RTree Example ---");
    let mut tree3d: RTree<3, &str> = RTree::new(4);

    tree3d.insert(Rect::new([10, 20, 0], [15, 25, 5]), "sensor-a");
    tree3d.insert(Rect::new([80, 30, 10], [85, 35, 15]), "sensor-b");
    tree3d.insert(Rect::new([45, 70, 20], [50, 75, 25]), "sensor-c");

    let query_volume = Rect::new([0, 0, 0], [20, 30, 10]);
    let hits_3d = tree3d.overlapping(&query_volume);
    println!("Sensors within {query_volume:?}: {hits_3d:?}");

    println!("\n--- Bulk load Example ---");
    let grid: Vec<(Rect<2>, i32)> =
        (0..17).map(|i| (Rect::point([i * 10, i * 10]), i)).collect();
    let bulk_tree = RTree::bulk_load(grid, 4);
    println!(
        "Bulk-loaded {} entries",
        bulk_tree.count_overlapping(&Rect::new([0, 0], [1000, 1000]))
    );
}
