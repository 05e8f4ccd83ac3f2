//! ## R-tree implementation
//!
//! A dynamic, in-memory R-tree (Guttman, 1984) over `N`-dimensional
//! axis-aligned rectangles. The tree stores opaque payload handles at
//! its leaves and maintains height-balance and covering-rectangle
//! invariants across insert, delete, and in-place update.
//!
//! # Examples
//!
//! ```
//! use rtree_index::geometry::Rect;
//! use rtree_index::rtree::RTree;
//!
//! let mut tree: RTree<2, i32> = RTree::new(4);
//! tree.insert(Rect::new([0, 0], [10, 10]), 1);
//! tree.insert(Rect::new([5, 5], [15, 15]), 2);
//! let hits = tree.overlapping(&Rect::new([0, 0], [6, 6]));
//! assert_eq!(hits.len(), 2);
//! ```

use crate::exceptions::RTreeError;
use crate::geometry::Rect;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Minimum number of children a non-root node may hold.
pub const MIN_FANOUT: usize = 2;

/// A notional page size used to derive a default maximum fanout when the
/// caller doesn't have a specific tuning value in mind.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// Picks a maximum fanout the way the source library derives `M` from a
/// 4 KiB notional page: `floor(page_size / sizeof(entry))`, floored at
/// one more than [`MIN_FANOUT`] so a tree is always constructible.
pub fn default_max_fanout<const N: usize, P>() -> usize {
    let entry_size = std::mem::size_of::<Entry<N, P>>().max(1);
    (DEFAULT_PAGE_SIZE / entry_size).max(MIN_FANOUT + 1)
}

/// An entry stored in a [`Node`]: a leaf holds a payload, a branch holds
/// a child subtree. Both carry their own covering rectangle.
#[derive(Debug, Clone)]
pub enum Entry<const N: usize, P> {
    Leaf { rect: Rect<N>, payload: P },
    Child { rect: Rect<N>, node: Box<Node<N, P>> },
}

impl<const N: usize, P> Entry<N, P> {
    pub fn rect(&self) -> &Rect<N> {
        match self {
            Entry::Leaf { rect, .. } => rect,
            Entry::Child { rect, .. } => rect,
        }
    }
}

/// The level at which `entry` must be attached to preserve height-balance:
/// a leaf entry belongs at level `0`; a child entry wrapping a subtree of
/// level `L` belongs one level up, at `L + 1`.
fn insert_target_level<const N: usize, P>(entry: &Entry<N, P>) -> usize {
    match entry {
        Entry::Leaf { .. } => 0,
        Entry::Child { node, .. } => node.level + 1,
    }
}

/// A tree node. `level == 0` means this is a leaf (its entries are
/// `Entry::Leaf`); `level > 0` means its entries are `Entry::Child`
/// wrapping subtrees of `level - 1`.
#[derive(Debug, Clone)]
pub struct Node<const N: usize, P> {
    pub entries: Vec<Entry<N, P>>,
    pub level: usize,
}

impl<const N: usize, P> Node<N, P> {
    fn is_leaf(&self) -> bool {
        self.level == 0
    }

    /// The minimum bounding rectangle of this node's occupied children,
    /// or `None` for an empty node (the empty-root case).
    fn covering_rect(&self) -> Option<Rect<N>> {
        if self.entries.is_empty() {
            return None;
        }
        let rects: Vec<Rect<N>> = self.entries.iter().map(|e| *e.rect()).collect();
        Some(Rect::mbr(&rects))
    }
}

/// A dynamic R-tree over `N`-dimensional rectangles, keyed on an opaque
/// payload type `P`.
#[derive(Debug)]
pub struct RTree<const N: usize, P> {
    root: Box<Node<N, P>>,
    max_fanout: usize,
    min_fanout: usize,
}

impl<const N: usize, P> RTree<N, P> {
    /// Creates an empty tree with the given maximum fanout.
    ///
    /// # Panics
    ///
    /// Panics with [`RTreeError::InvalidCapacity`] if `max_fanout` is zero.
    pub fn new(max_fanout: usize) -> Self {
        if max_fanout == 0 {
            panic!("{}", RTreeError::InvalidCapacity { capacity: 0 });
        }
        info!("Creating new RTree with max_fanout: {}", max_fanout);
        RTree {
            root: Box::new(Node { entries: Vec::new(), level: 0 }),
            max_fanout,
            min_fanout: MIN_FANOUT,
        }
    }

    /// Creates an empty tree using [`default_max_fanout`] as the maximum
    /// fanout, for callers with no specific tuning value in mind.
    pub fn with_default_fanout() -> Self {
        Self::new(default_max_fanout::<N, P>())
    }

    /// The root's covering rectangle, or `None` if the tree is empty.
    pub fn bounds(&self) -> Option<Rect<N>> {
        self.root.covering_rect()
    }

    /// Inserts a `(rectangle, payload)` pair.
    pub fn insert(&mut self, rect: Rect<N>, payload: P) {
        info!("Inserting entry into RTree");
        let entry = Entry::Leaf { rect, payload };
        let split = insert_into(&mut self.root, 0, entry, self.max_fanout, self.min_fanout);
        if let Some(sibling) = split {
            self.grow_root(sibling);
        }
    }

    /// Grows the tree by one level: the current root and `sibling`
    /// become the two children of a freshly allocated root.
    fn grow_root(&mut self, sibling: Node<N, P>) {
        info!("Root split propagated to the top; growing a new root");
        let new_level = sibling.level + 1;
        let old_root =
            std::mem::replace(&mut self.root, Box::new(Node { entries: Vec::new(), level: new_level }));
        let old_rect = old_root.covering_rect().expect("old root is non-empty when it splits");
        let sibling_rect = sibling.covering_rect().expect("split sibling is non-empty");
        self.root.entries.push(Entry::Child { rect: old_rect, node: old_root });
        self.root.entries.push(Entry::Child { rect: sibling_rect, node: Box::new(sibling) });
    }

    /// Runs a query, optionally collecting a hit list and/or a count.
    ///
    /// Returns [`RTreeError::EmptySelection`] if neither is requested.
    pub fn select(
        &self,
        query: &Rect<N>,
        want_list: bool,
        want_count: bool,
    ) -> Result<(Option<Vec<(Rect<N>, &P)>>, Option<usize>), RTreeError> {
        if !want_list && !want_count {
            return Err(RTreeError::EmptySelection);
        }
        let mut list = if want_list { Some(Vec::new()) } else { None };
        let mut count = 0usize;
        select_node(&self.root, query, &mut list, &mut count);
        Ok((list, if want_count { Some(count) } else { None }))
    }

    /// All `(rectangle, payload)` pairs whose rectangle overlaps `query`.
    pub fn overlapping(&self, query: &Rect<N>) -> Vec<(Rect<N>, &P)> {
        self.select(query, true, false)
            .expect("list was requested")
            .0
            .expect("list was requested")
    }

    /// The number of entries whose rectangle overlaps `query`.
    pub fn count_overlapping(&self, query: &Rect<N>) -> usize {
        self.select(query, false, true)
            .expect("count was requested")
            .1
            .expect("count was requested")
    }

    /// Packs a flat list of entries into a balanced tree by repeated
    /// grouping, rather than one-at-a-time insertion.
    pub fn bulk_load(entries: Vec<(Rect<N>, P)>, max_fanout: usize) -> Self {
        if max_fanout == 0 {
            panic!("{}", RTreeError::InvalidCapacity { capacity: 0 });
        }
        if entries.is_empty() {
            return Self::new(max_fanout);
        }

        let leaf_entries: Vec<Entry<N, P>> = entries
            .into_iter()
            .map(|(rect, payload)| Entry::Leaf { rect, payload })
            .collect();

        let mut level = 0usize;
        let mut level_nodes: Vec<Node<N, P>> = batch_owned(leaf_entries, max_fanout, MIN_FANOUT)
            .into_iter()
            .map(|batch| Node { entries: batch, level })
            .collect();
        debug!("Bulk load: {} leaves at level 0", level_nodes.len());

        while level_nodes.len() > 1 {
            level += 1;
            level_nodes = batch_owned(level_nodes, max_fanout, MIN_FANOUT)
                .into_iter()
                .map(|batch| {
                    let entries: Vec<Entry<N, P>> = batch
                        .into_iter()
                        .map(|child| {
                            let rect = child.covering_rect().expect("batch is non-empty");
                            Entry::Child { rect, node: Box::new(child) }
                        })
                        .collect();
                    Node { entries, level }
                })
                .collect();
            debug!("Bulk load: {} nodes at level {}", level_nodes.len(), level);
        }

        let root = level_nodes.pop().expect("grouping converges to exactly one root");
        info!("Bulk-loaded RTree with root at level {}", root.level);
        RTree { root: Box::new(root), max_fanout, min_fanout: MIN_FANOUT }
    }
}

impl<const N: usize, P: PartialEq> RTree<N, P> {
    /// Removes the entry matching both `rect` and `payload` exactly.
    /// Returns `false` (tree unchanged) if no such entry exists.
    pub fn delete(&mut self, rect: &Rect<N>, payload: &P) -> bool {
        info!("Attempting to delete entry from RTree");
        let mut orphans: Vec<Entry<N, P>> = Vec::new();
        let found = delete_from(&mut self.root, rect, payload, self.min_fanout, &mut orphans);

        if found {
            while let Some(orphan) = orphans.pop() {
                let target_level = insert_target_level(&orphan);
                if let Some(sibling) =
                    insert_into(&mut self.root, target_level, orphan, self.max_fanout, self.min_fanout)
                {
                    self.grow_root(sibling);
                }
            }

            if !self.root.is_leaf() && self.root.entries.len() == 1 {
                debug!("Collapsing single-child root");
                if let Entry::Child { node, .. } = self.root.entries.pop().expect("exactly one entry") {
                    self.root = node;
                }
            }
        }
        found
    }

    /// Overwrites the payload of the entry matching `rect`/`payload` with
    /// `new_payload`, leaving the rectangle and tree shape untouched.
    /// Returns `false` if no such entry exists.
    pub fn update_payload(&mut self, rect: &Rect<N>, payload: P, new_payload: P) -> bool {
        match find_leaf_entry_mut(&mut self.root, rect, &payload) {
            Some(Entry::Leaf { payload: p, .. }) => {
                *p = new_payload;
                true
            }
            _ => false,
        }
    }

    /// Changes the rectangle of the entry matching `rect`/`payload` to
    /// `new_rect`. If `new_rect` still fits within its leaf node's
    /// covering rectangle, it is rewritten in place; otherwise the entry
    /// is deleted and reinserted. Returns `false` if no such entry exists.
    pub fn update_rectangle(&mut self, rect: &Rect<N>, payload: P, new_rect: Rect<N>) -> bool {
        let rewritten_in_place = match find_leaf_with_node_mut(&mut self.root, rect, &payload) {
            Some((leaf, idx)) => {
                let leaf_covering = leaf.covering_rect().expect("leaf holding a match is non-empty");
                if new_rect.within(&leaf_covering) {
                    if let Entry::Leaf { rect: r, .. } = &mut leaf.entries[idx] {
                        *r = new_rect;
                    }
                    true
                } else {
                    false
                }
            }
            None => return false,
        };

        if !rewritten_in_place {
            debug!("New rectangle escapes leaf MBR; deleting and reinserting");
            self.delete(rect, &payload);
            self.insert(new_rect, payload);
        }
        true
    }
}

/// Splits `items` into owned batches of at most `batch_size`, without
/// requiring `T: Clone`. If plain chunking would leave a trailing batch
/// under `min_fanout`, that batch is merged with its neighbour and the
/// combined entries are redistributed evenly across the two so both
/// meet `min_fanout` (standard bulk-load remainder balancing).
fn batch_owned<T>(items: Vec<T>, batch_size: usize, min_fanout: usize) -> Vec<Vec<T>> {
    let mut it = items.into_iter();
    let mut batches = Vec::new();
    loop {
        let batch: Vec<T> = (&mut it).take(batch_size).collect();
        if batch.is_empty() {
            break;
        }
        let is_last = batch.len() < batch_size;
        batches.push(batch);
        if is_last {
            break;
        }
    }

    if batches.len() >= 2 && batches.last().expect("checked len >= 2").len() < min_fanout {
        let last = batches.pop().expect("checked len >= 2");
        let mut second_last = batches.pop().expect("checked len >= 2");
        second_last.extend(last);
        let total = second_last.len();
        let mut combined = second_last.into_iter();
        let first_part: Vec<T> = (&mut combined).take(total - total / 2).collect();
        let second_part: Vec<T> = combined.collect();
        batches.push(first_part);
        batches.push(second_part);
    }

    batches
}

/// Descends to the node at `target_level`, inserts `entry`, and splits
/// any node that overflows on the way back up. Returns the split
/// sibling (same level as `node`) if `node` itself overflowed.
fn insert_into<const N: usize, P>(
    node: &mut Node<N, P>,
    target_level: usize,
    entry: Entry<N, P>,
    max_fanout: usize,
    min_fanout: usize,
) -> Option<Node<N, P>> {
    if node.level == target_level {
        node.entries.push(entry);
    } else {
        let idx = choose_subtree(&node.entries, entry.rect());
        if let Entry::Child { rect, node: child } = &mut node.entries[idx] {
            let split = insert_into(child, target_level, entry, max_fanout, min_fanout);
            *rect = child.covering_rect().expect("child received an entry");
            if let Some(sibling) = split {
                let sibling_rect = sibling.covering_rect().expect("split sibling is non-empty");
                node.entries.push(Entry::Child { rect: sibling_rect, node: Box::new(sibling) });
            }
        } else {
            unreachable!("choose_subtree only selects Entry::Child slots");
        }
    }

    if node.entries.len() > max_fanout {
        debug!("Node at level {} overflowed; splitting", node.level);
        let (group_a, group_b) = split_node(std::mem::take(&mut node.entries), min_fanout);
        node.entries = group_a;
        Some(Node { entries: group_b, level: node.level })
    } else {
        None
    }
}

/// Picks the child whose covering rectangle needs the least volume
/// enlargement to include `rect`, breaking ties by smaller current volume.
fn choose_subtree<const N: usize, P>(entries: &[Entry<N, P>], rect: &Rect<N>) -> usize {
    let mut best = 0;
    let mut best_enlargement = f64::INFINITY;
    let mut best_volume = f64::INFINITY;
    for (i, entry) in entries.iter().enumerate() {
        let candidate = entry.rect();
        let enlargement = candidate.enlargement(rect);
        let volume = candidate.volume();
        let better =
            enlargement < best_enlargement || (enlargement == best_enlargement && volume < best_volume);
        if better {
            best = i;
            best_enlargement = enlargement;
            best_volume = volume;
        }
    }
    best
}

/// Finds the seed pair for a linear split: the dimension with the
/// greatest normalised separation between its highest-low and
/// lowest-high entries contributes the two seeds.
fn linear_pick_seeds<const N: usize, P>(entries: &[Entry<N, P>]) -> (usize, usize) {
    assert!(entries.len() >= 2, "a split requires at least two entries");
    let rects: Vec<Rect<N>> = entries.iter().map(|e| *e.rect()).collect();
    let overall = Rect::mbr(&rects);

    let mut best_separation = f64::NEG_INFINITY;
    let mut best_pair = (0usize, 1usize);

    for d in 0..N {
        let mut idx_low = 0usize;
        for (i, r) in rects.iter().enumerate() {
            if r.lo[d] > rects[idx_low].lo[d] {
                idx_low = i;
            }
        }
        let mut idx_high = 0usize;
        for (i, r) in rects.iter().enumerate() {
            if r.hi[d] < rects[idx_high].hi[d] {
                idx_high = i;
            }
        }
        if idx_low == idx_high {
            let mut runner_up = None;
            for (i, r) in rects.iter().enumerate() {
                if i == idx_high {
                    continue;
                }
                if runner_up.map_or(true, |j: usize| r.hi[d] < rects[j].hi[d]) {
                    runner_up = Some(i);
                }
            }
            idx_high = runner_up.expect("at least two entries give a distinct runner-up");
        }

        let width = (overall.hi[d] - overall.lo[d]) as f64;
        let separation = if width > 0.0 {
            (rects[idx_low].lo[d] - rects[idx_high].hi[d]) as f64 / width
        } else {
            0.0
        };
        if separation > best_separation {
            best_separation = separation;
            best_pair = (idx_low, idx_high);
        }
    }

    best_pair
}

/// Splits an overflowing node's entries into two groups of at least
/// `min_fanout` each, minimising (approximately) the combined covering
/// volume. See [`linear_pick_seeds`] for seed selection.
fn split_node<const N: usize, P>(
    entries: Vec<Entry<N, P>>,
    min_fanout: usize,
) -> (Vec<Entry<N, P>>, Vec<Entry<N, P>>) {
    let (idx_a, idx_b) = linear_pick_seeds(&entries);

    let mut seed_a = None;
    let mut seed_b = None;
    let mut rest: VecDeque<Entry<N, P>> = VecDeque::new();
    for (i, entry) in entries.into_iter().enumerate() {
        if i == idx_a {
            seed_a = Some(entry);
        } else if i == idx_b {
            seed_b = Some(entry);
        } else {
            rest.push_back(entry);
        }
    }

    let mut group_a = vec![seed_a.expect("seed a present")];
    let mut group_b = vec![seed_b.expect("seed b present")];

    while let Some(entry) = rest.pop_front() {
        let remaining_including_this = rest.len() + 1;

        if min_fanout as i64 - group_a.len() as i64 == remaining_including_this as i64 {
            group_a.push(entry);
            while let Some(e) = rest.pop_front() {
                group_a.push(e);
            }
            break;
        }
        if min_fanout as i64 - group_b.len() as i64 == remaining_including_this as i64 {
            group_b.push(entry);
            while let Some(e) = rest.pop_front() {
                group_b.push(e);
            }
            break;
        }

        let rect_a = Rect::mbr(&group_a.iter().map(|e| *e.rect()).collect::<Vec<_>>());
        let rect_b = Rect::mbr(&group_b.iter().map(|e| *e.rect()).collect::<Vec<_>>());
        let enlargement_a = rect_a.enlargement(entry.rect());
        let enlargement_b = rect_b.enlargement(entry.rect());

        let assign_to_a = if enlargement_a != enlargement_b {
            enlargement_a < enlargement_b
        } else if rect_a.volume() != rect_b.volume() {
            rect_a.volume() < rect_b.volume()
        } else {
            group_a.len() <= group_b.len()
        };

        if assign_to_a {
            group_a.push(entry);
        } else {
            group_b.push(entry);
        }
    }

    (group_a, group_b)
}

fn select_node<'a, const N: usize, P>(
    node: &'a Node<N, P>,
    query: &Rect<N>,
    list: &mut Option<Vec<(Rect<N>, &'a P)>>,
    count: &mut usize,
) {
    for entry in &node.entries {
        match entry {
            Entry::Leaf { rect, payload } => {
                if rect.overlaps(query) {
                    *count += 1;
                    if let Some(l) = list {
                        l.push((*rect, payload));
                    }
                }
            }
            Entry::Child { rect, node: child } => {
                if rect.overlaps(query) {
                    select_node(child, query, list, count);
                }
            }
        }
    }
}

/// Removes the leaf entry matching `rect`/`payload`, condensing the tree
/// on the way back up: any node left with fewer than `min_fanout`
/// children is detached and its own entries are appended to `orphans`
/// for later reinsertion, in DFS-first-match order (`FindLeaf` stops at
/// the first match).
fn delete_from<const N: usize, P: PartialEq>(
    node: &mut Node<N, P>,
    rect: &Rect<N>,
    payload: &P,
    min_fanout: usize,
    orphans: &mut Vec<Entry<N, P>>,
) -> bool {
    if node.is_leaf() {
        let idx = node.entries.iter().position(|e| {
            matches!(e, Entry::Leaf { rect: r, payload: p } if r == rect && p == payload)
        });
        return match idx {
            Some(i) => {
                node.entries.remove(i);
                true
            }
            None => false,
        };
    }

    let mut found = false;
    let mut underfull_indices = Vec::new();
    for (i, entry) in node.entries.iter_mut().enumerate() {
        if let Entry::Child { rect: child_rect, node: child } = entry {
            if child_rect.overlaps(rect) && delete_from(child, rect, payload, min_fanout, orphans) {
                found = true;
                if child.entries.len() < min_fanout {
                    underfull_indices.push(i);
                } else {
                    *child_rect = child.covering_rect().expect("child still has entries");
                }
            }
        }
        if found {
            break;
        }
    }

    for &i in underfull_indices.iter().rev() {
        if let Entry::Child { node: child, .. } = node.entries.remove(i) {
            debug!("Condensing under-full node at level {}", child.level);
            orphans.extend(child.entries);
        }
    }

    found
}

fn find_leaf_entry_mut<'a, const N: usize, P: PartialEq>(
    node: &'a mut Node<N, P>,
    rect: &Rect<N>,
    payload: &P,
) -> Option<&'a mut Entry<N, P>> {
    if node.is_leaf() {
        return node
            .entries
            .iter_mut()
            .find(|e| matches!(e, Entry::Leaf { rect: r, payload: p } if r == rect && p == payload));
    }
    for entry in node.entries.iter_mut() {
        if let Entry::Child { rect: child_rect, node: child } = entry {
            if child_rect.overlaps(rect) {
                if let Some(found) = find_leaf_entry_mut(child, rect, payload) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn find_leaf_with_node_mut<'a, const N: usize, P: PartialEq>(
    node: &'a mut Node<N, P>,
    rect: &Rect<N>,
    payload: &P,
) -> Option<(&'a mut Node<N, P>, usize)> {
    if node.is_leaf() {
        let idx = node
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Leaf { rect: r, payload: p } if r == rect && p == payload));
        return idx.map(move |i| (node, i));
    }
    for entry in node.entries.iter_mut() {
        if let Entry::Child { rect: child_rect, node: child } = entry {
            if child_rect.overlaps(rect) {
                if let Some(found) = find_leaf_with_node_mut(child, rect, payload) {
                    return Some(found);
                }
            }
        }
    }
    None
}
