#![no_std]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

mod bounds;
mod cursor;
mod dump;
mod node;
#[cfg(test)]
mod proptests;

pub use bounds::{clamp_down, Bounds, CellIter, PosIter};
pub use cursor::Window;

use alloc::vec::Vec;
use core::mem;

use hashbrown::HashMap;
use slab::Slab;

use crate::cursor::{Cursor, Mode};
use crate::node::{Entry, Node, Parent};

/// A value that can be stored in a [`LatticeTree`]
pub trait Volume<const N: usize> {
    /// Stable identifier, unique for this value's lifetime in the tree
    fn id(&self) -> u64;
    /// Current axis-aligned bounds
    fn bounds(&self) -> Bounds<N>;
}

/// An `N`-dimensional spatial index of axis-aligned volumes over a
/// power-of-two grid hierarchy
///
/// Each node owns a sparse map of buckets at one grid size, and a value is
/// referenced from every bucket its bounds touch. A bucket holding more than
/// `MAX_ENTRIES` values is replaced by a child node at half the grid, down to
/// `2^GRID_EXP_MIN`; the root sits at `2^GRID_EXP_MAX`. Queries walk only the
/// buckets overlapping the probe volume, so lookup cost tracks local density
/// rather than total population.
///
/// Values are owned by the tree, keyed by [`Volume::id`]; buckets hold ids,
/// never copies. The published [`bbox`](Self::bbox) only ever grows with
/// insertion and is best-effort after removal.
#[derive(Debug)]
pub struct LatticeTree<
    const N: usize,
    T,
    const MAX_ENTRIES: usize = 10,
    const GRID_EXP_MIN: u32 = 2,
    const GRID_EXP_MAX: u32 = 10,
> {
    /// Circumscribing volume of everything ever inserted; never shrinks
    bounds: Option<Bounds<N>>,
    values: HashMap<u64, T>,
    nodes: Slab<Node<N>>,
    root: usize,
    /// Nodes emptied mid-operation, reclaimed when the operation finishes
    garbage: Vec<usize>,
}

impl<const N: usize, T, const MAX_ENTRIES: usize, const GRID_EXP_MIN: u32, const GRID_EXP_MAX: u32>
    LatticeTree<N, T, MAX_ENTRIES, GRID_EXP_MIN, GRID_EXP_MAX>
where
    T: Volume<N>,
{
    /// Finest cell edge a split may produce
    const GRID_MIN: i64 = 1 << GRID_EXP_MIN;
    /// Cell edge of the root
    const GRID_MAX: i64 = 1 << GRID_EXP_MAX;

    /// Create an empty tree
    pub fn new() -> Self {
        let mut tree = Self {
            bounds: None,
            values: HashMap::new(),
            nodes: Slab::new(),
            root: 0,
            garbage: Vec::new(),
        };
        tree.root = tree.next_node(None, Self::GRID_MAX, &[]);
        tree
    }

    /// Insert `value`, indexing it under every cell its bounds touch
    ///
    /// Reinserting an id that is already stored overwrites the stored value;
    /// the caller must not have changed its bounds since the first insert
    /// (use [`relocate`](Self::relocate) for that).
    pub fn insert(&mut self, value: T) -> &mut Self {
        let id = value.id();
        let volume = value.bounds();
        self.values.insert(id, value);
        self.insert_over(&volume, id);
        self
    }

    /// Remove `value` from the tree. Removing an absent id is a no-op.
    pub fn remove(&mut self, value: &T) -> &mut Self {
        self.remove_over(&value.bounds(), value.id(), true);
        self
    }

    /// Re-index `value` after its bounds changed from `prev`
    ///
    /// Only the cells in the difference between the old and new bounds are
    /// re-indexed; cells covered by both keep their references. The stored
    /// copy is replaced in place so queries filter against the new bounds.
    /// A no-op when the id is not stored.
    pub fn relocate(&mut self, value: T, prev: Bounds<N>) -> &mut Self {
        let id = value.id();
        if !self.values.contains_key(&id) {
            return self;
        }
        let current = value.bounds();
        self.values.insert(id, value);
        for removed in prev.diff(&current) {
            self.remove_over(&removed, id, false);
        }
        for added in current.diff(&prev) {
            self.insert_over(&added, id);
        }
        self
    }

    /// Values whose bounds overlap `query`, each exactly once, in
    /// unspecified order
    pub fn window(&self, query: Bounds<N>) -> Window<'_, N, T> {
        Window::new(
            &self.nodes,
            &self.values,
            Cursor::new(Mode::Values, self.root, query),
        )
    }

    /// Values whose bounds cover the single point `pos`
    pub fn at(&self, pos: [i64; N]) -> Window<'_, N, T> {
        self.window(Bounds::unit(pos))
    }

    /// All stored values, in no particular order
    pub fn unordered(&self) -> impl Iterator<Item = &T> {
        self.values.values()
    }

    /// Borrow the stored value with the given id
    pub fn get(&self, id: u64) -> Option<&T> {
        self.values.get(&id)
    }

    /// Current circumscribing volume; the unit box at the origin while empty
    pub fn bbox(&self) -> Bounds<N> {
        self.bounds.unwrap_or(Bounds::UNIT)
    }

    /// Shape of the circumscribing volume
    pub fn shape(&self) -> [i64; N] {
        self.bbox().shape()
    }

    /// Number of distinct stored ids
    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop every value and node and install a fresh root at the maximum grid
    pub fn clear(&mut self) {
        self.bounds = None;
        self.values.clear();
        self.nodes.clear();
        self.garbage.clear();
        self.root = self.next_node(None, Self::GRID_MAX, &[]);
        #[cfg(feature = "tracing")]
        tracing::debug!("cleared tree");
    }

    /// Enlarge the tree bounds by `volume` and reference `id` from every
    /// bucket the volume touches, splitting buckets that overflow
    fn insert_over(&mut self, volume: &Bounds<N>, id: u64) {
        self.bounds = Some(match &self.bounds {
            Some(current) => current.union(volume),
            None => *volume,
        });
        let mut cursor = Cursor::new(Mode::Points, self.root, *volume);
        while let Some((node, pos)) = cursor.next_pair(&self.nodes) {
            self.insert_at(node, pos, id);
        }
    }

    /// Erase the reference to `id` from every bucket overlapping `volume`,
    /// contracting emptied branches, then reclaim orphaned nodes. Erases the
    /// stored value itself only when `remove_all` is set.
    fn remove_over(&mut self, volume: &Bounds<N>, id: u64, remove_all: bool) {
        if !self.values.contains_key(&id) {
            return;
        }
        let mut cursor = Cursor::new(Mode::Entries, self.root, *volume);
        while let Some((node, pos)) = cursor.next_pair(&self.nodes) {
            self.remove_ref(node, pos, id);
        }
        if remove_all {
            self.values.remove(&id);
        }
        for node in self.garbage.drain(..) {
            self.nodes.remove(node);
        }
    }

    fn insert_at(&mut self, node: usize, pos: [i64; N], id: u64) {
        match self.nodes[node]
            .buckets
            .entry(pos)
            .or_insert_with(|| Entry::List(Vec::new()))
        {
            Entry::List(list) => list.push(id),
            Entry::Child(_) => unreachable!("point traversal yielded a child bucket"),
        }
        self.balance_at(node, pos);
    }

    /// Erase one value reference; an emptied list takes its bucket with it
    fn remove_ref(&mut self, node: usize, pos: [i64; N], id: u64) {
        let Some(entry) = self.nodes[node].entry_mut(pos) else {
            return;
        };
        let Entry::List(list) = entry else {
            panic!("cannot remove a value from a child bucket");
        };
        list.retain(|&value| value != id);
        if list.is_empty() {
            self.remove_bucket(node, pos);
        }
    }

    /// Erase the bucket at `pos`, scheduling a child entry for reclamation,
    /// and propagate emptiness into the parent. The root is never erased.
    fn remove_bucket(&mut self, node: usize, pos: [i64; N]) {
        let key = clamp_down(pos, self.nodes[node].grid);
        if let Some(Entry::Child(child)) = self.nodes[node].buckets.remove(&key) {
            self.garbage.push(child);
        }
        if self.nodes[node].buckets.is_empty() {
            if let Some(parent) = self.nodes[node].parent {
                #[cfg(feature = "tracing")]
                tracing::trace!(node, parent = parent.node, "contracting empty node");
                self.remove_bucket(parent.node, parent.cell.min);
            }
        }
    }

    /// Allocate a node and seed its buckets from `seeds`, scoped to the
    /// parent cell when one is given, then balance the result
    fn next_node(&mut self, parent: Option<Parent<N>>, grid: i64, seeds: &[u64]) -> usize {
        let id = self.nodes.insert(Node::new(parent, grid));
        for &value_id in seeds {
            let value_bounds = self
                .values
                .get(&value_id)
                .expect("value missing from store")
                .bounds();
            let region = match &parent {
                Some(parent) => parent.cell.intersect(&value_bounds),
                None => Some(value_bounds),
            };
            let Some(region) = region else { continue };
            let node = &mut self.nodes[id];
            for cell in region.clamp(grid).cell_iter(grid) {
                if cell.overlaps(&value_bounds) {
                    let Entry::List(list) = node
                        .buckets
                        .entry(cell.min)
                        .or_insert_with(|| Entry::List(Vec::new()))
                    else {
                        unreachable!("fresh node holds only lists");
                    };
                    list.push(value_id);
                }
            }
        }
        self.balance(id);
        id
    }

    /// Apply the split policy to every bucket of `node`, cascading into
    /// children
    fn balance(&mut self, node: usize) {
        if self.nodes[node].grid <= Self::GRID_MIN {
            return;
        }
        let positions: Vec<[i64; N]> = self.nodes[node].buckets.keys().copied().collect();
        for pos in positions {
            self.balance_pos(node, pos);
        }
    }

    /// Apply the split policy to the single bucket at `pos`
    fn balance_at(&mut self, node: usize, pos: [i64; N]) {
        if self.nodes[node].grid <= Self::GRID_MIN {
            return;
        }
        self.balance_pos(node, pos);
    }

    fn balance_pos(&mut self, node: usize, pos: [i64; N]) {
        let grid = self.nodes[node].grid;
        match self.nodes[node].entry_mut(pos) {
            Some(Entry::List(list)) if list.len() > MAX_ENTRIES => {
                let seeds = mem::take(list);
                #[cfg(feature = "tracing")]
                tracing::trace!(node, grid, entries = seeds.len(), "splitting bucket");
                let cell = Bounds {
                    min: pos,
                    max: pos.map(|x| x + grid - 1),
                };
                let child = self.next_node(Some(Parent { node, cell }), grid / 2, &seeds);
                self.nodes[node].buckets.insert(pos, Entry::Child(child));
            }
            Some(&mut Entry::Child(child)) => self.balance(child),
            _ => {}
        }
    }
}

impl<const N: usize, T, const MAX_ENTRIES: usize, const GRID_EXP_MIN: u32, const GRID_EXP_MAX: u32>
    Default for LatticeTree<N, T, MAX_ENTRIES, GRID_EXP_MIN, GRID_EXP_MAX>
where
    T: Volume<N>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, T, const MAX_ENTRIES: usize, const GRID_EXP_MIN: u32, const GRID_EXP_MAX: u32>
    FromIterator<T> for LatticeTree<N, T, MAX_ENTRIES, GRID_EXP_MIN, GRID_EXP_MAX>
where
    T: Volume<N>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut tree = Self::new();
        for value in iter {
            tree.insert(value);
        }
        tree
    }
}
