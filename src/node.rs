use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::bounds::{clamp_down, Bounds, PosIter};

/// Link from a node to the parent cell it subdivides
#[derive(Debug, Copy, Clone)]
pub(crate) struct Parent<const N: usize> {
    /// Arena id of the parent node
    pub node: usize,
    /// The single parent-grid cell this child covers
    pub cell: Bounds<N>,
}

/// Contents of one bucket
#[derive(Debug)]
pub(crate) enum Entry {
    /// Ids of values whose bounds overlap the cell. Non-empty while present.
    List(Vec<u64>),
    /// Arena id of the child node covering the cell at half the grid
    Child(usize),
}

/// One grid level of the tree: a sparse map from grid-aligned cell origins
/// to buckets
#[derive(Debug)]
pub(crate) struct Node<const N: usize> {
    pub parent: Option<Parent<N>>,
    /// Cell edge length; a power of two
    pub grid: i64,
    pub buckets: HashMap<[i64; N], Entry>,
}

impl<const N: usize> Node<N> {
    pub fn new(parent: Option<Parent<N>>, grid: i64) -> Self {
        Self {
            parent,
            grid,
            buckets: HashMap::new(),
        }
    }

    /// Bucket at the cell containing `pos`, if any
    pub fn entry(&self, pos: [i64; N]) -> Option<&Entry> {
        self.buckets.get(&clamp_down(pos, self.grid))
    }

    pub fn entry_mut(&mut self, pos: [i64; N]) -> Option<&mut Entry> {
        self.buckets.get_mut(&clamp_down(pos, self.grid))
    }

    /// Origins of every grid-aligned cell touching `vol`
    pub fn pos_iter(&self, vol: &Bounds<N>) -> PosIter<N> {
        vol.clamp(self.grid).pos_iter(self.grid)
    }
}
