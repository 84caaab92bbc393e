use arrayvec::ArrayVec;
use hashbrown::{HashMap, HashSet};
use slab::Slab;

use crate::bounds::{Bounds, PosIter};
use crate::node::{Entry, Node};
use crate::Volume;

/// Grids are powers of two in `i64` and halve at each level, so a traversal
/// path can hold at most this many frames.
const MAX_DEPTH: usize = i64::MAX.ilog2() as usize;

/// What a traversal yields at each bucket.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Mode {
    /// Every `(node, pos)` pair within the volume, bucket present or not
    Points,
    /// Every `(node, pos)` pair whose bucket holds a list
    Entries,
    /// Every distinct stored value overlapping the volume, exactly once
    Values,
}

/// One level of pending traversal work
struct Frame<const N: usize> {
    node: usize,
    /// Volume this frame is scoped to; for child frames, already intersected
    /// with the query
    vol: Bounds<N>,
    /// Cell origins not yet visited within `vol`. `None` until the frame is
    /// first advanced.
    pairs: Option<PosIter<N>>,
    /// Values mode only: the bucket being scanned and the next index within
    /// its list
    list: Option<([i64; N], usize)>,
}

/// Reentrant tree walk servicing all three traversal modes
///
/// The cursor holds no reference into the tree; every advance takes the node
/// arena (and, in values mode, the value store) by argument, so `insert` and
/// `remove` are free to mutate buckets between yields. The innermost live
/// cursor is advanced first: the list cursor, then the pair cursor, then the
/// worklist itself.
pub(crate) struct Cursor<const N: usize> {
    mode: Mode,
    query: Bounds<N>,
    worklist: ArrayVec<Frame<N>, MAX_DEPTH>,
    /// Values mode only: ids already yielded
    visited: HashSet<u64>,
}

impl<const N: usize> Cursor<N> {
    pub fn new(mode: Mode, root: usize, query: Bounds<N>) -> Self {
        let mut worklist = ArrayVec::new();
        worklist.push(Frame {
            node: root,
            vol: query,
            pairs: None,
            list: None,
        });
        Self {
            mode,
            query,
            worklist,
            visited: HashSet::new(),
        }
    }

    /// Next `(node, pos)` pair in points or entries mode
    pub fn next_pair(&mut self, nodes: &Slab<Node<N>>) -> Option<(usize, [i64; N])> {
        debug_assert!(self.mode != Mode::Values);
        loop {
            let (node, pos) = self.next_position(nodes)?;
            match nodes[node].entry(pos) {
                None => {
                    if self.mode == Mode::Points {
                        return Some((node, pos));
                    }
                }
                Some(Entry::List(_)) => return Some((node, pos)),
                Some(Entry::Child(child)) => self.descend(*child, nodes),
            }
        }
    }

    /// Next not-yet-seen value id whose bounds overlap the query, in values
    /// mode
    pub fn next_value<T: Volume<N>>(
        &mut self,
        nodes: &Slab<Node<N>>,
        values: &HashMap<u64, T>,
    ) -> Option<u64> {
        debug_assert!(self.mode == Mode::Values);
        loop {
            // Innermost cursor first: resume a partially scanned bucket list.
            let frame = self.worklist.last_mut()?;
            if let Some((pos, index)) = frame.list.take() {
                let node = frame.node;
                if let Some(found) = self.scan_list(nodes, values, node, pos, index) {
                    return Some(self.record(pos, found));
                }
                continue;
            }
            let (node, pos) = self.next_position(nodes)?;
            match nodes[node].entry(pos) {
                None => {}
                Some(Entry::List(_)) => {
                    if let Some(found) = self.scan_list(nodes, values, node, pos, 0) {
                        return Some(self.record(pos, found));
                    }
                }
                Some(Entry::Child(child)) => self.descend(*child, nodes),
            }
        }
    }

    /// Advance the pair cursor of the top frame, initializing fresh frames
    /// and popping exhausted ones. Applies no bucket disposition.
    fn next_position(&mut self, nodes: &Slab<Node<N>>) -> Option<(usize, [i64; N])> {
        loop {
            let frame = self.worklist.last_mut()?;
            let node = frame.node;
            let pos = match &mut frame.pairs {
                Some(pairs) => pairs.next(),
                None => {
                    let pairs = nodes[node].pos_iter(&frame.vol);
                    frame.pairs.insert(pairs).next()
                }
            };
            match pos {
                Some(pos) => return Some((node, pos)),
                None => {
                    self.worklist.pop();
                }
            }
        }
    }

    /// Queue a child node, scoped to the part of its cell the query touches
    fn descend(&mut self, child: usize, nodes: &Slab<Node<N>>) {
        let cell = nodes[child]
            .parent
            .as_ref()
            .expect("child node without a parent link")
            .cell;
        if let Some(vol) = cell.intersect(&self.query) {
            self.worklist.push(Frame {
                node: child,
                vol,
                pairs: None,
                list: None,
            });
        }
    }

    /// Scan a bucket's list from `start`, skipping ids already yielded and
    /// values that do not overlap the query
    fn scan_list<T: Volume<N>>(
        &self,
        nodes: &Slab<Node<N>>,
        values: &HashMap<u64, T>,
        node: usize,
        pos: [i64; N],
        start: usize,
    ) -> Option<(u64, usize)> {
        let Some(Entry::List(list)) = nodes[node].entry(pos) else {
            unreachable!("list cursor over a non-list bucket");
        };
        for (i, &id) in list.iter().enumerate().skip(start) {
            if self.visited.contains(&id) {
                continue;
            }
            let value = values.get(&id).expect("value missing from store");
            if value.bounds().overlaps(&self.query) {
                return Some((id, i + 1));
            }
        }
        None
    }

    /// Record a hit: park the list cursor on the top frame and mark the id
    /// visited
    fn record(&mut self, pos: [i64; N], (id, next): (u64, usize)) -> u64 {
        self.visited.insert(id);
        let frame = self
            .worklist
            .last_mut()
            .expect("recorded a value from an empty worklist");
        frame.list = Some((pos, next));
        id
    }
}

/// Lazy query over the values overlapping a volume, created by
/// [`LatticeTree::window`](crate::LatticeTree::window)
///
/// Yields each matching value exactly once, in unspecified order.
pub struct Window<'a, const N: usize, T> {
    nodes: &'a Slab<Node<N>>,
    values: &'a HashMap<u64, T>,
    cursor: Cursor<N>,
}

impl<'a, const N: usize, T> Window<'a, N, T> {
    pub(crate) fn new(
        nodes: &'a Slab<Node<N>>,
        values: &'a HashMap<u64, T>,
        cursor: Cursor<N>,
    ) -> Self {
        Self {
            nodes,
            values,
            cursor,
        }
    }
}

impl<'a, const N: usize, T: Volume<N>> Iterator for Window<'a, N, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor.next_value(self.nodes, self.values)?;
        Some(
            self.values
                .get(&id)
                .expect("value missing from store"),
        )
    }
}
