//! Diagnostic surface: pre-order dump and structural summaries.

use alloc::collections::BTreeSet;
#[cfg(feature = "std")]
use alloc::string::String;
use core::fmt;

use hashbrown::HashMap;

use crate::bounds::{ceil_log2, Bounds, PosIter};
use crate::cursor::{Cursor, Mode};
use crate::node::Entry;
use crate::{LatticeTree, Volume};

struct DumpFrame<const N: usize> {
    node: usize,
    depth: usize,
    positions: PosIter<N>,
}

fn write_indent<W: fmt::Write>(out: &mut W, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        out.write_str("  ")?;
    }
    Ok(())
}

impl<const N: usize, T, const MAX_ENTRIES: usize, const GRID_EXP_MIN: u32, const GRID_EXP_MAX: u32>
    LatticeTree<N, T, MAX_ENTRIES, GRID_EXP_MIN, GRID_EXP_MAX>
where
    T: Volume<N>,
{
    /// Write an indented pre-order rendering of the tree
    pub fn dump_into<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let bounds = self.bbox();
        writeln!(out, "[[tree with bounds {bounds}]]")?;
        writeln!(out, "[{}] @ {}", self.root, self.nodes[self.root].grid)?;
        let mut worklist = alloc::vec![DumpFrame {
            node: self.root,
            depth: 0,
            positions: self.nodes[self.root].pos_iter(&bounds),
        }];
        while !worklist.is_empty() {
            let mut next: Option<DumpFrame<N>> = None;
            {
                let top = worklist.last_mut().expect("worklist emptied mid-iteration");
                let node = &self.nodes[top.node];
                while next.is_none() {
                    let Some(pos) = top.positions.next() else { break };
                    let Some(entry) = node.entry(pos) else { continue };
                    let cell = Bounds {
                        min: pos,
                        max: pos.map(|x| x + node.grid - 1),
                    };
                    write_indent(out, top.depth)?;
                    writeln!(out, "[{}][{}]:", top.node, cell)?;
                    match entry {
                        Entry::List(list) => {
                            for &id in list {
                                let value =
                                    self.values.get(&id).expect("value missing from store");
                                write_indent(out, top.depth)?;
                                writeln!(out, ">> {} {}", id, value.bounds())?;
                            }
                        }
                        Entry::Child(child) => {
                            let child_node = &self.nodes[*child];
                            let link = child_node
                                .parent
                                .as_ref()
                                .expect("child node without a parent link");
                            write_indent(out, top.depth)?;
                            writeln!(out, ">>[{}] @ {}", child, child_node.grid)?;
                            next = Some(DumpFrame {
                                node: *child,
                                depth: top.depth + 1,
                                positions: child_node.pos_iter(&link.cell),
                            });
                        }
                    }
                }
            }
            match next {
                Some(frame) => worklist.push(frame),
                None => {
                    worklist.pop();
                }
            }
        }
        Ok(())
    }

    /// Print the pre-order rendering to stdout
    #[cfg(feature = "std")]
    pub fn dump(&self) {
        let mut rendered = String::new();
        self.dump_into(&mut rendered)
            .expect("formatting a string cannot fail");
        std::print!("{rendered}");
    }

    /// Map from each leaf bucket's volume to the ids stored in it
    pub fn collect_ids(&self) -> HashMap<Bounds<N>, BTreeSet<u64>> {
        let mut ids: HashMap<Bounds<N>, BTreeSet<u64>> = HashMap::new();
        let mut cursor = Cursor::new(Mode::Entries, self.root, self.bbox());
        while let Some((node, pos)) = cursor.next_pair(&self.nodes) {
            let node = &self.nodes[node];
            let Some(Entry::List(list)) = node.entry(pos) else {
                continue;
            };
            let cell = Bounds {
                min: pos,
                max: pos.map(|x| x + node.grid - 1),
            };
            ids.entry(cell).or_default().extend(list.iter().copied());
        }
        ids
    }

    /// Number of nodes in the arena
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of grid levels between the root and the finest node
    pub fn depth(&self) -> u32 {
        let root_grid = self.nodes[self.root].grid;
        let min_grid = self
            .nodes
            .iter()
            .map(|(_, node)| node.grid)
            .min()
            .unwrap_or(root_grid);
        ceil_log2(root_grid as u64) - ceil_log2(min_grid as u64) + 1
    }
}
