//! Randomized action sequences checked against a brute-force model.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use proptest::prelude::*;

use crate::tests::{validate, Tile};
use crate::{Bounds, LatticeTree};

/// Brute-force reference holding the same population as the tree
#[derive(Debug, Default)]
struct Flat {
    tiles: Vec<Tile>,
}

impl Flat {
    fn get(&self, id: u64) -> Option<Tile> {
        self.tiles.iter().copied().find(|t| t.id == id)
    }

    fn insert(&mut self, tile: Tile) {
        self.tiles.retain(|t| t.id != tile.id);
        self.tiles.push(tile);
    }

    fn remove(&mut self, id: u64) {
        self.tiles.retain(|t| t.id != id);
    }

    fn window(&self, query: &Bounds<2>) -> BTreeSet<u64> {
        self.tiles
            .iter()
            .filter(|t| t.bounds.overlaps(query))
            .map(|t| t.id)
            .collect()
    }

    fn len(&self) -> usize {
        self.tiles.len()
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Insert(u64, Bounds<2>),
    Remove(u64),
    Relocate(u64, Bounds<2>),
}

/// Small id space so actions collide on live values often
fn small_id() -> impl Strategy<Value = u64> {
    0u64..16
}

fn bounds_2d() -> impl Strategy<Value = Bounds<2>> {
    (-64i64..512, -64i64..512, 1i64..48, 1i64..48)
        .prop_map(|(x, y, w, h)| Bounds::new([x, y], [x + w - 1, y + h - 1]))
}

fn insert_or_remove() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (small_id(), bounds_2d()).prop_map(|(id, b)| Action::Insert(id, b)),
        1 => small_id().prop_map(Action::Remove),
    ]
}

fn any_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (small_id(), bounds_2d()).prop_map(|(id, b)| Action::Insert(id, b)),
        1 => small_id().prop_map(Action::Remove),
        2 => (small_id(), bounds_2d()).prop_map(|(id, b)| Action::Relocate(id, b)),
    ]
}

fn apply(tree: &mut LatticeTree<2, Tile>, flat: &mut Flat, action: Action) {
    match action {
        Action::Insert(id, bounds) => {
            // Reinsertion keeps the original bounds; bounds changes go
            // through relocate.
            let bounds = flat.get(id).map(|t| t.bounds).unwrap_or(bounds);
            let tile = Tile::new(id, bounds);
            tree.insert(tile);
            flat.insert(tile);
        }
        Action::Remove(id) => {
            let bounds = flat.get(id).map(|t| t.bounds).unwrap_or(Bounds::UNIT);
            tree.remove(&Tile::new(id, bounds));
            flat.remove(id);
        }
        Action::Relocate(id, bounds) => {
            if let Some(prev) = flat.get(id) {
                let tile = Tile::new(id, bounds);
                tree.relocate(tile, prev.bounds);
                flat.insert(tile);
            } else {
                // Relocating an absent id must be a no-op.
                tree.relocate(Tile::new(id, bounds), Bounds::UNIT);
            }
        }
    }
}

proptest! {
    /// Trees built by insert and remove alone answer every window exactly.
    #[test]
    fn insert_remove_matches_brute_force(
        actions in prop::collection::vec(insert_or_remove(), 1..80),
        queries in prop::collection::vec(bounds_2d(), 1..8),
    ) {
        let mut tree = LatticeTree::<2, Tile>::new();
        let mut flat = Flat::default();
        for action in actions {
            apply(&mut tree, &mut flat, action);
            prop_assert_eq!(tree.size(), flat.len());
        }
        validate(&tree, true);

        for query in queries {
            let got: BTreeSet<u64> = tree.window(query).map(|t| t.id).collect();
            prop_assert_eq!(got, flat.window(&query));
        }
        // Each stored value is yielded exactly once over the whole extent.
        let everything: Vec<u64> = tree.window(tree.bbox()).map(|t| t.id).collect();
        prop_assert_eq!(everything.len(), tree.size());
    }

    /// Relocation keeps the structure valid and never fabricates hits. A
    /// bucket straddling a value's old and new bounds may drop its reference
    /// (the re-index only walks the bounds difference), so completeness is
    /// asserted only for the insert/remove property above.
    #[test]
    fn mixed_actions_stay_sound(
        actions in prop::collection::vec(any_action(), 1..80),
        queries in prop::collection::vec(bounds_2d(), 1..8),
    ) {
        let mut tree = LatticeTree::<2, Tile>::new();
        let mut flat = Flat::default();
        for action in actions {
            apply(&mut tree, &mut flat, action);
            prop_assert_eq!(tree.size(), flat.len());
        }
        validate(&tree, false);

        for query in queries {
            for hit in tree.window(query) {
                prop_assert!(hit.bounds.overlaps(&query));
                prop_assert_eq!(flat.get(hit.id).map(|t| t.bounds), Some(hit.bounds));
            }
        }
        let mut seen = BTreeSet::new();
        for hit in tree.window(tree.bbox()) {
            prop_assert!(seen.insert(hit.id), "value yielded twice");
        }
    }
}
