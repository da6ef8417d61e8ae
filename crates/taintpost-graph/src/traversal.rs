//! Shared machinery for directed walks over trace frames.
//!
//! Every propagation pass follows the same pattern: a queue of frames keyed
//! forward by `(kind, callee_id, callee_port)` or backward by `(kind,
//! caller_id, caller_port)`, carrying a mutable kind map (traveling texts per
//! leaf kind) that each frame's leaf mapping rewrites. Memo tables make the
//! walks cycle-safe: every revisit either shrinks the residual kind map or
//! arrives with strictly more budget than a previously failed search.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    FxIndexSet,
    frame::LeafMapping,
    id::{FrameId, SharedTextId},
};

/// Traveling texts per leaf kind: `leaf kind id → set of shared text ids`.
pub type KindMap = FxHashMap<SharedTextId, FxHashSet<SharedTextId>>;

/// Kind map seen by a successor frame: taint entering on the successor's
/// caller side as `caller_leaf` leaves it as `callee_leaf`. Kinds the mapping
/// does not carry are dropped; an empty mapping forwards nothing and prunes
/// the walk at this frame.
pub fn next_kind_map(leaf_mapping: &FxIndexSet<LeafMapping>, map: &KindMap) -> KindMap {
    let mut next = KindMap::default();
    for leaf_map in leaf_mapping {
        if let Some(texts) = map.get(&leaf_map.caller_leaf) {
            next.entry(leaf_map.callee_leaf)
                .or_default()
                .extend(texts.iter().copied());
        }
    }
    next
}

/// Mirror of [`next_kind_map`] for backward walks.
pub fn prev_kind_map(leaf_mapping: &FxIndexSet<LeafMapping>, map: &KindMap) -> KindMap {
    let mut prev = KindMap::default();
    for leaf_map in leaf_mapping {
        if let Some(texts) = map.get(&leaf_map.callee_leaf) {
            prev.entry(leaf_map.caller_leaf)
                .or_default()
                .extend(texts.iter().copied());
        }
    }
    prev
}

/// Seeds a kind map that carries `texts` under every given leaf kind.
pub fn seed_kind_map(
    kinds: impl IntoIterator<Item = SharedTextId>,
    texts: &FxHashSet<SharedTextId>,
) -> KindMap {
    kinds
        .into_iter()
        .map(|kind| (kind, texts.clone()))
        .collect()
}

/// Feature-propagation memo: per frame and leaf kind, the set of texts
/// already carried through. On revisit the already-seen texts are subtracted
/// and only the residual is walked further.
#[derive(Default, Debug)]
pub struct FeatureMemo {
    visited: FxHashMap<FrameId, KindMap>,
}

impl FeatureMemo {
    /// Removes from `map` everything already recorded for `frame`. Returns
    /// the residual; an empty residual means the frame needs no revisit.
    pub fn subtract(&self, frame: FrameId, map: KindMap) -> KindMap {
        let Some(visited) = self.visited.get(&frame) else {
            return map;
        };
        let mut residual = KindMap::default();
        for (kind, mut texts) in map {
            if let Some(seen) = visited.get(&kind) {
                texts.retain(|text| !seen.contains(text));
            }
            if !texts.is_empty() {
                residual.insert(kind, texts);
            }
        }
        residual
    }

    pub fn record(&mut self, frame: FrameId, map: &KindMap) {
        let visited = self.visited.entry(frame).or_default();
        for (kind, texts) in map {
            visited
                .entry(*kind)
                .or_default()
                .extend(texts.iter().copied());
        }
    }

    pub fn visited(&self) -> impl Iterator<Item = (FrameId, &KindMap)> {
        self.visited.iter().map(|(frame, map)| (*frame, map))
    }

    pub fn get(&self, frame: FrameId) -> Option<&KindMap> {
        self.visited.get(&frame)
    }
}

/// Distance-propagation memo for traveling texts: per frame and leaf kind,
/// the minimum trace length each text was carried at. A text is only walked
/// again when it arrives at a strictly smaller distance.
#[derive(Default, Debug)]
pub struct TextDistanceMemo {
    visited: FxHashMap<FrameId, FxHashMap<SharedTextId, FxHashMap<SharedTextId, u32>>>,
}

impl TextDistanceMemo {
    /// Prunes the search space: drops texts already visited at a distance
    /// less than or equal to `trace_length`.
    pub fn subtract(&self, frame: FrameId, trace_length: u32, map: KindMap) -> KindMap {
        let Some(visited) = self.visited.get(&frame) else {
            return map;
        };
        let mut residual = KindMap::default();
        for (kind, mut texts) in map {
            if let Some(lengths) = visited.get(&kind) {
                texts.retain(|text| {
                    lengths
                        .get(text)
                        .is_none_or(|recorded| trace_length < *recorded)
                });
            }
            if !texts.is_empty() {
                residual.insert(kind, texts);
            }
        }
        residual
    }

    /// Records the kind map at `trace_length`. Texts for which
    /// `is_distance_free` holds (features) are stored at distance 0
    /// regardless of hop count, so later shorter arrivals never re-walk them.
    pub fn record(
        &mut self,
        frame: FrameId,
        trace_length: u32,
        map: &KindMap,
        mut is_distance_free: impl FnMut(SharedTextId) -> bool,
    ) {
        let visited = self.visited.entry(frame).or_default();
        for (kind, texts) in map {
            let lengths = visited.entry(*kind).or_default();
            for text in texts {
                let length = if is_distance_free(*text) { 0 } else { trace_length };
                lengths.insert(*text, length);
            }
        }
    }

    /// Per-frame final state: every `(text, min trace length)` recorded,
    /// across all leaf kinds.
    pub fn visited(
        &self,
    ) -> impl Iterator<Item = (FrameId, &FxHashMap<SharedTextId, FxHashMap<SharedTextId, u32>>)>
    {
        self.visited.iter().map(|(frame, state)| (*frame, state))
    }
}

/// Distance memo for leaf searches with a "searched but not found" sentinel.
///
/// `distance >= 0` means the leaf was reached within `distance` hops from the
/// frame. `distance == -k` means a previous search from this frame with `k`
/// hops of budget did not reach the leaf; only a visit with strictly more
/// remaining budget may try again.
#[derive(Default, Debug)]
pub struct LeafDistanceMemo {
    visited: FxHashMap<FrameId, FxHashMap<SharedTextId, i32>>,
}

impl LeafDistanceMemo {
    /// Given a visit to `frame` with `remaining_length` budget looking for
    /// `leaves`, returns the leaves that still need to be searched below this
    /// frame and marks them as pending (`-remaining_length`) until resolved.
    ///
    /// Leaves recorded with a non-negative distance are never re-enqueued;
    /// leaves recorded with `-k` are retried only when `remaining_length > k`.
    pub fn remaining_leaves(
        &mut self,
        remaining_length: u32,
        leaves: &FxHashSet<SharedTextId>,
        frame: FrameId,
    ) -> FxHashSet<SharedTextId> {
        debug_assert!(remaining_length > 0);
        let pending = -(remaining_length as i32);
        match self.visited.entry(frame) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let visited = entry.get_mut();
                let mut revisit = FxHashSet::default();
                for leaf in leaves {
                    match visited.get(leaf) {
                        None => {
                            revisit.insert(*leaf);
                        }
                        Some(distance) if *distance < 0 && ((-*distance) as u32) < remaining_length => {
                            revisit.insert(*leaf);
                        }
                        Some(_) => {}
                    }
                }
                for leaf in &revisit {
                    visited.insert(*leaf, pending);
                }
                revisit
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(leaves.iter().map(|leaf| (*leaf, pending)).collect());
                leaves.clone()
            }
        }
    }

    pub fn get(&self, frame: FrameId) -> Option<&FxHashMap<SharedTextId, i32>> {
        self.visited.get(&frame)
    }

    pub fn state(&self, frame: FrameId) -> FxHashMap<SharedTextId, i32> {
        self.visited.get(&frame).cloned().unwrap_or_default()
    }

    pub fn update(&mut self, frame: FrameId, state: FxHashMap<SharedTextId, i32>) {
        self.visited.entry(frame).or_default().extend(state);
    }

    pub fn record(&mut self, frame: FrameId, leaf: SharedTextId, distance: i32) {
        self.visited.entry(frame).or_default().insert(leaf, distance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> SharedTextId {
        SharedTextId::from_u32(n)
    }

    fn frame(n: u32) -> FrameId {
        FrameId::from_u32(n)
    }

    fn texts(ids: &[u32]) -> FxHashSet<SharedTextId> {
        ids.iter().map(|n| id(*n)).collect()
    }

    #[test]
    fn kind_map_threads_through_leaf_mapping() {
        let mapping: FxIndexSet<LeafMapping> = [
            LeafMapping {
                caller_leaf: id(1),
                callee_leaf: id(2),
                transform: id(9),
            },
            LeafMapping {
                caller_leaf: id(3),
                callee_leaf: id(4),
                transform: id(9),
            },
        ]
        .into_iter()
        .collect();

        let map = seed_kind_map([id(1)], &texts(&[10, 11]));
        let next = next_kind_map(&mapping, &map);
        assert_eq!(next.len(), 1);
        assert_eq!(next[&id(2)], texts(&[10, 11]));

        let back = prev_kind_map(&mapping, &next);
        assert_eq!(back.len(), 1);
        assert_eq!(back[&id(1)], texts(&[10, 11]));
    }

    #[test]
    fn empty_leaf_mapping_prunes() {
        let mapping = FxIndexSet::default();
        let map = seed_kind_map([id(1)], &texts(&[10]));
        assert!(next_kind_map(&mapping, &map).is_empty());
    }

    #[test]
    fn feature_memo_subtracts_residual() {
        let mut memo = FeatureMemo::default();
        let map = seed_kind_map([id(1)], &texts(&[10, 11]));
        let first = memo.subtract(frame(1), map.clone());
        assert_eq!(first[&id(1)], texts(&[10, 11]));
        memo.record(frame(1), &first);

        // Second arrival with one new text only walks the new text.
        let second = memo.subtract(frame(1), seed_kind_map([id(1)], &texts(&[10, 12])));
        assert_eq!(second[&id(1)], texts(&[12]));
        memo.record(frame(1), &second);

        // Fully seen arrivals produce an empty residual.
        assert!(memo.subtract(frame(1), map).is_empty());
    }

    #[test]
    fn text_distance_memo_revisits_only_closer() {
        let mut memo = TextDistanceMemo::default();
        let map = seed_kind_map([id(1)], &texts(&[10]));
        memo.record(frame(1), 3, &map, |_| false);

        assert!(memo.subtract(frame(1), 3, map.clone()).is_empty());
        assert!(memo.subtract(frame(1), 5, map.clone()).is_empty());
        let closer = memo.subtract(frame(1), 2, map.clone());
        assert_eq!(closer[&id(1)], texts(&[10]));

        // Distance-free texts pin to 0 and never revisit.
        memo.record(frame(2), 7, &map, |_| true);
        assert!(memo.subtract(frame(2), 1, map).is_empty());
    }

    #[test]
    fn remaining_leaves_never_requeues_resolved() {
        let mut memo = LeafDistanceMemo::default();
        let leaves = texts(&[1, 2]);

        // First visit opens all leaves as pending with the full budget.
        let open = memo.remaining_leaves(5, &leaves, frame(1));
        assert_eq!(open, leaves);
        assert_eq!(memo.get(frame(1)).unwrap()[&id(1)], -5);

        // A shallower or equal revisit is dropped.
        assert!(memo.remaining_leaves(5, &leaves, frame(1)).is_empty());
        assert!(memo.remaining_leaves(3, &leaves, frame(1)).is_empty());

        // Resolving one leaf keeps it resolved even under a larger budget.
        memo.record(frame(1), id(1), 2);
        let open = memo.remaining_leaves(9, &leaves, frame(1));
        assert_eq!(open, texts(&[2]));
        assert_eq!(memo.get(frame(1)).unwrap()[&id(1)], 2);
        assert_eq!(memo.get(frame(1)).unwrap()[&id(2)], -9);
    }
}
