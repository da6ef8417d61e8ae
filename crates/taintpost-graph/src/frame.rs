//! Trace frames: the directed edges of the call graph.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    FxIndexSet,
    id::{AnnotationId, FrameId, RunId, SharedTextId},
    location::SourceLocation,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// Sink-ward half of a trace (issue → sink).
    Precondition,
    /// Source-ward half of a trace (issue → source).
    Postcondition,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FrameReachability {
    #[default]
    Unreachable,
    Reachable,
}

/// Class type interval of a call edge.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TypeInterval {
    pub lower: i32,
    pub upper: i32,
    pub preserves_type_context: bool,
}

/// One triple of the per-frame kind transform: taint of kind `caller_leaf`
/// entering on the caller side leaves the frame as `callee_leaf`, with
/// `transform` naming the interned transform-kind text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LeafMapping {
    pub caller_leaf: SharedTextId,
    pub callee_leaf: SharedTextId,
    pub transform: SharedTextId,
}

impl LeafMapping {
    /// Self-mapping for a plain (untransformed) leaf kind.
    pub fn identity(leaf: SharedTextId) -> Self {
        Self {
            caller_leaf: leaf,
            callee_leaf: leaf,
            transform: leaf,
        }
    }
}

/// A directed edge in the call graph with taint kind information.
#[derive(Clone, Debug)]
pub struct TraceFrame {
    pub id: FrameId,
    pub kind: TraceKind,
    pub caller_id: SharedTextId,
    pub caller_port: String,
    pub callee_id: SharedTextId,
    pub callee_port: String,
    pub callee_location: SourceLocation,
    pub filename_id: SharedTextId,
    pub run_id: RunId,
    pub type_interval: Option<TypeInterval>,
    /// Intermediate source locations the taint passes through.
    pub titos: SmallVec<[SourceLocation; 4]>,
    pub reachability: FrameReachability,
    /// How leaf kinds propagate through this frame. An empty mapping forwards
    /// nothing: traversals derive an empty kind map from it and prune the
    /// subtree behind the frame.
    pub leaf_mapping: FxIndexSet<LeafMapping>,
}

impl TraceFrame {
    /// Distinct caller-side kinds of the frame's leaf mapping.
    pub fn caller_leaf_kinds(&self) -> FxHashSet<SharedTextId> {
        self.leaf_mapping.iter().map(|m| m.caller_leaf).collect()
    }
}

/// Auxiliary edge hanging off a trace frame. May point into a subtrace
/// (another set of frames whose root carries a `subtrace_root` port) via the
/// annotation↔frame assoc on the graph.
#[derive(Clone, Debug)]
pub struct TraceFrameAnnotation {
    pub id: AnnotationId,
    /// The frame this annotation hangs off.
    pub frame_id: FrameId,
    pub location: SourceLocation,
    pub kind: Option<String>,
    pub message: String,
    pub leaf_id: Option<SharedTextId>,
    pub link: Option<String>,
    pub trace_key: Option<String>,
}

/// Callee-side kinds reachable from `leaves` through `leaf_mapping`.
pub fn compute_next_leaf_kinds(
    leaves: &FxHashSet<SharedTextId>,
    leaf_mapping: &FxIndexSet<LeafMapping>,
) -> FxHashSet<SharedTextId> {
    leaf_mapping
        .iter()
        .filter(|m| leaves.contains(&m.caller_leaf))
        .map(|m| m.callee_leaf)
        .collect()
}

/// Caller-side kinds that map onto `leaves` through `leaf_mapping`.
pub fn compute_prev_leaf_kinds(
    leaves: &FxHashSet<SharedTextId>,
    leaf_mapping: &FxIndexSet<LeafMapping>,
) -> FxHashSet<SharedTextId> {
    leaf_mapping
        .iter()
        .filter(|m| leaves.contains(&m.callee_leaf))
        .map(|m| m.caller_leaf)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> SharedTextId {
        SharedTextId::from_u32(n)
    }

    #[test]
    fn leaf_kind_transforms() {
        let mapping: FxIndexSet<LeafMapping> = [LeafMapping {
            caller_leaf: id(1),
            callee_leaf: id(2),
            transform: id(9),
        }]
        .into_iter()
        .collect();

        let caller: FxHashSet<_> = [id(1)].into_iter().collect();
        assert_eq!(
            compute_next_leaf_kinds(&caller, &mapping),
            [id(2)].into_iter().collect()
        );
        let callee: FxHashSet<_> = [id(2)].into_iter().collect();
        assert_eq!(
            compute_prev_leaf_kinds(&callee, &mapping),
            [id(1)].into_iter().collect()
        );
        // Kinds the mapping does not carry disappear.
        let unrelated: FxHashSet<_> = [id(3)].into_iter().collect();
        assert!(compute_next_leaf_kinds(&unrelated, &mapping).is_empty());
    }
}
