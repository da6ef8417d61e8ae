//! In-memory trace graph for static-analysis taint results.
//!
//! The graph links issue instances to call-graph trace frames and is the
//! payload every post-processing pass reads and mutates before the result is
//! handed to persistence. Strings that occur many times (taint kinds,
//! callables, filenames, features) are interned as [`SharedText`] and all
//! relations are kept as explicit assoc tables plus inverted indexes, so the
//! graph supports cheap directed walks in both the caller→callee and
//! callee→caller direction.

pub mod error;
pub mod frame;
pub mod graph;
pub mod id;
pub mod issue;
pub mod location;
pub mod port;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod text;
pub mod traversal;
pub mod trimmed;

use std::hash::BuildHasherDefault;

use rustc_hash::FxHasher;

pub use crate::{
    error::GraphError,
    frame::{
        FrameReachability, LeafMapping, TraceFrame, TraceFrameAnnotation, TraceKind, TypeInterval,
        compute_next_leaf_kinds, compute_prev_leaf_kinds,
    },
    graph::TraceGraph,
    id::{AnnotationId, FixInfoId, FrameId, InstanceId, IssueId, RunId, SharedTextId},
    issue::{FixInfo, Issue, IssueInstance, IssueStatus, PurgeStatus, Run, Severity},
    location::SourceLocation,
    port::{DefaultLeafPortPolicy, LeafPortPolicy, is_anchor_port, is_root_port, is_subtrace_root_port},
    text::{SharedText, SharedTextKind},
    trimmed::TrimmedTraceGraph,
};

pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FxIndexSet<T> = indexmap::IndexSet<T, BuildHasherDefault<FxHasher>>;
