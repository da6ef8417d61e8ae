//! Reconstruction of a minimal trace graph scoped to a set of affected files.
//!
//! The trimmed graph is built by copying from a source graph: first every
//! issue instance located in an affected file together with its full traces,
//! then (unless restricted to affected issues) every issue reachable backward
//! from frames located in affected files, trimmed to the conditions that
//! reach them. Afterwards per-instance properties that trimming invalidates
//! (callable counts, minimum trace lengths) are recomputed.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::{
    frame::{TraceKind, compute_next_leaf_kinds, compute_prev_leaf_kinds},
    graph::TraceGraph,
    id::{AnnotationId, FrameId, InstanceId, SharedTextId},
    text::SharedTextKind,
    traversal::LeafDistanceMemo,
};

/// Hard bound on the bounded min-depth recomputation.
const MAX_TRACE_LENGTH: u32 = 100;
/// Reported when no leaf is reachable within [`MAX_TRACE_LENGTH`] hops.
const INFINITE_TRACE_LENGTH: u32 = 9999;

/// Work item of the non-recursive min-depth recomputation. The `ComputeMin`
/// marker for a frame is pushed before its children's `Search` actions so the
/// min-reduction runs post-order without recursion.
enum Action {
    Search {
        frame: FrameId,
        remaining_length: u32,
        leaves: FxHashSet<SharedTextId>,
    },
    ComputeMin {
        frame: FrameId,
        leaves: FxHashSet<SharedTextId>,
    },
}

pub struct TrimmedTraceGraph {
    graph: TraceGraph,
    affected_files: Vec<String>,
    affected_issues_only: bool,
    visited_frames: FxHashSet<FrameId>,
}

impl TrimmedTraceGraph {
    /// Creates an empty trimmed graph for the given path prefixes.
    pub fn new(affected_files: Vec<String>, affected_issues_only: bool) -> Self {
        Self {
            graph: TraceGraph::new(),
            affected_files,
            affected_issues_only,
            visited_frames: FxHashSet::default(),
        }
    }

    /// Populates this graph from the given one based on the affected files.
    pub fn populate_from_trace_graph(&mut self, source: &TraceGraph) {
        self.visited_frames.clear();

        self.populate_affected_issues(source);

        if !self.affected_issues_only {
            // Find issues reachable from the affected conditions, keeping
            // only the traces that reach them.
            self.populate_issues_from_affected_trace_frames(source);

            // Issues found through one direction may be missing the whole
            // other direction (an issue reaching an affected file through its
            // source trace still needs all of its sink traces for a complete
            // picture). Fill in any direction that has no first hop at all.
            for instance_id in self.graph.issue_instance_ids() {
                let first_hops: Vec<FrameId> =
                    self.graph.issue_instance_trace_frames(instance_id).collect();
                let has_fwd = first_hops
                    .iter()
                    .any(|frame| self.graph.trace_frame(*frame).kind == TraceKind::Postcondition);
                let has_bwd = first_hops
                    .iter()
                    .any(|frame| self.graph.trace_frame(*frame).kind == TraceKind::Precondition);
                if !has_fwd {
                    self.populate_issue_trace(source, instance_id, Some(TraceKind::Postcondition));
                }
                if !has_bwd {
                    self.populate_issue_trace(source, instance_id, Some(TraceKind::Precondition));
                }
            }
        }

        self.recompute_instance_properties();
    }

    pub fn graph(&self) -> &TraceGraph {
        &self.graph
    }

    pub fn into_graph(self) -> TraceGraph {
        self.graph
    }

    fn is_affected_filename(&self, filename: &str) -> bool {
        self.affected_files
            .iter()
            .any(|prefix| filename.starts_with(prefix.as_str()))
    }

    /// Copies every issue instance located in an affected file, with all of
    /// its traces: the issue exists in the change set, so nothing is trimmed.
    fn populate_affected_issues(&mut self, source: &TraceGraph) {
        let affected: Vec<InstanceId> = source
            .issue_instances()
            .filter(|instance| {
                self.is_affected_filename(&source.shared_text(instance.filename_id).contents)
            })
            .map(|instance| instance.id)
            .collect();

        for instance_id in affected {
            if self.graph.has_issue_instance(instance_id) {
                continue;
            }
            self.populate_issue(source, instance_id);
            self.populate_issue_trace(source, instance_id, None);
        }
    }

    /// Frames located in affected files should be reachable from some issue
    /// instance; walk backward from them to find and copy those issues.
    fn populate_issues_from_affected_trace_frames(&mut self, source: &TraceGraph) {
        let initial_frames: Vec<FrameId> = source
            .trace_frames()
            .filter(|frame| {
                self.is_affected_filename(&source.shared_text(frame.filename_id).contents)
            })
            .map(|frame| frame.id)
            .collect();

        self.populate_issues_from_affected_conditions(source, initial_frames);
    }

    /// Backward walk from the seed conditions. A parent condition may not
    /// transitively lead to the leaves its descendants lead to, so the walk
    /// tracks the leaf kinds it arrived with and an instance is only
    /// associated to a seed condition when its own leaf kinds intersect them.
    fn populate_issues_from_affected_conditions(
        &mut self,
        source: &TraceGraph,
        initial_frames: Vec<FrameId>,
    ) {
        let mut visited: FxHashMap<FrameId, FxHashSet<SharedTextId>> = FxHashMap::default();
        let mut stack: Vec<(FrameId, FxHashSet<SharedTextId>)> = initial_frames
            .iter()
            .map(|frame| (*frame, source.trace_frame(*frame).caller_leaf_kinds()))
            .collect();

        while let Some((frame_id, mut leaves)) = stack.pop() {
            match visited.get_mut(&frame_id) {
                Some(seen) => {
                    leaves.retain(|leaf| !seen.contains(leaf));
                    if leaves.is_empty() {
                        continue;
                    }
                    seen.extend(leaves.iter().copied());
                }
                None => {
                    visited.insert(frame_id, leaves.clone());
                }
            }

            // The frame may be a first hop of instances. Re-check instances
            // found before: the assoc with this condition still has to be
            // recorded.
            for instance_id in source.issue_instances_for_root_frame(frame_id) {
                let issue_leaves: FxHashSet<SharedTextId> = source
                    .issue_instance_shared_texts(instance_id)
                    .filter(|text| source.shared_text_kind(*text).is_taint_kind())
                    .collect();
                if issue_leaves.is_disjoint(&leaves) {
                    continue;
                }
                if !self.graph.has_issue_instance(instance_id) {
                    self.populate_issue(source, instance_id);
                }
                self.graph
                    .add_issue_instance_trace_frame_assoc(instance_id, frame_id);
            }

            let frame = source.trace_frame(frame_id);
            for predecessor_id in
                source.get_trace_frames_from_callee(frame.kind, frame.caller_id, &frame.caller_port)
            {
                let predecessor = source.trace_frame(predecessor_id);
                let predecessor_leaves = compute_prev_leaf_kinds(&leaves, &predecessor.leaf_mapping);
                if !predecessor_leaves.is_empty() {
                    stack.push((predecessor_id, predecessor_leaves));
                }
            }
        }

        // Copy traces leading out from the seeds, then every condition the
        // backward walk visited on the way to the issues.
        self.populate_trace(source, initial_frames);
        let mut walked: Vec<FrameId> = visited.into_keys().collect();
        walked.sort();
        for frame_id in walked {
            self.copy_trace_frame(source, frame_id);
        }
    }

    /// Copies an issue instance with its issue, texts and fix info.
    fn populate_issue(&mut self, source: &TraceGraph, instance_id: InstanceId) {
        let instance = source.issue_instance(instance_id).clone();
        let issue = source.issue(instance.issue_id).clone();

        self.copy_shared_text(source, instance.message_id);
        self.copy_shared_text(source, instance.filename_id);
        self.copy_shared_text(source, instance.callable_id);
        self.copy_shared_text(source, issue.callable_id);

        if let Some(fix_info_id) = instance.fix_info_id {
            if !self.graph.has_fix_info(fix_info_id) {
                let fix_info = source.fix_info(fix_info_id).clone();
                self.graph
                    .add_fix_info(fix_info)
                    .expect("fix info copy is guarded by has_fix_info");
            }
        }

        if !self.graph.has_issue(issue.id) {
            self.graph
                .add_issue(issue)
                .expect("issue copy is guarded by has_issue");
        }
        self.graph
            .add_issue_instance(instance)
            .expect("instance copy is guarded by has_issue_instance");

        let texts: Vec<SharedTextId> = source.issue_instance_shared_texts(instance_id).collect();
        for text_id in texts {
            self.copy_shared_text(source, text_id);
            self.graph
                .add_issue_instance_shared_text_assoc(instance_id, text_id);
        }
    }

    /// Copies the instance's first-hop frames of the given kind (all kinds
    /// when `None`) and the traces reachable from them.
    fn populate_issue_trace(
        &mut self,
        source: &TraceGraph,
        instance_id: InstanceId,
        kind: Option<TraceKind>,
    ) {
        let first_hops: Vec<FrameId> = source.issue_instance_trace_frames(instance_id).collect();
        let mut filtered = Vec::new();
        for frame_id in first_hops {
            let frame_kind = source.trace_frame(frame_id).kind;
            if kind.is_none() || kind == Some(frame_kind) {
                self.graph
                    .add_issue_instance_trace_frame_assoc(instance_id, frame_id);
                filtered.push(frame_id);
            }
        }
        self.populate_trace(source, filtered);
    }

    /// Copies all frames reachable from the given ones, following each
    /// frame's own direction (callee side).
    fn populate_trace(&mut self, source: &TraceGraph, mut frame_ids: Vec<FrameId>) {
        while let Some(frame_id) = frame_ids.pop() {
            if self.visited_frames.contains(&frame_id) {
                continue;
            }
            self.copy_trace_frame(source, frame_id);
            self.visited_frames.insert(frame_id);

            let frame = source.trace_frame(frame_id);
            frame_ids.extend(
                source
                    .get_next_trace_frames(frame)
                    .into_iter()
                    .filter(|next| !self.visited_frames.contains(next)),
            );
        }
    }

    /// Copies one frame with its texts, annotations and all of its leaf
    /// assocs: which leaves are needed is only known once the issues reaching
    /// the frame are known, so all of them come along.
    fn copy_trace_frame(&mut self, source: &TraceGraph, frame_id: FrameId) {
        if !self.graph.has_trace_frame(frame_id) {
            let frame = source.trace_frame(frame_id).clone();
            self.copy_shared_text(source, frame.filename_id);
            self.copy_shared_text(source, frame.caller_id);
            self.copy_shared_text(source, frame.callee_id);
            self.graph
                .add_trace_frame(frame)
                .expect("frame copy is guarded by has_trace_frame");
        }

        let annotations: Vec<AnnotationId> = source.frame_annotations(frame_id).collect();
        for annotation_id in annotations {
            self.copy_trace_annotation(source, annotation_id);
        }

        let leaf_assoc: Vec<(SharedTextId, Option<u32>)> =
            source.trace_frame_leaf_assoc(frame_id).collect();
        for (leaf_id, depth) in leaf_assoc {
            self.copy_shared_text(source, leaf_id);
            self.graph.add_trace_frame_leaf_assoc(frame_id, leaf_id, depth);
        }
    }

    /// Copies an annotation and the subtrace frames it points to. The parent
    /// frame of the annotation is not copied here.
    fn copy_trace_annotation(&mut self, source: &TraceGraph, annotation_id: AnnotationId) {
        if self.graph.has_trace_annotation(annotation_id) {
            return;
        }
        let annotation = source.trace_annotation(annotation_id).clone();
        if let Some(leaf_id) = annotation.leaf_id {
            self.copy_shared_text(source, leaf_id);
        }
        self.graph
            .add_trace_annotation(annotation)
            .expect("annotation copy is guarded by has_trace_annotation");

        let children: Vec<FrameId> = source.annotation_trace_frames(annotation_id).collect();
        for child in &children {
            self.graph
                .add_trace_frame_annotation_trace_frame_assoc(annotation_id, *child);
        }
        self.populate_trace(source, children);
    }

    fn copy_shared_text(&mut self, source: &TraceGraph, text_id: SharedTextId) {
        if !self.graph.has_shared_text(text_id) {
            self.graph
                .add_shared_text(source.shared_text(text_id).clone())
                .expect("text copy is guarded by has_shared_text");
        }
    }

    /// Recomputes the per-instance properties that trimming invalidates.
    fn recompute_instance_properties(&mut self) {
        let mut callables_histo: FxHashMap<SharedTextId, u32> = FxHashMap::default();
        for instance in self.graph.issue_instances() {
            *callables_histo.entry(instance.callable_id).or_default() += 1;
        }

        // One memo for all instances and both directions: distances are
        // keyed by normalized leaf kind, and source and sink kinds are
        // distinct texts.
        let mut visited = LeafDistanceMemo::default();

        for instance_id in self.graph.issue_instance_ids() {
            let instance = self.graph.issue_instance(instance_id);
            let prior_sources = instance.min_trace_length_to_sources;
            let prior_sinks = instance.min_trace_length_to_sinks;
            let callable_id = instance.callable_id;

            let min_to_sources = prior_sources.map(|_| {
                let first_hops = self
                    .graph
                    .issue_instance_trace_frames_of_kind(instance_id, TraceKind::Postcondition);
                self.recompute_trace_length_association(
                    &mut visited,
                    first_hops,
                    SharedTextKind::Source,
                )
            });
            let min_to_sinks = prior_sinks.map(|_| {
                let first_hops = self
                    .graph
                    .issue_instance_trace_frames_of_kind(instance_id, TraceKind::Precondition);
                self.recompute_trace_length_association(
                    &mut visited,
                    first_hops,
                    SharedTextKind::Sink,
                )
            });

            let instance = self.graph.issue_instance_mut(instance_id);
            instance.min_trace_length_to_sources = min_to_sources;
            instance.min_trace_length_to_sinks = min_to_sinks;
            instance.callable_count = callables_histo[&callable_id];
        }
    }

    /// Walks the traces from the initial frames to recompute and store the
    /// minimum trace length from each reachable frame to the given leaf
    /// kind. Returns the minimum over the initial frames, or
    /// [`INFINITE_TRACE_LENGTH`] when no leaf was reached.
    fn recompute_trace_length_association(
        &mut self,
        visited: &mut LeafDistanceMemo,
        initial_frames: Vec<FrameId>,
        leaf_kind: SharedTextKind,
    ) -> u32 {
        let mut stack: Vec<Action> = initial_frames
            .iter()
            .map(|frame| Action::Search {
                frame: *frame,
                remaining_length: MAX_TRACE_LENGTH,
                leaves: self.graph.trace_frame(*frame).caller_leaf_kinds(),
            })
            .collect();

        while let Some(action) = stack.pop() {
            match action {
                Action::Search {
                    frame,
                    remaining_length,
                    leaves,
                } => {
                    let leaves = visited.remaining_leaves(remaining_length, &leaves, frame);
                    if leaves.is_empty() || remaining_length <= 1 {
                        continue;
                    }

                    let (kind, callee_id, callee_port, leaf_mapping) = {
                        let frame = self.graph.trace_frame(frame);
                        (
                            frame.kind,
                            frame.callee_id,
                            frame.callee_port.clone(),
                            frame.leaf_mapping.clone(),
                        )
                    };

                    if self.graph.is_leaf_port(&callee_port) {
                        // Leaf kinds carried by the frame may still contain
                        // the local-transform separator; distances are keyed
                        // by the normalized kind.
                        for leaf_id in self.graph.trace_frame_leaf_ids_by_kind(frame, leaf_kind) {
                            let normalized = self.graph.get_transform_normalized_kind_id(leaf_id);
                            visited.record(frame, normalized, 0);
                        }
                        continue;
                    }

                    let successor_leaves = compute_next_leaf_kinds(&leaves, &leaf_mapping);
                    // Min-reduction must run after all children, so the
                    // marker goes on the stack before them.
                    stack.push(Action::ComputeMin { frame, leaves });
                    if !successor_leaves.is_empty() {
                        for successor in
                            self.graph
                                .get_trace_frames_from_caller(kind, callee_id, &callee_port)
                        {
                            stack.push(Action::Search {
                                frame: successor,
                                remaining_length: remaining_length - 1,
                                leaves: successor_leaves.clone(),
                            });
                        }
                    }
                }
                Action::ComputeMin { frame, leaves } => {
                    let mut visit_result = visited.state(frame);
                    let (kind, callee_id, callee_port, leaf_mapping) = {
                        let frame = self.graph.trace_frame(frame);
                        (
                            frame.kind,
                            frame.callee_id,
                            frame.callee_port.clone(),
                            frame.leaf_mapping.clone(),
                        )
                    };
                    let successors =
                        self.graph
                            .get_trace_frames_from_caller(kind, callee_id, &callee_port);

                    for leaf_id in &leaves {
                        let single: FxHashSet<SharedTextId> = [*leaf_id].into_iter().collect();
                        let successor_leaves = compute_next_leaf_kinds(&single, &leaf_mapping);
                        if successor_leaves.is_empty() {
                            continue;
                        }
                        for successor in &successors {
                            let Some(successor_state) = visited.get(*successor) else {
                                continue;
                            };
                            for (successor_leaf, length) in successor_state {
                                let length = *length;
                                if !successor_leaves.contains(successor_leaf) {
                                    continue;
                                }
                                let Some(current) = visit_result.get(leaf_id).copied() else {
                                    continue;
                                };
                                if length >= 0 {
                                    if length + 1 < current || current < 0 {
                                        visit_result.insert(*leaf_id, length + 1);
                                    }
                                } else if length - 1 > current {
                                    // A deeper failed search supersedes a
                                    // shallower one.
                                    visit_result.insert(*leaf_id, length - 1);
                                }
                            }
                        }
                    }

                    // Fold the results back into the frame's own leaf-assoc
                    // depths, keyed by the unnormalized leaf texts.
                    let frame_leaves: Vec<SharedTextId> =
                        self.graph.trace_frame_leaf_ids(frame).collect();
                    for frame_leaf in frame_leaves {
                        if !self.graph.shared_text_kind(frame_leaf).is_taint_kind() {
                            continue;
                        }
                        let normalized = self.graph.get_transform_normalized_kind_id(frame_leaf);
                        if !leaves.contains(&normalized) {
                            continue;
                        }
                        let depth = match visit_result.get(&normalized) {
                            Some(distance) if *distance >= 0 => *distance as u32,
                            _ => INFINITE_TRACE_LENGTH,
                        };
                        self.graph
                            .set_trace_frame_leaf_depth(frame, frame_leaf, Some(depth));
                    }

                    visited.update(frame, visit_result);
                }
            }
        }

        let mut result = INFINITE_TRACE_LENGTH;
        for frame in &initial_frames {
            if let Some(state) = visited.get(*frame) {
                for length in state.values() {
                    if *length >= 0 && (*length as u32) < result {
                        result = *length as u32;
                    }
                }
            }
        }
        debug!(
            initial_frames = initial_frames.len(),
            result, "recomputed minimum trace length"
        );
        result
    }
}
