//! The mutable trace graph store.
//!
//! Entities live in insertion-ordered maps keyed by their local id, so frame
//! enumeration within a pass is deterministic given the input graph. Forward
//! and backward walks go through two inverted indexes over frames:
//!
//! - by caller: `(kind, caller_id) → caller_port → frames` — queried with a
//!   frame's callee key to find its successors
//! - by callee: `(kind, callee_id) → callee_port → frames` — queried with a
//!   frame's caller key to find its predecessors

use rustc_hash::FxHashMap;

use crate::{
    FxIndexMap, FxIndexSet,
    error::GraphError,
    frame::{TraceFrame, TraceFrameAnnotation, TraceKind},
    id::{
        AnnotationId, FixInfoId, FrameId, InstanceId, IssueId, LocalIdAllocator, RunId,
        SharedTextId,
    },
    issue::{FixInfo, Issue, IssueInstance, Run},
    port::{self, DefaultLeafPortPolicy, LeafPortPolicy},
    text::{SharedText, SharedTextKind, TextStore},
};

type PortIndex = FxHashMap<(TraceKind, SharedTextId), FxHashMap<String, FxIndexSet<FrameId>>>;

pub struct TraceGraph {
    texts: TextStore,

    runs: FxIndexMap<RunId, Run>,
    issues: FxIndexMap<IssueId, Issue>,
    issue_by_handle: FxHashMap<String, IssueId>,
    issue_instances: FxIndexMap<InstanceId, IssueInstance>,
    trace_frames: FxIndexMap<FrameId, TraceFrame>,
    annotations: FxIndexMap<AnnotationId, TraceFrameAnnotation>,
    fix_infos: FxIndexMap<FixInfoId, FixInfo>,

    instance_frame_assoc: FxHashMap<InstanceId, FxIndexSet<FrameId>>,
    frame_instance_assoc: FxHashMap<FrameId, FxIndexSet<InstanceId>>,
    instance_text_assoc: FxHashMap<InstanceId, FxIndexSet<SharedTextId>>,
    frame_leaf_assoc: FxHashMap<FrameId, FxIndexMap<SharedTextId, Option<u32>>>,
    frame_annotations: FxHashMap<FrameId, FxIndexSet<AnnotationId>>,
    annotation_frame_assoc: FxHashMap<AnnotationId, FxIndexSet<FrameId>>,
    subtrace_frame_annotations: FxHashMap<FrameId, FxIndexSet<AnnotationId>>,

    frames_by_caller: PortIndex,
    frames_by_callee: PortIndex,

    /// Frames whose features later passes must carry up to the owning issue
    /// instances (consumed by the upward propagation pass).
    extra_features_to_propagate_up: FxIndexMap<FrameId, FxIndexSet<SharedTextId>>,

    leaf_port_policy: Box<dyn LeafPortPolicy + Send + Sync>,

    issue_ids: LocalIdAllocator,
    instance_ids: LocalIdAllocator,
    frame_ids: LocalIdAllocator,
    annotation_ids: LocalIdAllocator,
    fix_info_ids: LocalIdAllocator,
    run_ids: LocalIdAllocator,
}

impl Default for TraceGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceGraph {
    pub fn new() -> Self {
        Self::with_options(true, Box::new(DefaultLeafPortPolicy))
    }

    pub fn with_options(
        merge_shared_texts: bool,
        leaf_port_policy: Box<dyn LeafPortPolicy + Send + Sync>,
    ) -> Self {
        Self {
            texts: TextStore::new(merge_shared_texts),
            runs: FxIndexMap::default(),
            issues: FxIndexMap::default(),
            issue_by_handle: FxHashMap::default(),
            issue_instances: FxIndexMap::default(),
            trace_frames: FxIndexMap::default(),
            annotations: FxIndexMap::default(),
            fix_infos: FxIndexMap::default(),
            instance_frame_assoc: FxHashMap::default(),
            frame_instance_assoc: FxHashMap::default(),
            instance_text_assoc: FxHashMap::default(),
            frame_leaf_assoc: FxHashMap::default(),
            frame_annotations: FxHashMap::default(),
            annotation_frame_assoc: FxHashMap::default(),
            subtrace_frame_annotations: FxHashMap::default(),
            frames_by_caller: PortIndex::default(),
            frames_by_callee: PortIndex::default(),
            extra_features_to_propagate_up: FxIndexMap::default(),
            leaf_port_policy,
            issue_ids: LocalIdAllocator::default(),
            instance_ids: LocalIdAllocator::default(),
            frame_ids: LocalIdAllocator::default(),
            annotation_ids: LocalIdAllocator::default(),
            fix_info_ids: LocalIdAllocator::default(),
            run_ids: LocalIdAllocator::default(),
        }
    }

    // Shared texts

    pub fn get_or_add_shared_text(&mut self, kind: SharedTextKind, contents: &str) -> SharedTextId {
        self.texts.get_or_add(kind, contents)
    }

    pub fn get_shared_text(&self, kind: SharedTextKind, contents: &str) -> Option<SharedTextId> {
        self.texts.lookup(kind, contents)
    }

    /// Total on valid ids; panics on an id that is not in the store, which is
    /// a broken graph invariant.
    pub fn shared_text(&self, id: SharedTextId) -> &SharedText {
        self.texts.get(id).expect("shared text id not in store")
    }

    pub fn shared_text_kind(&self, id: SharedTextId) -> SharedTextKind {
        self.shared_text(id).kind
    }

    pub fn has_shared_text(&self, id: SharedTextId) -> bool {
        self.texts.contains(id)
    }

    pub fn add_shared_text(&mut self, text: SharedText) -> Result<(), GraphError> {
        self.texts.insert(text)
    }

    pub fn get_transform_normalized_kind_id(&mut self, id: SharedTextId) -> SharedTextId {
        self.texts.transform_normalized_kind_id(id)
    }

    pub fn shared_texts(&self) -> impl Iterator<Item = &SharedText> {
        self.texts.iter()
    }

    pub fn shared_text_count(&self) -> usize {
        self.texts.len()
    }

    // Runs

    pub fn mint_run_id(&mut self) -> RunId {
        RunId::from_u32(self.run_ids.mint())
    }

    pub fn add_run(&mut self, run: Run) -> Result<(), GraphError> {
        if self.runs.contains_key(&run.id) {
            return Err(GraphError::DuplicateId {
                entity: "run",
                id: run.id.to_u32(),
            });
        }
        self.run_ids.observe(run.id.to_u32());
        self.runs.insert(run.id, run);
        Ok(())
    }

    pub fn has_run(&self, id: RunId) -> bool {
        self.runs.contains_key(&id)
    }

    pub fn run(&self, id: RunId) -> &Run {
        self.runs.get(&id).expect("run id not in graph")
    }

    // Issues

    pub fn mint_issue_id(&mut self) -> IssueId {
        IssueId::from_u32(self.issue_ids.mint())
    }

    pub fn add_issue(&mut self, issue: Issue) -> Result<(), GraphError> {
        if self.issues.contains_key(&issue.id) {
            return Err(GraphError::DuplicateId {
                entity: "issue",
                id: issue.id.to_u32(),
            });
        }
        self.issue_ids.observe(issue.id.to_u32());
        self.issue_by_handle.insert(issue.handle.clone(), issue.id);
        self.issues.insert(issue.id, issue);
        Ok(())
    }

    pub fn has_issue(&self, id: IssueId) -> bool {
        self.issues.contains_key(&id)
    }

    pub fn issue(&self, id: IssueId) -> &Issue {
        self.issues.get(&id).expect("issue id not in graph")
    }

    pub fn issue_by_handle(&self, handle: &str) -> Option<IssueId> {
        self.issue_by_handle.get(handle).copied()
    }

    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values()
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    // Issue instances

    pub fn mint_instance_id(&mut self) -> InstanceId {
        InstanceId::from_u32(self.instance_ids.mint())
    }

    pub fn add_issue_instance(&mut self, instance: IssueInstance) -> Result<(), GraphError> {
        if self.issue_instances.contains_key(&instance.id) {
            return Err(GraphError::DuplicateId {
                entity: "issue instance",
                id: instance.id.to_u32(),
            });
        }
        self.instance_ids.observe(instance.id.to_u32());
        self.issue_instances.insert(instance.id, instance);
        Ok(())
    }

    pub fn has_issue_instance(&self, id: InstanceId) -> bool {
        self.issue_instances.contains_key(&id)
    }

    pub fn issue_instance(&self, id: InstanceId) -> &IssueInstance {
        self.issue_instances
            .get(&id)
            .expect("issue instance id not in graph")
    }

    pub fn issue_instance_mut(&mut self, id: InstanceId) -> &mut IssueInstance {
        self.issue_instances
            .get_mut(&id)
            .expect("issue instance id not in graph")
    }

    pub fn issue_instances(&self) -> impl Iterator<Item = &IssueInstance> {
        self.issue_instances.values()
    }

    pub fn issue_instance_ids(&self) -> Vec<InstanceId> {
        self.issue_instances.keys().copied().collect()
    }

    pub fn issue_instance_count(&self) -> usize {
        self.issue_instances.len()
    }

    // Fix info

    pub fn mint_fix_info_id(&mut self) -> FixInfoId {
        FixInfoId::from_u32(self.fix_info_ids.mint())
    }

    pub fn add_fix_info(&mut self, fix_info: FixInfo) -> Result<(), GraphError> {
        if self.fix_infos.contains_key(&fix_info.id) {
            return Err(GraphError::DuplicateId {
                entity: "fix info",
                id: fix_info.id.to_u32(),
            });
        }
        self.fix_info_ids.observe(fix_info.id.to_u32());
        self.fix_infos.insert(fix_info.id, fix_info);
        Ok(())
    }

    pub fn has_fix_info(&self, id: FixInfoId) -> bool {
        self.fix_infos.contains_key(&id)
    }

    pub fn fix_info(&self, id: FixInfoId) -> &FixInfo {
        self.fix_infos.get(&id).expect("fix info id not in graph")
    }

    // Trace frames

    pub fn mint_frame_id(&mut self) -> FrameId {
        FrameId::from_u32(self.frame_ids.mint())
    }

    pub fn add_trace_frame(&mut self, frame: TraceFrame) -> Result<(), GraphError> {
        if self.trace_frames.contains_key(&frame.id) {
            return Err(GraphError::DuplicateId {
                entity: "trace frame",
                id: frame.id.to_u32(),
            });
        }
        self.frame_ids.observe(frame.id.to_u32());
        self.frames_by_caller
            .entry((frame.kind, frame.caller_id))
            .or_default()
            .entry(frame.caller_port.clone())
            .or_default()
            .insert(frame.id);
        self.frames_by_callee
            .entry((frame.kind, frame.callee_id))
            .or_default()
            .entry(frame.callee_port.clone())
            .or_default()
            .insert(frame.id);
        self.trace_frames.insert(frame.id, frame);
        Ok(())
    }

    pub fn has_trace_frame(&self, id: FrameId) -> bool {
        self.trace_frames.contains_key(&id)
    }

    pub fn trace_frame(&self, id: FrameId) -> &TraceFrame {
        self.trace_frames.get(&id).expect("frame id not in graph")
    }

    pub fn trace_frame_mut(&mut self, id: FrameId) -> &mut TraceFrame {
        self.trace_frames
            .get_mut(&id)
            .expect("frame id not in graph")
    }

    pub fn trace_frames(&self) -> impl Iterator<Item = &TraceFrame> {
        self.trace_frames.values()
    }

    pub fn trace_frame_ids(&self) -> Vec<FrameId> {
        self.trace_frames.keys().copied().collect()
    }

    pub fn trace_frame_count(&self) -> usize {
        self.trace_frames.len()
    }

    // Annotations

    pub fn mint_annotation_id(&mut self) -> AnnotationId {
        AnnotationId::from_u32(self.annotation_ids.mint())
    }

    pub fn add_trace_annotation(
        &mut self,
        annotation: TraceFrameAnnotation,
    ) -> Result<(), GraphError> {
        if self.annotations.contains_key(&annotation.id) {
            return Err(GraphError::DuplicateId {
                entity: "trace frame annotation",
                id: annotation.id.to_u32(),
            });
        }
        self.annotation_ids.observe(annotation.id.to_u32());
        self.frame_annotations
            .entry(annotation.frame_id)
            .or_default()
            .insert(annotation.id);
        self.annotations.insert(annotation.id, annotation);
        Ok(())
    }

    pub fn has_trace_annotation(&self, id: AnnotationId) -> bool {
        self.annotations.contains_key(&id)
    }

    pub fn trace_annotation(&self, id: AnnotationId) -> &TraceFrameAnnotation {
        self.annotations
            .get(&id)
            .expect("annotation id not in graph")
    }

    pub fn trace_annotations(&self) -> impl Iterator<Item = &TraceFrameAnnotation> {
        self.annotations.values()
    }

    /// Annotations hanging off the given (parent) frame.
    pub fn frame_annotations(&self, frame: FrameId) -> impl Iterator<Item = AnnotationId> + '_ {
        self.frame_annotations
            .get(&frame)
            .into_iter()
            .flatten()
            .copied()
    }

    /// Subtrace first-hop frames of the given annotation.
    pub fn annotation_trace_frames(
        &self,
        annotation: AnnotationId,
    ) -> impl Iterator<Item = FrameId> + '_ {
        self.annotation_frame_assoc
            .get(&annotation)
            .into_iter()
            .flatten()
            .copied()
    }

    /// Annotations referencing the given frame as a subtrace first hop.
    pub fn annotations_for_subtrace_frame(
        &self,
        frame: FrameId,
    ) -> impl Iterator<Item = AnnotationId> + '_ {
        self.subtrace_frame_annotations
            .get(&frame)
            .into_iter()
            .flatten()
            .copied()
    }

    // Assocs

    /// First-hop edge between an issue instance and a frame. Idempotent.
    pub fn add_issue_instance_trace_frame_assoc(&mut self, instance: InstanceId, frame: FrameId) {
        self.instance_frame_assoc
            .entry(instance)
            .or_default()
            .insert(frame);
        self.frame_instance_assoc
            .entry(frame)
            .or_default()
            .insert(instance);
    }

    /// Attaches a feature/source/sink text to an instance. Idempotent.
    pub fn add_issue_instance_shared_text_assoc(
        &mut self,
        instance: InstanceId,
        text: SharedTextId,
    ) {
        self.instance_text_assoc
            .entry(instance)
            .or_default()
            .insert(text);
    }

    /// Records that `frame` transports `leaf` at `depth` hops from the
    /// nearest leaf-terminal frame. A smaller finite depth wins over a larger
    /// one; a known depth is never erased by `None`, and an existing `None`
    /// ("not applicable") stays `None`.
    pub fn add_trace_frame_leaf_assoc(
        &mut self,
        frame: FrameId,
        leaf: SharedTextId,
        depth: Option<u32>,
    ) {
        let assoc = self.frame_leaf_assoc.entry(frame).or_default();
        match assoc.entry(leaf) {
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(depth);
            }
            indexmap::map::Entry::Occupied(mut entry) => {
                if let (Some(old), Some(new)) = (*entry.get(), depth) {
                    entry.insert(Some(old.min(new)));
                }
            }
        }
    }

    /// Overwrites the recorded depth, used when recomputing trace lengths.
    pub fn set_trace_frame_leaf_depth(
        &mut self,
        frame: FrameId,
        leaf: SharedTextId,
        depth: Option<u32>,
    ) {
        self.frame_leaf_assoc
            .entry(frame)
            .or_default()
            .insert(leaf, depth);
    }

    pub fn add_trace_frame_annotation_trace_frame_assoc(
        &mut self,
        annotation: AnnotationId,
        frame: FrameId,
    ) {
        self.annotation_frame_assoc
            .entry(annotation)
            .or_default()
            .insert(frame);
        self.subtrace_frame_annotations
            .entry(frame)
            .or_default()
            .insert(annotation);
    }

    pub fn add_issue_instance_fix_info(&mut self, instance: InstanceId, fix_info: FixInfoId) {
        self.issue_instance_mut(instance).fix_info_id = Some(fix_info);
    }

    // Assoc queries

    pub fn issue_instance_trace_frames(
        &self,
        instance: InstanceId,
    ) -> impl Iterator<Item = FrameId> + '_ {
        self.instance_frame_assoc
            .get(&instance)
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn issue_instance_trace_frames_of_kind(
        &self,
        instance: InstanceId,
        kind: TraceKind,
    ) -> Vec<FrameId> {
        self.issue_instance_trace_frames(instance)
            .filter(|frame| self.trace_frame(*frame).kind == kind)
            .collect()
    }

    /// Inverse of the root first-hop assoc.
    pub fn issue_instances_for_root_frame(
        &self,
        frame: FrameId,
    ) -> impl Iterator<Item = InstanceId> + '_ {
        self.frame_instance_assoc
            .get(&frame)
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn issue_instance_shared_texts(
        &self,
        instance: InstanceId,
    ) -> impl Iterator<Item = SharedTextId> + '_ {
        self.instance_text_assoc
            .get(&instance)
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn issue_instance_shared_texts_by_kind(
        &self,
        instance: InstanceId,
        kind: SharedTextKind,
    ) -> Vec<SharedTextId> {
        self.issue_instance_shared_texts(instance)
            .filter(|text| self.shared_text_kind(*text) == kind)
            .collect()
    }

    pub fn trace_frame_leaf_assoc(
        &self,
        frame: FrameId,
    ) -> impl Iterator<Item = (SharedTextId, Option<u32>)> + '_ {
        self.frame_leaf_assoc
            .get(&frame)
            .into_iter()
            .flatten()
            .map(|(leaf, depth)| (*leaf, *depth))
    }

    pub fn trace_frame_leaf_ids(&self, frame: FrameId) -> impl Iterator<Item = SharedTextId> + '_ {
        self.trace_frame_leaf_assoc(frame).map(|(leaf, _)| leaf)
    }

    pub fn trace_frame_leaf_ids_by_kind(
        &self,
        frame: FrameId,
        kind: SharedTextKind,
    ) -> Vec<SharedTextId> {
        self.trace_frame_leaf_ids(frame)
            .filter(|leaf| self.shared_text_kind(*leaf) == kind)
            .collect()
    }

    // Directed steps

    /// Forward step: the frames reachable from a caller whose callee matches
    /// `(kind, callee_id, callee_port)` — i.e. frames whose caller side
    /// equals that key.
    pub fn get_trace_frames_from_caller(
        &self,
        kind: TraceKind,
        callee_id: SharedTextId,
        callee_port: &str,
    ) -> Vec<FrameId> {
        self.frames_by_caller
            .get(&(kind, callee_id))
            .and_then(|by_port| by_port.get(callee_port))
            .map(|frames| frames.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Backward step, mirror of [`Self::get_trace_frames_from_caller`].
    pub fn get_trace_frames_from_callee(
        &self,
        kind: TraceKind,
        caller_id: SharedTextId,
        caller_port: &str,
    ) -> Vec<FrameId> {
        self.frames_by_callee
            .get(&(kind, caller_id))
            .and_then(|by_port| by_port.get(caller_port))
            .map(|frames| frames.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn get_next_trace_frames(&self, frame: &TraceFrame) -> Vec<FrameId> {
        self.get_trace_frames_from_caller(frame.kind, frame.callee_id, &frame.callee_port)
    }

    /// All frames with the given kind and caller, regardless of port.
    pub fn get_all_trace_frames_from_caller(
        &self,
        kind: TraceKind,
        caller_id: SharedTextId,
    ) -> Vec<FrameId> {
        self.frames_by_caller
            .get(&(kind, caller_id))
            .map(|by_port| by_port.values().flatten().copied().collect())
            .unwrap_or_default()
    }

    // Port classification

    pub fn is_leaf_port(&self, port: &str) -> bool {
        self.leaf_port_policy.is_leaf_port(port)
    }

    pub fn is_root_port(&self, port: &str) -> bool {
        port::is_root_port(port)
    }

    pub fn is_subtrace_root_port(&self, port: &str) -> bool {
        port::is_subtrace_root_port(port)
    }

    pub fn is_anchor_port(&self, port: &str) -> bool {
        port::is_anchor_port(port)
    }

    // Extra-features registry

    pub fn add_extra_feature_to_propagate_up(&mut self, frame: FrameId, feature: SharedTextId) {
        self.extra_features_to_propagate_up
            .entry(frame)
            .or_default()
            .insert(feature);
    }

    pub fn extra_features_to_propagate_up(
        &self,
    ) -> impl Iterator<Item = (FrameId, &FxIndexSet<SharedTextId>)> {
        self.extra_features_to_propagate_up
            .iter()
            .map(|(frame, features)| (*frame, features))
    }
}

#[cfg(test)]
mod tests {
    use smallvec::SmallVec;

    use super::*;
    use crate::{FrameReachability, LeafMapping, SourceLocation};

    fn frame(
        graph: &mut TraceGraph,
        kind: TraceKind,
        caller: &str,
        caller_port: &str,
        callee: &str,
        callee_port: &str,
    ) -> FrameId {
        let caller_id = graph.get_or_add_shared_text(SharedTextKind::Callable, caller);
        let callee_id = graph.get_or_add_shared_text(SharedTextKind::Callable, callee);
        let filename_id = graph.get_or_add_shared_text(SharedTextKind::Filename, "lib/a.py");
        let id = graph.mint_frame_id();
        graph
            .add_trace_frame(TraceFrame {
                id,
                kind,
                caller_id,
                caller_port: caller_port.to_owned(),
                callee_id,
                callee_port: callee_port.to_owned(),
                callee_location: SourceLocation::new(1, 1, 1),
                filename_id,
                run_id: RunId::from_u32(1),
                type_interval: None,
                titos: SmallVec::new(),
                reachability: FrameReachability::Unreachable,
                leaf_mapping: FxIndexSet::default(),
            })
            .unwrap();
        id
    }

    #[test]
    fn inverted_indexes_agree_with_forward_relations() {
        let mut graph = TraceGraph::new();
        let a = frame(&mut graph, TraceKind::Precondition, "f", "root", "g", "formal(x)");
        let b = frame(&mut graph, TraceKind::Precondition, "g", "formal(x)", "h", "sink");
        // A postcondition frame with the same callables must not show up.
        frame(&mut graph, TraceKind::Postcondition, "g", "formal(x)", "h", "sink");

        let g = graph.get_shared_text(SharedTextKind::Callable, "g").unwrap();
        assert_eq!(
            graph.get_trace_frames_from_caller(TraceKind::Precondition, g, "formal(x)"),
            vec![b]
        );
        assert_eq!(
            graph.get_trace_frames_from_callee(TraceKind::Precondition, g, "formal(x)"),
            vec![a]
        );
        let first = graph.trace_frame(a).clone();
        assert_eq!(graph.get_next_trace_frames(&first), vec![b]);
    }

    #[test]
    fn duplicate_frame_id_is_rejected() {
        let mut graph = TraceGraph::new();
        let a = frame(&mut graph, TraceKind::Precondition, "f", "root", "g", "sink");
        let copy = graph.trace_frame(a).clone();
        assert_eq!(
            graph.add_trace_frame(copy),
            Err(GraphError::DuplicateId {
                entity: "trace frame",
                id: a.to_u32()
            })
        );
    }

    #[test]
    fn leaf_assoc_keeps_smaller_finite_depth() {
        let mut graph = TraceGraph::new();
        let f = frame(&mut graph, TraceKind::Precondition, "f", "root", "g", "sink");
        let leaf = graph.get_or_add_shared_text(SharedTextKind::Sink, "RCE");

        graph.add_trace_frame_leaf_assoc(f, leaf, Some(4));
        graph.add_trace_frame_leaf_assoc(f, leaf, Some(2));
        graph.add_trace_frame_leaf_assoc(f, leaf, Some(7));
        assert_eq!(graph.trace_frame_leaf_assoc(f).collect::<Vec<_>>(), vec![(leaf, Some(2))]);

        // Unknown depth does not erase a known one.
        graph.add_trace_frame_leaf_assoc(f, leaf, None);
        assert_eq!(graph.trace_frame_leaf_assoc(f).collect::<Vec<_>>(), vec![(leaf, Some(2))]);

        // An unknown depth stays unknown.
        let feature = graph.get_or_add_shared_text(SharedTextKind::Feature, "via-anchor");
        graph.add_trace_frame_leaf_assoc(f, feature, None);
        graph.add_trace_frame_leaf_assoc(f, feature, Some(3));
        assert_eq!(
            graph
                .trace_frame_leaf_assoc(f)
                .find(|(l, _)| *l == feature)
                .unwrap()
                .1,
            None
        );
    }
}
