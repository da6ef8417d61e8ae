//! Test support: a builder producing small, well-formed trace graphs with
//! one call per entity, mirroring how analyzer output populates the store.

use smallvec::SmallVec;

use crate::{
    FxIndexSet,
    frame::{FrameReachability, LeafMapping, TraceFrame, TraceFrameAnnotation, TraceKind},
    graph::TraceGraph,
    id::{AnnotationId, FrameId, InstanceId, IssueId, RunId, SharedTextId},
    issue::{Issue, IssueInstance, IssueStatus, PurgeStatus, Run},
    location::SourceLocation,
    text::SharedTextKind,
};

pub struct FakeGraphBuilder {
    graph: TraceGraph,
    run_id: RunId,
    handle: u32,
}

impl Default for FakeGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGraphBuilder {
    pub fn new() -> Self {
        let mut graph = TraceGraph::new();
        let run_id = graph.mint_run_id();
        graph
            .add_run(Run {
                id: run_id,
                job_id: None,
            })
            .expect("fresh graph has no runs");
        Self {
            graph,
            run_id,
            handle: 0,
        }
    }

    pub fn graph_mut(&mut self) -> &mut TraceGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> TraceGraph {
        self.graph
    }

    pub fn callable(&mut self, name: &str) -> SharedTextId {
        self.graph
            .get_or_add_shared_text(SharedTextKind::Callable, name)
    }

    pub fn filename(&mut self, name: &str) -> SharedTextId {
        self.graph
            .get_or_add_shared_text(SharedTextKind::Filename, name)
    }

    pub fn feature(&mut self, name: &str) -> SharedTextId {
        self.graph
            .get_or_add_shared_text(SharedTextKind::Feature, name)
    }

    pub fn source(&mut self, name: &str) -> SharedTextId {
        self.graph
            .get_or_add_shared_text(SharedTextKind::Source, name)
    }

    pub fn sink(&mut self, name: &str) -> SharedTextId {
        self.graph.get_or_add_shared_text(SharedTextKind::Sink, name)
    }

    pub fn issue(&mut self, callable: &str, code: u32) -> IssueId {
        self.handle += 1;
        let callable_id = self.callable(callable);
        let id = self.graph.mint_issue_id();
        self.graph
            .add_issue(Issue {
                id,
                handle: format!("handle-{}", self.handle),
                code,
                callable_id,
                status: IssueStatus::Uncategorized,
                severity: None,
                detected_time: 0,
                first_instance_id: None,
            })
            .expect("builder mints fresh issue ids");
        id
    }

    pub fn instance(&mut self, issue: IssueId, filename: &str, callable: &str) -> InstanceId {
        self.instance_with(issue, filename, callable, |_| {})
    }

    pub fn instance_with(
        &mut self,
        issue: IssueId,
        filename: &str,
        callable: &str,
        customize: impl FnOnce(&mut IssueInstance),
    ) -> InstanceId {
        let filename_id = self.filename(filename);
        let callable_id = self.callable(callable);
        let message_id = self
            .graph
            .get_or_add_shared_text(SharedTextKind::Message, "tainted data reaches a sink");
        let id = self.graph.mint_instance_id();
        let mut instance = IssueInstance {
            id,
            issue_id: issue,
            run_id: self.run_id,
            filename_id,
            callable_id,
            message_id,
            location: SourceLocation::new(1, 1, 1),
            fix_info_id: None,
            is_new_issue: false,
            min_trace_length_to_sources: None,
            min_trace_length_to_sinks: None,
            callable_count: 0,
            purge_status: PurgeStatus::None,
        };
        customize(&mut instance);
        self.graph
            .add_issue_instance(instance)
            .expect("builder mints fresh instance ids");
        id
    }

    pub fn instance_feature(&mut self, instance: InstanceId, feature: SharedTextId) {
        self.graph.add_issue_instance_shared_text_assoc(instance, feature);
    }

    pub fn instance_source(&mut self, instance: InstanceId, source: SharedTextId) {
        self.graph.add_issue_instance_shared_text_assoc(instance, source);
    }

    pub fn instance_sink(&mut self, instance: InstanceId, sink: SharedTextId) {
        self.graph.add_issue_instance_shared_text_assoc(instance, sink);
    }

    pub fn precondition_frame(
        &mut self,
        caller: &str,
        caller_port: &str,
        callee: &str,
        callee_port: &str,
        leaves: &[(SharedTextId, Option<u32>)],
    ) -> FrameId {
        self.frame(
            TraceKind::Precondition,
            "lib/code.py",
            caller,
            caller_port,
            callee,
            callee_port,
            leaves,
        )
    }

    pub fn precondition_frame_in_file(
        &mut self,
        filename: &str,
        caller: &str,
        caller_port: &str,
        callee: &str,
        callee_port: &str,
        leaves: &[(SharedTextId, Option<u32>)],
    ) -> FrameId {
        self.frame(
            TraceKind::Precondition,
            filename,
            caller,
            caller_port,
            callee,
            callee_port,
            leaves,
        )
    }

    pub fn postcondition_frame(
        &mut self,
        caller: &str,
        caller_port: &str,
        callee: &str,
        callee_port: &str,
        leaves: &[(SharedTextId, Option<u32>)],
    ) -> FrameId {
        self.frame(
            TraceKind::Postcondition,
            "lib/code.py",
            caller,
            caller_port,
            callee,
            callee_port,
            leaves,
        )
    }

    /// A frame carrying the given leaves with identity kind mappings.
    #[allow(clippy::too_many_arguments)]
    pub fn frame(
        &mut self,
        kind: TraceKind,
        filename: &str,
        caller: &str,
        caller_port: &str,
        callee: &str,
        callee_port: &str,
        leaves: &[(SharedTextId, Option<u32>)],
    ) -> FrameId {
        let leaf_mapping = leaves
            .iter()
            .map(|(leaf, _)| LeafMapping::identity(*leaf))
            .collect();
        let id = self.frame_with_mapping(
            kind,
            filename,
            caller,
            caller_port,
            callee,
            callee_port,
            leaf_mapping,
        );
        for (leaf, depth) in leaves {
            self.graph.add_trace_frame_leaf_assoc(id, *leaf, *depth);
        }
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn frame_with_mapping(
        &mut self,
        kind: TraceKind,
        filename: &str,
        caller: &str,
        caller_port: &str,
        callee: &str,
        callee_port: &str,
        leaf_mapping: FxIndexSet<LeafMapping>,
    ) -> FrameId {
        let caller_id = self.callable(caller);
        let callee_id = self.callable(callee);
        let filename_id = self.filename(filename);
        let id = self.graph.mint_frame_id();
        self.graph
            .add_trace_frame(TraceFrame {
                id,
                kind,
                caller_id,
                caller_port: caller_port.to_owned(),
                callee_id,
                callee_port: callee_port.to_owned(),
                callee_location: SourceLocation::new(id.to_u32(), 1, 1),
                filename_id,
                run_id: self.run_id,
                type_interval: None,
                titos: SmallVec::new(),
                reachability: FrameReachability::Unreachable,
                leaf_mapping,
            })
            .expect("builder mints fresh frame ids");
        id
    }

    pub fn first_hop(&mut self, instance: InstanceId, frame: FrameId) {
        self.graph.add_issue_instance_trace_frame_assoc(instance, frame);
    }

    /// An annotation on `frame` whose subtrace starts at the given frames.
    pub fn annotation(&mut self, frame: FrameId, subtrace_frames: &[FrameId]) -> AnnotationId {
        let id = self.graph.mint_annotation_id();
        self.graph
            .add_trace_annotation(TraceFrameAnnotation {
                id,
                frame_id: frame,
                location: SourceLocation::new(1, 1, 1),
                kind: None,
                message: "see subtrace".to_owned(),
                leaf_id: None,
                link: None,
                trace_key: None,
            })
            .expect("builder mints fresh annotation ids");
        for subtrace_frame in subtrace_frames {
            self.graph
                .add_trace_frame_annotation_trace_frame_assoc(id, *subtrace_frame);
        }
        id
    }
}

/// Panics if the graph violates a structural invariant: every id referenced
/// by an entity, assoc or mapping resolves, and every leaf of a frame's own
/// taint direction is carried by the frame's leaf mapping from the caller
/// side. (Leaves of the opposite direction are distance annotations added by
/// the propagation passes and carry no mapping.)
pub fn assert_graph_invariants(graph: &TraceGraph) {
    for instance in graph.issue_instances() {
        assert!(graph.has_issue(instance.issue_id), "instance references a missing issue");
        for text in [instance.filename_id, instance.callable_id, instance.message_id] {
            assert!(graph.has_shared_text(text), "instance references a missing text");
        }
        for text in graph.issue_instance_shared_texts(instance.id) {
            assert!(graph.has_shared_text(text), "instance assoc references a missing text");
        }
        for frame in graph.issue_instance_trace_frames(instance.id) {
            assert!(graph.has_trace_frame(frame), "first-hop assoc references a missing frame");
        }
    }
    for frame in graph.trace_frames() {
        for text in [frame.caller_id, frame.callee_id, frame.filename_id] {
            assert!(graph.has_shared_text(text), "frame references a missing text");
        }
        for mapping in &frame.leaf_mapping {
            for text in [mapping.caller_leaf, mapping.callee_leaf, mapping.transform] {
                assert!(graph.has_shared_text(text), "leaf mapping references a missing text");
            }
        }
        let own_direction = match frame.kind {
            TraceKind::Precondition => SharedTextKind::Sink,
            TraceKind::Postcondition => SharedTextKind::Source,
        };
        let caller_kinds = frame.caller_leaf_kinds();
        for (leaf, _) in graph.trace_frame_leaf_assoc(frame.id) {
            assert!(graph.has_shared_text(leaf), "leaf assoc references a missing text");
            if graph.shared_text_kind(leaf) == own_direction {
                assert!(
                    caller_kinds.contains(&leaf),
                    "taint leaf {leaf} is not carried by the frame's leaf mapping"
                );
            }
        }
    }
    for annotation in graph.trace_annotations() {
        assert!(
            graph.has_trace_frame(annotation.frame_id),
            "annotation references a missing parent frame"
        );
    }
}
