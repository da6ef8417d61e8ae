use std::collections::VecDeque;

use anyhow::Result;
use rustc_hash::FxHashMap;
use taintpost_graph::{
    FrameId, FxIndexSet, InstanceId, SharedTextId, SharedTextKind, TraceGraph,
    traversal::{FeatureMemo, KindMap, prev_kind_map},
};
use tracing::info;

use crate::{PipelineStep, summary::Summary};

/// Marker attached to every instance that received upward-propagated
/// features, so consumers can filter on it.
const MARKER_FEATURE: &str = "sapp-upward-propagated-breadcrumbs";

/// Carries features that earlier steps attached to specific frames upward,
/// against the trace direction, onto the owning issue instances. Kinds and
/// transforms are respected along the way, and features found on subtraces
/// are inlined onto the parent frames (subtraces are not searched by
/// downstream readers).
#[derive(Default)]
pub struct PropagateExtraFeaturesToInstances {
    visited: FeatureMemo,
    instance_features: FxHashMap<InstanceId, FxIndexSet<SharedTextId>>,
    parent_frame_features: FxHashMap<FrameId, FxIndexSet<SharedTextId>>,
}

impl PropagateExtraFeaturesToInstances {
    pub fn new() -> Self {
        Self::default()
    }

    fn walk_backward(&mut self, graph: &TraceGraph, start: FrameId, features: &FxIndexSet<SharedTextId>) {
        let feature_set = features.iter().copied().collect();
        let mut queue: VecDeque<(FrameId, KindMap)> = VecDeque::new();
        queue.push_back((
            start,
            taintpost_graph::traversal::seed_kind_map(
                graph.trace_frame(start).caller_leaf_kinds(),
                &feature_set,
            ),
        ));

        while let Some((frame_id, kind_map)) = queue.pop_front() {
            if kind_map.is_empty() {
                continue;
            }
            let kind_map = self.visited.subtract(frame_id, kind_map);
            if kind_map.is_empty() {
                continue;
            }
            self.visited.record(frame_id, &kind_map);

            let frame = graph.trace_frame(frame_id);
            if graph.is_root_port(&frame.caller_port) {
                // At an issue: record the features arriving under kinds the
                // frame actually carries from its caller side.
                let acceptable = frame.caller_leaf_kinds();
                let mut features = FxIndexSet::default();
                for (kind, extra_features) in &kind_map {
                    if acceptable.contains(kind) {
                        features.extend(extra_features.iter().copied());
                    }
                }
                for instance_id in graph.issue_instances_for_root_frame(frame_id) {
                    self.instance_features
                        .entry(instance_id)
                        .or_default()
                        .extend(features.iter().copied());
                }
            } else if graph.is_subtrace_root_port(&frame.caller_port) {
                // Hop from the subtrace onto the main trace through the
                // annotations referencing this frame. Kinds cannot be mapped
                // across that hop, so all features travel and are also
                // inlined onto the parent frame.
                let mut parent_features = rustc_hash::FxHashSet::default();
                for extra_features in kind_map.values() {
                    parent_features.extend(extra_features.iter().copied());
                }
                for annotation_id in graph.annotations_for_subtrace_frame(frame_id) {
                    let parent_frame_id = graph.trace_annotation(annotation_id).frame_id;
                    self.parent_frame_features
                        .entry(parent_frame_id)
                        .or_default()
                        .extend(parent_features.iter().copied());
                    let parent_frame = graph.trace_frame(parent_frame_id);
                    let parent_map: KindMap = parent_frame
                        .leaf_mapping
                        .iter()
                        .map(|mapping| (mapping.caller_leaf, parent_features.clone()))
                        .collect();
                    queue.push_back((parent_frame_id, parent_map));
                }
            } else {
                for previous_id in graph.get_trace_frames_from_callee(
                    frame.kind,
                    frame.caller_id,
                    &frame.caller_port,
                ) {
                    let previous = graph.trace_frame(previous_id);
                    queue.push_back((previous_id, prev_kind_map(&previous.leaf_mapping, &kind_map)));
                }
            }
        }
    }
}

impl PipelineStep for PropagateExtraFeaturesToInstances {
    type In = TraceGraph;
    type Out = TraceGraph;

    fn name(&self) -> &'static str {
        "PropagateExtraFeaturesToInstances"
    }

    fn run(&mut self, mut graph: TraceGraph, _summary: &mut Summary) -> Result<TraceGraph> {
        info!("propagating extra features from previous steps towards issues");

        let marker_feature = graph.get_or_add_shared_text(SharedTextKind::Feature, MARKER_FEATURE);
        let registry: Vec<(FrameId, FxIndexSet<SharedTextId>)> = graph
            .extra_features_to_propagate_up()
            .map(|(frame, features)| (frame, features.clone()))
            .collect();
        for (frame, features) in &registry {
            self.walk_backward(&graph, *frame, features);
        }

        let mut parent_frame_features_added = 0usize;
        for (parent_frame_id, features) in &self.parent_frame_features {
            for feature in features {
                graph.add_trace_frame_leaf_assoc(*parent_frame_id, *feature, Some(0));
                parent_frame_features_added += 1;
            }
        }

        let mut instance_features_added = 0usize;
        for (instance_id, features) in &self.instance_features {
            graph.add_issue_instance_shared_text_assoc(*instance_id, marker_feature);
            for feature in features {
                graph.add_issue_instance_shared_text_assoc(*instance_id, *feature);
                instance_features_added += 1;
            }
        }

        info!(
            "added {} features to {} instances, and {} features to {} parent frames",
            instance_features_added,
            self.instance_features.len(),
            parent_frame_features_added,
            self.parent_frame_features.len(),
        );

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use taintpost_graph::testing::FakeGraphBuilder;

    use super::*;

    #[test]
    fn carries_features_up_to_the_instance() {
        let mut builder = FakeGraphBuilder::new();
        let sink = builder.sink("RCE");
        let extra = builder.feature("added-by-pass");
        let issue = builder.issue("Entry.main", 6015);
        let instance = builder.instance(issue, "src/entry.py", "Entry.main");
        let root = builder.precondition_frame("Entry.main", "root", "Mid.step", "formal(x)", &[(sink, Some(1))]);
        let deep = builder.precondition_frame("Mid.step", "formal(x)", "Sink.run", "sink", &[(sink, Some(0))]);
        builder.first_hop(instance, root);
        builder.graph_mut().add_extra_feature_to_propagate_up(deep, extra);

        let graph = builder.into_graph();
        let mut step = PropagateExtraFeaturesToInstances::new();
        let graph = step.run(graph, &mut Summary::default()).unwrap();

        let marker = graph
            .get_shared_text(SharedTextKind::Feature, MARKER_FEATURE)
            .unwrap();
        let instance_texts = graph.issue_instance_shared_texts(instance).collect::<Vec<_>>();
        assert!(instance_texts.contains(&extra));
        assert!(instance_texts.contains(&marker));
    }

    #[test]
    fn inlines_subtrace_features_onto_parent_frames() {
        let mut builder = FakeGraphBuilder::new();
        let sink = builder.sink("RCE");
        let extra = builder.feature("subtrace-detail");
        let issue = builder.issue("Entry.main", 6015);
        let instance = builder.instance(issue, "src/entry.py", "Entry.main");
        let parent = builder.precondition_frame("Entry.main", "root", "Mid.step", "formal(x)", &[(sink, Some(1))]);
        builder.first_hop(instance, parent);
        // A subtrace hanging off the parent frame.
        let subtrace_root = builder.precondition_frame(
            "Sub.entry",
            "subtrace_root",
            "Sub.sink",
            "sink",
            &[(sink, Some(0))],
        );
        builder.annotation(parent, &[subtrace_root]);
        builder
            .graph_mut()
            .add_extra_feature_to_propagate_up(subtrace_root, extra);

        let graph = builder.into_graph();
        let mut step = PropagateExtraFeaturesToInstances::new();
        let graph = step.run(graph, &mut Summary::default()).unwrap();

        // Inlined onto the parent with depth 0 ...
        assert_eq!(
            graph
                .trace_frame_leaf_assoc(parent)
                .find(|(leaf, _)| *leaf == extra)
                .unwrap()
                .1,
            Some(0)
        );
        // ... and carried on from the parent up to the instance.
        assert!(
            graph
                .issue_instance_shared_texts(instance)
                .any(|text| text == extra)
        );
    }
}
