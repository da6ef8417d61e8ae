use std::collections::VecDeque;

use anyhow::Result;
use rustc_hash::FxHashSet;
use taintpost_graph::{
    FrameId, SharedTextId, SharedTextKind, TraceGraph, TraceKind,
    traversal::{FeatureMemo, KindMap, next_kind_map, seed_kind_map},
};
use tracing::info;

use crate::{PipelineStep, summary::Summary};

/// For all issues matching a code, propagates the instance features matching
/// a pattern to all reachable leaf frames of the given frame kind. Each
/// propagated feature lands as a `context-` feature on the leaf frame and on
/// root frames sharing the same call site.
pub struct PropagateContextToLeafFrames {
    issue_code: u32,
    feature_pattern: String,
    frame_kind: TraceKind,
    visited: FeatureMemo,
    leaf_features_added: usize,
    leaf_frames: usize,
}

impl PropagateContextToLeafFrames {
    pub fn new(issue_code: u32, feature_pattern: impl Into<String>, frame_kind: TraceKind) -> Self {
        Self {
            issue_code,
            feature_pattern: feature_pattern.into(),
            frame_kind,
            visited: FeatureMemo::default(),
            leaf_features_added: 0,
            leaf_frames: 0,
        }
    }

    fn propagate_instance(&mut self, graph: &TraceGraph, instance_id: taintpost_graph::InstanceId) {
        let features: FxHashSet<SharedTextId> = graph
            .issue_instance_shared_texts_by_kind(instance_id, SharedTextKind::Feature)
            .into_iter()
            .filter(|feature| {
                graph
                    .shared_text(*feature)
                    .contents
                    .contains(&self.feature_pattern)
            })
            .collect();
        if features.is_empty() {
            return;
        }

        let mut queue: VecDeque<(FrameId, KindMap)> = graph
            .issue_instance_trace_frames(instance_id)
            .filter(|frame| graph.trace_frame(*frame).kind == self.frame_kind)
            .map(|frame| {
                let kinds = graph.trace_frame(frame).caller_leaf_kinds();
                (frame, seed_kind_map(kinds, &features))
            })
            .collect();

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
            for next_id in graph.get_next_trace_frames(frame) {
                let next = graph.trace_frame(next_id);
                queue.push_back((next_id, next_kind_map(&next.leaf_mapping, &kind_map)));
            }
        }
    }

    /// `always-` is a modality of the providing flow, not of the context; the
    /// contextual feature is `context-` plus the bare name.
    fn contextual_feature_name(original: &str) -> String {
        format!("context-{}", original.strip_prefix("always-").unwrap_or(original))
    }

    fn add_contextual_features_to_frame(
        &mut self,
        graph: &mut TraceGraph,
        frame: FrameId,
        features: &FxHashSet<SharedTextId>,
    ) {
        for feature in features {
            let name = Self::contextual_feature_name(&graph.shared_text(*feature).contents);
            let contextual = graph.get_or_add_shared_text(SharedTextKind::Feature, &name);
            graph.add_trace_frame_leaf_assoc(frame, contextual, None);
            self.leaf_features_added += 1;
        }
    }

    /// Root frames are not shared between the context-providing and the
    /// context-needing flows, so the feature is also applied to frames at
    /// the same call site when either side sits at a root.
    fn add_contextual_features_to_neighbor_frames(
        &mut self,
        graph: &mut TraceGraph,
        frame_id: FrameId,
        features: &FxHashSet<SharedTextId>,
    ) {
        let frame = graph.trace_frame(frame_id);
        let (kind, caller_id, caller_port) =
            (frame.kind, frame.caller_id, frame.caller_port.clone());
        let (callee_id, callee_port, callee_location) = (
            frame.callee_id,
            frame.callee_port.clone(),
            frame.callee_location,
        );
        let frame_is_root = graph.is_root_port(&caller_port);

        let candidates: Vec<FrameId> = graph
            .get_all_trace_frames_from_caller(kind, caller_id)
            .into_iter()
            .filter(|candidate| {
                let candidate = graph.trace_frame(*candidate);
                candidate.callee_location == callee_location
                    && candidate.callee_port == callee_port
                    && candidate.callee_id == callee_id
            })
            .collect();
        for candidate in candidates {
            let candidate_is_root = graph.is_root_port(&graph.trace_frame(candidate).caller_port);
            if candidate_is_root || frame_is_root {
                self.add_contextual_features_to_frame(graph, candidate, features);
            }
        }
    }
}

impl PipelineStep for PropagateContextToLeafFrames {
    type In = TraceGraph;
    type Out = TraceGraph;

    fn name(&self) -> &'static str {
        "PropagateContextToLeafFrames"
    }

    fn run(&mut self, mut graph: TraceGraph, _summary: &mut Summary) -> Result<TraceGraph> {
        info!(
            "propagating feature {} in issues {} to {:?} leaves",
            self.feature_pattern, self.issue_code, self.frame_kind,
        );

        for instance_id in graph.issue_instance_ids() {
            let instance = graph.issue_instance(instance_id);
            if graph.issue(instance.issue_id).code == self.issue_code {
                self.propagate_instance(&graph, instance_id);
            }
        }

        // Rewrite the visited leaf frames (and their call-site neighbors).
        let mut leaf_frames: Vec<(FrameId, FxHashSet<SharedTextId>)> = Vec::new();
        for (frame_id, kind_state) in self.visited.visited() {
            if graph.is_leaf_port(&graph.trace_frame(frame_id).callee_port) {
                let features = kind_state
                    .values()
                    .flat_map(|texts| texts.iter().copied())
                    .collect();
                leaf_frames.push((frame_id, features));
            }
        }
        for (frame_id, features) in leaf_frames {
            self.leaf_frames += 1;
            self.add_contextual_features_to_frame(&mut graph, frame_id, &features);
            self.add_contextual_features_to_neighbor_frames(&mut graph, frame_id, &features);
        }
        info!(
            "added {} features to {} trace frames",
            self.leaf_features_added, self.leaf_frames,
        );

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use taintpost_graph::testing::FakeGraphBuilder;

    use super::*;

    #[test]
    fn renames_and_applies_to_leaf_and_neighbor_frames() {
        let mut builder = FakeGraphBuilder::new();
        let sink = builder.sink("RCE");
        let feature = builder.feature("always-debug");
        let issue = builder.issue("Provider.entry", 6015);
        let instance = builder.instance(issue, "src/provider.py", "Provider.entry");
        builder.instance_feature(instance, feature);

        let hop = builder.precondition_frame("Provider.entry", "root", "Mid.step", "formal(x)", &[(sink, Some(1))]);
        let leaf = builder.precondition_frame("Mid.step", "formal(x)", "Sink.run", "sink", &[(sink, Some(0))]);
        builder.first_hop(instance, hop);

        let call_site = builder.graph_mut().trace_frame(leaf).callee_location;
        // A root frame of some other issue at the same call site as `leaf`.
        let neighbor = builder.frame(
            TraceKind::Precondition,
            "lib/code.py",
            "Mid.step",
            "root",
            "Sink.run",
            "sink",
            &[(sink, Some(0))],
        );
        builder.graph_mut().trace_frame_mut(neighbor).callee_location = call_site;
        // Same call site but neither side is a root: not eligible.
        let bystander = builder.frame(
            TraceKind::Precondition,
            "lib/code.py",
            "Mid.step",
            "formal(other)",
            "Sink.run",
            "sink",
            &[(sink, Some(0))],
        );
        builder.graph_mut().trace_frame_mut(bystander).callee_location = call_site;

        let graph = builder.into_graph();
        let mut step = PropagateContextToLeafFrames::new(6015, "always-debug", TraceKind::Precondition);
        let graph = step.run(graph, &mut Summary::default()).unwrap();

        let context = graph
            .get_shared_text(SharedTextKind::Feature, "context-debug")
            .expect("contextual feature interned");
        let carries = |frame| {
            graph
                .trace_frame_leaf_assoc(frame)
                .any(|(leaf_id, _)| leaf_id == context)
        };
        assert!(carries(leaf));
        assert!(carries(neighbor));
        assert!(!carries(bystander));
        // The intermediate hop is visited but not a leaf frame.
        assert!(!carries(hop));
    }
}
