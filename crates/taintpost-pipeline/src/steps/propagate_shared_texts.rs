use std::collections::VecDeque;

use anyhow::Result;
use rustc_hash::FxHashSet;
use taintpost_graph::{
    FrameId, SharedTextId, SharedTextKind, TraceGraph, TraceKind,
    traversal::{KindMap, TextDistanceMemo, next_kind_map, seed_kind_map},
};
use tracing::info;

use crate::{PipelineStep, summary::Summary};

/// For all issues, propagates source kinds and features to all reachable
/// frames leading to sinks, and features to leaf (anchor) sinks.
pub struct PropagateSharedTexts {
    propagate_sources: bool,
    propagate_features: bool,
    visited: TextDistanceMemo,
}

impl PropagateSharedTexts {
    pub fn new(propagate_sources: bool, propagate_features: bool) -> Self {
        Self {
            propagate_sources,
            propagate_features,
            visited: TextDistanceMemo::default(),
        }
    }

    /// Propagates the source kinds and features of one issue instance to all
    /// reachable sink traces.
    fn propagate_instance(&mut self, graph: &TraceGraph, instance_id: taintpost_graph::InstanceId) {
        let features: FxHashSet<SharedTextId> = graph
            .issue_instance_shared_texts_by_kind(instance_id, SharedTextKind::Feature)
            .into_iter()
            .collect();

        let first_hops: Vec<FrameId> = graph.issue_instance_trace_frames(instance_id).collect();
        let mut traveling = features;
        for frame in &first_hops {
            let frame = graph.trace_frame(*frame);
            if frame.kind == TraceKind::Postcondition {
                traveling.extend(frame.caller_leaf_kinds());
            }
        }
        if traveling.is_empty() {
            return;
        }

        let initial_trace_length = graph
            .issue_instance(instance_id)
            .min_trace_length_to_sources
            .unwrap_or(0);
        let sink_frames = first_hops
            .into_iter()
            .filter(|frame| graph.trace_frame(*frame).kind == TraceKind::Precondition);

        let mut queue: VecDeque<(FrameId, KindMap, u32)> = sink_frames
            .map(|frame| {
                let kinds = graph.trace_frame(frame).caller_leaf_kinds();
                (frame, seed_kind_map(kinds, &traveling), initial_trace_length)
            })
            .collect();

        while let Some((frame_id, kind_map, trace_length)) = queue.pop_front() {
            if kind_map.is_empty() {
                continue;
            }
            let kind_map = self.visited.subtract(frame_id, trace_length, kind_map);
            if kind_map.is_empty() {
                continue;
            }
            self.visited.record(frame_id, trace_length, &kind_map, |text| {
                // Features do not get farther by hopping; pinning them at 0
                // avoids wasted work propagating distance decreases.
                graph.shared_text_kind(text) == SharedTextKind::Feature
            });

            let frame = graph.trace_frame(frame_id);
            for next_id in graph.get_next_trace_frames(frame) {
                let next = graph.trace_frame(next_id);
                queue.push_back((
                    next_id,
                    next_kind_map(&next.leaf_mapping, &kind_map),
                    trace_length + 1,
                ));
            }
        }
    }
}

impl PipelineStep for PropagateSharedTexts {
    type In = TraceGraph;
    type Out = TraceGraph;

    fn name(&self) -> &'static str {
        "PropagateSharedTexts"
    }

    fn run(&mut self, mut graph: TraceGraph, _summary: &mut Summary) -> Result<TraceGraph> {
        if !(self.propagate_sources || self.propagate_features) {
            return Ok(graph);
        }

        if self.propagate_sources {
            info!("propagating source kinds to sinks");
        }
        if self.propagate_features {
            info!("propagating features to anchor sinks");
        }

        for instance_id in graph.issue_instance_ids() {
            self.propagate_instance(&graph, instance_id);
        }

        // Turn the visited state into leaf assocs.
        let mut source_count = 0usize;
        let mut feature_count = 0usize;
        let mut frame_count = 0usize;
        for (frame_id, state) in self.visited.visited() {
            frame_count += 1;
            let is_anchor_port = graph.is_anchor_port(&graph.trace_frame(frame_id).callee_port);
            for lengths in state.values() {
                for (text, trace_length) in lengths {
                    match graph.shared_text_kind(*text) {
                        SharedTextKind::Source if self.propagate_sources => {
                            graph.add_trace_frame_leaf_assoc(frame_id, *text, Some(*trace_length));
                            source_count += 1;
                        }
                        SharedTextKind::Feature if self.propagate_features && is_anchor_port => {
                            graph.add_trace_frame_leaf_assoc(frame_id, *text, None);
                            feature_count += 1;
                        }
                        _ => {}
                    }
                }
            }
        }
        info!(
            "added {source_count} source kinds and {feature_count} features to {frame_count} trace \
             frames"
        );

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use taintpost_graph::testing::FakeGraphBuilder;

    use super::*;

    /// An issue with one postcondition (carrying the source kind) and a sink
    /// trace of two hops ending in an anchor port.
    fn fixture() -> (TraceGraph, SharedTextId, SharedTextId, FrameId, FrameId) {
        let mut builder = FakeGraphBuilder::new();
        let source = builder.source("UserControlled");
        let sink = builder.sink("RCE");
        let feature = builder.feature("always-via-cast");
        let issue = builder.issue("Entry.main", 6015);
        let instance = builder.instance_with(issue, "src/entry.py", "Entry.main", |instance| {
            instance.min_trace_length_to_sources = Some(2)
        });
        builder.instance_feature(instance, feature);

        let source_hop =
            builder.postcondition_frame("Entry.main", "root", "Source.get", "source", &[(source, Some(0))]);
        let sink_hop =
            builder.precondition_frame("Entry.main", "root", "Mid.step", "formal(x)", &[(sink, Some(1))]);
        let anchor_hop = builder.precondition_frame(
            "Mid.step",
            "formal(x)",
            "Sink.run",
            "anchor:formal(0)",
            &[(sink, Some(0))],
        );
        builder.first_hop(instance, source_hop);
        builder.first_hop(instance, sink_hop);
        (builder.into_graph(), source, feature, sink_hop, anchor_hop)
    }

    #[test]
    fn propagates_sources_with_distances() {
        let (graph, source, _, sink_hop, anchor_hop) = fixture();
        let mut step = PropagateSharedTexts::new(true, false);
        let graph = step.run(graph, &mut Summary::default()).unwrap();

        // Source kind lands on every visited sink frame with the hop count
        // offset by the instance's min trace length to sources.
        let depth = |frame| {
            graph
                .trace_frame_leaf_assoc(frame)
                .find(|(leaf, _)| *leaf == source)
                .map(|(_, depth)| depth)
        };
        assert_eq!(depth(sink_hop), Some(Some(2)));
        assert_eq!(depth(anchor_hop), Some(Some(3)));
    }

    #[test]
    fn propagates_features_to_anchor_frames_only() {
        let (graph, _, feature, sink_hop, anchor_hop) = fixture();
        let mut step = PropagateSharedTexts::new(false, true);
        let graph = step.run(graph, &mut Summary::default()).unwrap();

        let carries_feature = |frame| {
            graph
                .trace_frame_leaf_assoc(frame)
                .any(|(leaf, _)| leaf == feature)
        };
        assert!(!carries_feature(sink_hop));
        assert!(carries_feature(anchor_hop));
        // Feature assocs carry no depth.
        assert_eq!(
            graph
                .trace_frame_leaf_assoc(anchor_hop)
                .find(|(leaf, _)| *leaf == feature)
                .unwrap()
                .1,
            None
        );
    }

    #[test]
    fn disabled_switches_are_a_no_op() {
        let (graph, source, _, sink_hop, _) = fixture();
        let mut step = PropagateSharedTexts::new(false, false);
        let graph = step.run(graph, &mut Summary::default()).unwrap();
        // Only the ingested sink leaf, no propagated source.
        assert!(
            !graph
                .trace_frame_leaf_assoc(sink_hop)
                .any(|(leaf, _)| leaf == source)
        );
    }
}
