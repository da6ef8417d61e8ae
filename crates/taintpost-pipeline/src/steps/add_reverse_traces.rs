use std::collections::VecDeque;

use anyhow::Result;
use rustc_hash::FxHashMap;
use taintpost_graph::{FrameId, LeafMapping, SharedTextKind, TraceGraph};
use tracing::info;

use crate::{PipelineStep, summary::Summary};

/// For all issues with the given code carrying the original leaf, adds the
/// new leaf along all reachable forward traces. The recorded depth grows as
/// the frames get further away (in the caller→callee direction) from the
/// issue frame, which makes the callee→caller direction queryable.
pub struct AddReverseTraces {
    code: u32,
    orig_leaf_name: String,
    orig_leaf_kind: SharedTextKind,
    new_leaf_name: String,
    new_leaf_kind: SharedTextKind,
}

impl AddReverseTraces {
    pub fn new(
        code: u32,
        orig_leaf_name: impl Into<String>,
        orig_leaf_kind: SharedTextKind,
        new_leaf_name: impl Into<String>,
        new_leaf_kind: SharedTextKind,
    ) -> Self {
        Self {
            code,
            orig_leaf_name: orig_leaf_name.into(),
            orig_leaf_kind,
            new_leaf_name: new_leaf_name.into(),
            new_leaf_kind,
        }
    }
}

impl PipelineStep for AddReverseTraces {
    type In = TraceGraph;
    type Out = TraceGraph;

    fn name(&self) -> &'static str {
        "AddReverseTraces"
    }

    fn run(&mut self, mut graph: TraceGraph, _summary: &mut Summary) -> Result<TraceGraph> {
        let Some(orig_leaf) = graph.get_shared_text(self.orig_leaf_kind, &self.orig_leaf_name)
        else {
            return Ok(graph);
        };

        let mut first_hops: Vec<FrameId> = Vec::new();
        for instance in graph.issue_instances() {
            if graph.issue(instance.issue_id).code == self.code {
                first_hops.extend(graph.issue_instance_trace_frames(instance.id));
            }
        }

        // Explore forward (caller → callee; issue → leaf), recording the
        // minimum hop depth at which each frame is reached.
        let mut queue: VecDeque<(FrameId, u32)> = first_hops
            .into_iter()
            .filter(|frame| graph.trace_frame_leaf_ids(*frame).any(|leaf| leaf == orig_leaf))
            .map(|frame| (frame, 0))
            .collect();
        let mut depth_by_frame: FxHashMap<FrameId, u32> = FxHashMap::default();
        while let Some((frame_id, depth)) = queue.pop_front() {
            // Skip repeat frames unless we arrived by a shorter path.
            match depth_by_frame.get(&frame_id) {
                Some(recorded) if depth >= *recorded => continue,
                _ => {
                    depth_by_frame.insert(frame_id, depth);
                }
            }
            let frame = graph.trace_frame(frame_id);
            queue.extend(
                graph
                    .get_next_trace_frames(frame)
                    .into_iter()
                    .filter(|next| {
                        graph.trace_frame_leaf_ids(*next).any(|leaf| leaf == orig_leaf)
                    })
                    .map(|next| (next, depth + 1)),
            );
        }

        let new_leaf = graph.get_or_add_shared_text(self.new_leaf_kind, &self.new_leaf_name);
        info!(
            "adding {} \"{}\" leaves from issues with code {}",
            depth_by_frame.len(),
            self.new_leaf_name,
            self.code,
        );
        for (frame_id, depth) in depth_by_frame {
            if self.new_leaf_kind.is_taint_kind() {
                graph
                    .trace_frame_mut(frame_id)
                    .leaf_mapping
                    .insert(LeafMapping::identity(new_leaf));
            }
            graph.add_trace_frame_leaf_assoc(frame_id, new_leaf, Some(depth));
        }

        Ok(graph)
    }
}
