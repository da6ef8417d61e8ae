use std::collections::VecDeque;

use anyhow::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use taintpost_graph::{
    FrameId, InstanceId, SharedTextId, SharedTextKind, SourceLocation, TraceFrame, TraceGraph,
    TraceKind,
};
use tracing::info;

use crate::{PipelineStep, summary::Summary};

/// One full-flow / partial-flow pairing: partial issues share the given
/// transform with the longer full flow and get breadcrumb-marked where the
/// flows touch.
#[derive(Clone, Debug)]
pub struct PartialFlowRule {
    pub full_issue_code: u32,
    pub partial_issue_code: u32,
    pub full_issue_transform: String,
    /// Whether the partial flow is a prefix of the full flow (transform on
    /// the sink side) rather than a suffix (transform on the source side).
    pub is_prefix_flow: bool,
    pub feature: String,
}

/// An issue-code-agnostic identifier for a call site, used to associate
/// frames between a full flow and a partial flow. The callee location is
/// distinctive enough that the callee id is unnecessary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct FrameKey {
    caller_id: SharedTextId,
    callee_location: SourceLocation,
}

impl FrameKey {
    fn from_frame(frame: &TraceFrame) -> Self {
        Self {
            caller_id: frame.caller_id,
            callee_location: frame.callee_location,
        }
    }
}

/// Frame keys where the relevant transforms were seen in full flows, per
/// partial issue code.
type FullFlowContext = FxHashMap<u32, FxHashSet<FrameKey>>;

/// Transforms named by a frame's leaf mapping. A transform kind reads
/// `T1:T2@T3:T4:S`: the colon-separated tokens before `@` are the local
/// transforms (applied at this frame), the rest up to the trailing leaf kind
/// are global. `local_only` restricts the result to the former.
fn frame_transforms(graph: &TraceGraph, frame: &TraceFrame, local_only: bool) -> FxHashSet<String> {
    let mut transforms = FxHashSet::default();
    for mapping in &frame.leaf_mapping {
        let unparsed = graph.shared_text(mapping.transform).contents.as_str();
        if let Some((local, global)) = unparsed.split_once('@') {
            transforms.extend(local.split(':').map(str::to_owned));
            if !local_only {
                let tokens: Vec<&str> = global.split(':').collect();
                transforms.extend(
                    tokens[..tokens.len().saturating_sub(1)]
                        .iter()
                        .map(|token| (*token).to_owned()),
                );
            }
        } else if !local_only {
            let tokens: Vec<&str> = unparsed.split(':').collect();
            transforms.extend(
                tokens[..tokens.len().saturating_sub(1)]
                    .iter()
                    .map(|token| (*token).to_owned()),
            );
        }
    }
    transforms
}

/// Given a list of full-flow/partial-flow rules, marks all frames in the
/// partial flows that have a corresponding full flow with a breadcrumb.
pub struct MarkPartialFlows {
    rules: Vec<PartialFlowRule>,
    partial_flow_frames: usize,
}

impl MarkPartialFlows {
    pub fn new(rules: Vec<PartialFlowRule>) -> Self {
        Self {
            rules,
            partial_flow_frames: 0,
        }
    }

    /// Phase 1: per partial code, collect the frame keys where the full
    /// flows exhibit the rule's transform.
    fn build_full_flow_context(
        &self,
        graph: &TraceGraph,
        issues: &FxHashMap<u32, Vec<InstanceId>>,
    ) -> FullFlowContext {
        let mut context = FullFlowContext::default();
        let mut visited: FxHashSet<FrameId> = FxHashSet::default();
        for rule in &self.rules {
            let Some(instances) = issues.get(&rule.full_issue_code) else {
                continue;
            };
            let keys = context.entry(rule.partial_issue_code).or_default();
            for instance_id in instances {
                self.collect_candidates_from_full_issue(graph, *instance_id, rule, keys, &mut visited);
            }
        }
        context
    }

    fn collect_candidates_from_full_issue(
        &self,
        graph: &TraceGraph,
        instance_id: InstanceId,
        rule: &PartialFlowRule,
        keys: &mut FxHashSet<FrameKey>,
        visited: &mut FxHashSet<FrameId>,
    ) {
        let mut postcondition_frames = Vec::new();
        let mut precondition_frames = Vec::new();
        for frame_id in graph.issue_instance_trace_frames(instance_id) {
            match graph.trace_frame(frame_id).kind {
                TraceKind::Postcondition => postcondition_frames.push(frame_id),
                TraceKind::Precondition => precondition_frames.push(frame_id),
            }
        }

        // For a prefix flow, a transform anywhere on the sink side marks the
        // source-side first hops (the partial flow ends where the full
        // flow's source half ends), and the source half is searched for
        // local transforms. Suffix flows are the mirror image.
        let (checked, marked) = if rule.is_prefix_flow {
            (&precondition_frames, &postcondition_frames)
        } else {
            (&postcondition_frames, &precondition_frames)
        };
        for frame_id in checked {
            let transforms = frame_transforms(graph, graph.trace_frame(*frame_id), false);
            if transforms.contains(&rule.full_issue_transform) {
                for marked_frame in marked {
                    keys.insert(FrameKey::from_frame(graph.trace_frame(*marked_frame)));
                }
                break;
            }
        }
        self.collect_candidates_by_searching(graph, marked, &rule.full_issue_transform, keys, visited);
    }

    /// BFS through the subgraph induced by the initial frames; every visited
    /// frame whose local transforms include the transform contributes its key.
    fn collect_candidates_by_searching(
        &self,
        graph: &TraceGraph,
        initial_frames: &[FrameId],
        transform: &str,
        keys: &mut FxHashSet<FrameKey>,
        visited: &mut FxHashSet<FrameId>,
    ) {
        let mut queue: VecDeque<FrameId> = initial_frames.iter().copied().collect();
        while let Some(frame_id) = queue.pop_front() {
            if !visited.insert(frame_id) {
                continue;
            }
            let frame = graph.trace_frame(frame_id);
            queue.extend(graph.get_next_trace_frames(frame));

            if frame_transforms(graph, frame, true).contains(transform) {
                keys.insert(FrameKey::from_frame(frame));
            }
        }
    }

    /// Phase 2: DFS over a partial instance's trace subgraph; a frame whose
    /// key is in the context is marked, and the mark propagates up the
    /// return edges so the instance learns whether anything in its subtree
    /// was marked.
    fn mark_subtree(
        &mut self,
        graph: &mut TraceGraph,
        start: FrameId,
        feature: SharedTextId,
        context: &FxHashSet<FrameKey>,
        visited: &mut FxHashMap<FrameId, bool>,
    ) -> bool {
        // Non-recursive DFS: each frame is pushed twice, first to queue its
        // children and a second time (children_processed) to fold their
        // results into its own.
        let mut stack: Vec<(FrameId, bool)> = vec![(start, false)];
        while let Some((frame_id, children_processed)) = stack.pop() {
            if !children_processed {
                if visited.contains_key(&frame_id) {
                    continue;
                }
                // Placeholder so cycles back into this frame do not requeue
                // it; the post pass overwrites it with the real value.
                visited.insert(frame_id, false);
                stack.push((frame_id, true));
                let frame = graph.trace_frame(frame_id);
                for next in graph.get_next_trace_frames(frame) {
                    stack.push((next, false));
                }
            } else {
                let frame = graph.trace_frame(frame_id);
                let key = FrameKey::from_frame(frame);
                let successors = graph.get_next_trace_frames(frame);
                let mut marked = false;
                if context.contains(&key) {
                    graph.add_trace_frame_leaf_assoc(frame_id, feature, None);
                    self.partial_flow_frames += 1;
                    marked = true;
                }
                for successor in successors {
                    marked = marked || visited.get(&successor).copied().unwrap_or(false);
                }
                visited.insert(frame_id, marked);
            }
        }
        visited.get(&start).copied().unwrap_or(false)
    }

    fn mark_partial_flows(
        &mut self,
        graph: &mut TraceGraph,
        issues: &FxHashMap<u32, Vec<InstanceId>>,
        context: &FullFlowContext,
    ) {
        let mut marked_partial_codes: FxHashSet<u32> = FxHashSet::default();
        let rules = self.rules.clone();
        for rule in &rules {
            if !marked_partial_codes.insert(rule.partial_issue_code) {
                continue;
            }
            let Some(instances) = issues.get(&rule.partial_issue_code) else {
                continue;
            };
            let Some(keys) = context.get(&rule.partial_issue_code) else {
                continue;
            };
            let feature = graph.get_or_add_shared_text(SharedTextKind::Feature, &rule.feature);
            let mut visited: FxHashMap<FrameId, bool> = FxHashMap::default();
            for instance_id in instances {
                let first_hops: Vec<FrameId> =
                    graph.issue_instance_trace_frames(*instance_id).collect();
                let mut marked = false;
                for frame_id in first_hops {
                    marked =
                        self.mark_subtree(graph, frame_id, feature, keys, &mut visited) || marked;
                }
                if marked {
                    graph.add_issue_instance_shared_text_assoc(*instance_id, feature);
                }
            }
        }
    }
}

impl PipelineStep for MarkPartialFlows {
    type In = TraceGraph;
    type Out = TraceGraph;

    fn name(&self) -> &'static str {
        "MarkPartialFlows"
    }

    fn run(&mut self, mut graph: TraceGraph, _summary: &mut Summary) -> Result<TraceGraph> {
        if self.rules.is_empty() {
            return Ok(graph);
        }

        info!("marking partial flows");
        let mut relevant_codes: FxHashSet<u32> = FxHashSet::default();
        for rule in &self.rules {
            relevant_codes.insert(rule.full_issue_code);
            relevant_codes.insert(rule.partial_issue_code);
        }

        let mut issues: FxHashMap<u32, Vec<InstanceId>> = FxHashMap::default();
        for instance in graph.issue_instances() {
            let code = graph.issue(instance.issue_id).code;
            if relevant_codes.contains(&code) {
                issues.entry(code).or_default().push(instance.id);
            }
        }

        let context = self.build_full_flow_context(&graph, &issues);
        info!("built full flow context");
        self.mark_partial_flows(&mut graph, &issues, &context);
        info!("added partial flow features to {} frames", self.partial_flow_frames);
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use taintpost_graph::{FxIndexSet, LeafMapping, testing::FakeGraphBuilder};

    use super::*;

    fn rule() -> PartialFlowRule {
        PartialFlowRule {
            full_issue_code: 1001,
            partial_issue_code: 1002,
            full_issue_transform: "Tx".to_owned(),
            is_prefix_flow: false,
            feature: "partial-flow-of-1001".to_owned(),
        }
    }

    #[test]
    fn suffix_flow_marks_matching_partial_subtrees() {
        let mut builder = FakeGraphBuilder::new();
        let sink = builder.sink("RCE");
        let transformed = builder.sink("Tx@RCE");

        // Full flow (code 1001): the precondition-side subgraph contains a
        // frame at key K whose local transform is Tx.
        let full_issue = builder.issue("Full.entry", 1001);
        let full_instance = builder.instance(full_issue, "src/full.py", "Full.entry");
        let full_root =
            builder.precondition_frame("Full.entry", "root", "Shared.step", "formal(x)", &[(sink, Some(1))]);
        let mapping: FxIndexSet<LeafMapping> = [LeafMapping {
            caller_leaf: transformed,
            callee_leaf: sink,
            transform: transformed,
        }]
        .into_iter()
        .collect();
        let transform_frame = builder.frame_with_mapping(
            TraceKind::Precondition,
            "lib/code.py",
            "Shared.step",
            "formal(x)",
            "Deep.sink",
            "sink",
            mapping,
        );
        builder.first_hop(full_instance, full_root);

        // Partial flow (code 1002) reaching the same call site.
        let partial_issue = builder.issue("Partial.entry", 1002);
        let partial_instance = builder.instance(partial_issue, "src/partial.py", "Partial.entry");
        let partial_root =
            builder.precondition_frame("Partial.entry", "root", "Shared.step", "formal(x)", &[(sink, Some(1))]);
        builder.first_hop(partial_instance, partial_root);
        // Another partial instance that never reaches the key.
        let unrelated_instance = builder.instance(partial_issue, "src/other.py", "Other.entry");
        let unrelated_root =
            builder.precondition_frame("Other.entry", "root", "Elsewhere.step", "formal(y)", &[(sink, Some(1))]);
        builder.first_hop(unrelated_instance, unrelated_root);

        let graph = builder.into_graph();
        let mut step = MarkPartialFlows::new(vec![rule()]);
        let graph = step.run(graph, &mut Summary::default()).unwrap();

        let feature = graph
            .get_shared_text(SharedTextKind::Feature, "partial-flow-of-1001")
            .expect("feature interned");
        // The frame at the shared key is marked ...
        assert!(
            graph
                .trace_frame_leaf_assoc(transform_frame)
                .any(|(leaf, _)| leaf == feature)
        );
        // ... and the partial instance whose subtree contains it gets the
        // breadcrumb, while the unrelated one does not.
        assert!(
            graph
                .issue_instance_shared_texts(partial_instance)
                .any(|text| text == feature)
        );
        assert!(
            !graph
                .issue_instance_shared_texts(unrelated_instance)
                .any(|text| text == feature)
        );
    }

    #[test]
    fn no_rules_is_a_no_op() {
        let builder = FakeGraphBuilder::new();
        let graph = builder.into_graph();
        let texts_before = graph.shared_text_count();
        let mut step = MarkPartialFlows::new(Vec::new());
        let graph = step.run(graph, &mut Summary::default()).unwrap();
        assert_eq!(graph.shared_text_count(), texts_before);
    }
}
