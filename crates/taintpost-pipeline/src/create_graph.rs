//! Assembly of the trace graph from parsed records.
//!
//! Issues become issue + instance pairs (deduplicated by handle), their
//! first-hop conditions become root frames, and the condition dictionaries
//! are materialized on demand by walking callee keys outward from the first
//! hops. Every leaf carried by a condition gets a leaf assoc at its parsed
//! distance and an identity mapping triple, so the kind flows through the
//! frame unchanged unless a transform says otherwise.

use anyhow::Result;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::info;

use taintpost_graph::{
    FrameReachability, FxIndexSet, InstanceId, IssueInstance, IssueStatus, LeafMapping, RunId,
    SharedTextKind, SourceLocation, TraceFrame, TraceFrameAnnotation, TraceGraph, TraceKind,
    TypeInterval,
    issue::{FixInfo, Issue, PurgeStatus, Run},
};

use crate::{
    PipelineStep,
    record::{
        ConditionKey, ConditionRecord, IssueConditionRecord, IssueRecord, IssuesAndFrames,
        TraceAnnotationRecord, flatten_features,
    },
    summary::Summary,
};

/// Pipeline stage: grouped parse records in, populated trace graph out.
#[derive(Default)]
pub struct CreateGraph {
    job_id: Option<String>,
}

impl CreateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_id(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
        }
    }
}

impl PipelineStep for CreateGraph {
    type In = IssuesAndFrames;
    type Out = TraceGraph;

    fn name(&self) -> &'static str {
        "CreateGraph"
    }

    fn run(&mut self, input: IssuesAndFrames, _summary: &mut Summary) -> Result<TraceGraph> {
        let mut graph = TraceGraph::new();
        let run_id = graph.mint_run_id();
        graph.add_run(Run {
            id: run_id,
            job_id: self.job_id.clone(),
        })?;

        let mut builder = GraphBuilder {
            graph,
            run_id,
            entries: &input,
            expanded: FxHashMap::default(),
        };
        for issue in &input.issues {
            builder.add_issue(issue)?;
        }

        let graph = builder.graph;
        info!(
            issues = graph.issue_count(),
            instances = graph.issue_instance_count(),
            frames = graph.trace_frame_count(),
            texts = graph.shared_text_count(),
            "populated trace graph"
        );
        Ok(graph)
    }
}

struct GraphBuilder<'a> {
    graph: TraceGraph,
    run_id: RunId,
    entries: &'a IssuesAndFrames,
    /// Caller keys whose conditions were already materialized, with the
    /// frames they produced.
    expanded: FxHashMap<(TraceKind, String, String), Vec<taintpost_graph::FrameId>>,
}

impl GraphBuilder<'_> {
    fn add_issue(&mut self, record: &IssueRecord) -> Result<()> {
        let callable_id = self
            .graph
            .get_or_add_shared_text(SharedTextKind::Callable, &record.callable);
        let filename_id = self
            .graph
            .get_or_add_shared_text(SharedTextKind::Filename, &record.filename);
        let message_id = self
            .graph
            .get_or_add_shared_text(SharedTextKind::Message, &record.message);

        let (issue_id, is_new_issue) = match self.graph.issue_by_handle(&record.handle) {
            Some(existing) => (existing, false),
            None => {
                let id = self.graph.mint_issue_id();
                self.graph.add_issue(Issue {
                    id,
                    handle: record.handle.clone(),
                    code: record.code,
                    callable_id,
                    status: IssueStatus::Uncategorized,
                    severity: None,
                    detected_time: 0,
                    first_instance_id: None,
                })?;
                (id, true)
            }
        };

        let min_trace_length_to_sources = record
            .initial_sources
            .iter()
            .map(|leaf| leaf.distance())
            .min();
        let min_trace_length_to_sinks = record.final_sinks.iter().map(|leaf| leaf.distance()).min();

        let instance_id = self.graph.mint_instance_id();
        self.graph.add_issue_instance(IssueInstance {
            id: instance_id,
            issue_id,
            run_id: self.run_id,
            filename_id,
            callable_id,
            message_id,
            location: SourceLocation::new(record.line, record.start, record.end),
            fix_info_id: None,
            is_new_issue,
            min_trace_length_to_sources,
            min_trace_length_to_sinks,
            callable_count: 0,
            purge_status: PurgeStatus::None,
        })?;

        if let Some(fix_info) = &record.fix_info {
            let fix_info_id = self.graph.mint_fix_info_id();
            self.graph.add_fix_info(FixInfo {
                id: fix_info_id,
                contents: fix_info.to_string(),
            })?;
            self.graph.add_issue_instance_fix_info(instance_id, fix_info_id);
        }

        for feature in flatten_features(&record.features) {
            let feature_id = self
                .graph
                .get_or_add_shared_text(SharedTextKind::Feature, &feature);
            self.graph
                .add_issue_instance_shared_text_assoc(instance_id, feature_id);
        }
        self.add_issue_leaves(instance_id, record);

        for condition in &record.preconditions {
            self.add_first_hop_condition(TraceKind::Precondition, record, condition, instance_id)?;
        }
        for condition in &record.postconditions {
            self.add_first_hop_condition(TraceKind::Postcondition, record, condition, instance_id)?;
        }

        // Analyzers may also emit per-issue conditions keyed by handle.
        let handle_key = ConditionKey::Handle(record.handle.clone());
        for kind in [TraceKind::Precondition, TraceKind::Postcondition] {
            let conditions = match kind {
                TraceKind::Precondition => self.entries.preconditions.get(&handle_key),
                TraceKind::Postcondition => self.entries.postconditions.get(&handle_key),
            };
            for condition in conditions.into_iter().flatten().cloned().collect::<Vec<_>>() {
                let frame_id = self.add_condition_frame(kind, &condition)?;
                self.graph
                    .add_issue_instance_trace_frame_assoc(instance_id, frame_id);
                self.expand_from(kind, condition.callee.clone(), condition.callee_port.clone())?;
            }
        }

        Ok(())
    }

    fn add_issue_leaves(&mut self, instance_id: InstanceId, record: &IssueRecord) {
        for (leaves, kind, detail_kind) in [
            (
                &record.initial_sources,
                SharedTextKind::Source,
                SharedTextKind::SourceDetail,
            ),
            (
                &record.final_sinks,
                SharedTextKind::Sink,
                SharedTextKind::SinkDetail,
            ),
        ] {
            for leaf in leaves {
                let kind_id = self.graph.get_or_add_shared_text(kind, leaf.kind());
                self.graph
                    .add_issue_instance_shared_text_assoc(instance_id, kind_id);
                let detail_id = self
                    .graph
                    .get_or_add_shared_text(detail_kind, leaf.callable());
                self.graph
                    .add_issue_instance_shared_text_assoc(instance_id, detail_id);
            }
        }
    }

    fn add_first_hop_condition(
        &mut self,
        kind: TraceKind,
        issue: &IssueRecord,
        condition: &IssueConditionRecord,
        instance_id: InstanceId,
    ) -> Result<()> {
        let caller_port = condition.root_port.clone().unwrap_or_else(|| "root".to_owned());
        let frame_id = self.build_frame(
            kind,
            &issue.callable,
            &caller_port,
            &condition.callee,
            &condition.port,
            condition.location.into(),
            &issue.filename,
            &condition.leaves,
            condition.type_interval.as_ref().map(|interval| TypeInterval {
                lower: interval.start,
                upper: interval.finish,
                preserves_type_context: interval.preserves_type_context,
            }),
            condition.titos.iter().map(|tito| (*tito).into()).collect(),
            &condition.features,
            &condition.annotations,
        )?;
        self.graph
            .add_issue_instance_trace_frame_assoc(instance_id, frame_id);
        self.expand_from(kind, condition.callee.clone(), condition.port.clone())?;
        Ok(())
    }

    fn add_condition_frame(
        &mut self,
        kind: TraceKind,
        condition: &ConditionRecord,
    ) -> Result<taintpost_graph::FrameId> {
        self.build_frame(
            kind,
            &condition.caller,
            &condition.caller_port,
            &condition.callee,
            &condition.callee_port,
            condition.callee_location.into(),
            &condition.filename,
            &condition.leaves,
            condition.type_interval.as_ref().map(|interval| TypeInterval {
                lower: interval.start,
                upper: interval.finish,
                preserves_type_context: interval.preserves_type_context,
            }),
            condition.titos.iter().map(|tito| (*tito).into()).collect(),
            &condition.features,
            &condition.annotations,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_frame(
        &mut self,
        kind: TraceKind,
        caller: &str,
        caller_port: &str,
        callee: &str,
        callee_port: &str,
        callee_location: SourceLocation,
        filename: &str,
        leaves: &[crate::record::LeafRecord],
        type_interval: Option<TypeInterval>,
        titos: SmallVec<[SourceLocation; 4]>,
        features: &[crate::record::TraceFeatureEntry],
        annotations: &[TraceAnnotationRecord],
    ) -> Result<taintpost_graph::FrameId> {
        let leaf_kind = match kind {
            TraceKind::Precondition => SharedTextKind::Sink,
            TraceKind::Postcondition => SharedTextKind::Source,
        };

        let caller_id = self.graph.get_or_add_shared_text(SharedTextKind::Callable, caller);
        let callee_id = self.graph.get_or_add_shared_text(SharedTextKind::Callable, callee);
        let filename_id = self
            .graph
            .get_or_add_shared_text(SharedTextKind::Filename, filename);

        let mut leaf_mapping = FxIndexSet::default();
        let mut leaf_assocs = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            let leaf_id = self.graph.get_or_add_shared_text(leaf_kind, leaf.kind());
            leaf_mapping.insert(LeafMapping::identity(leaf_id));
            leaf_assocs.push((leaf_id, Some(leaf.distance())));
        }

        let frame_id = self.graph.mint_frame_id();
        self.graph.add_trace_frame(TraceFrame {
            id: frame_id,
            kind,
            caller_id,
            caller_port: caller_port.to_owned(),
            callee_id,
            callee_port: callee_port.to_owned(),
            callee_location,
            filename_id,
            run_id: self.run_id,
            type_interval,
            titos,
            reachability: FrameReachability::Unreachable,
            leaf_mapping,
        })?;

        for (leaf_id, depth) in leaf_assocs {
            self.graph.add_trace_frame_leaf_assoc(frame_id, leaf_id, depth);
        }
        for feature in features {
            let feature_id = self
                .graph
                .get_or_add_shared_text(SharedTextKind::Feature, feature.name());
            self.graph.add_trace_frame_leaf_assoc(frame_id, feature_id, None);
        }
        for annotation in annotations {
            self.add_annotation(kind, frame_id, annotation)?;
        }
        Ok(frame_id)
    }

    fn add_annotation(
        &mut self,
        kind: TraceKind,
        frame_id: taintpost_graph::FrameId,
        record: &TraceAnnotationRecord,
    ) -> Result<()> {
        let leaf_kind = match kind {
            TraceKind::Precondition => SharedTextKind::Sink,
            TraceKind::Postcondition => SharedTextKind::Source,
        };
        let leaf_id = record
            .leaf_kind
            .as_ref()
            .map(|leaf| self.graph.get_or_add_shared_text(leaf_kind, leaf));

        let annotation_id = self.graph.mint_annotation_id();
        self.graph.add_trace_annotation(TraceFrameAnnotation {
            id: annotation_id,
            frame_id,
            location: record.location.into(),
            kind: Some(record.kind.clone()),
            message: record.msg.clone(),
            leaf_id,
            link: record.link.clone(),
            trace_key: record.trace_key.clone(),
        })?;

        // The subtrace roots are the conditions emitted under the referenced
        // caller key; materialize them and hook them onto the annotation.
        for subtrace in &record.subtraces {
            self.expand_from(kind, subtrace.callee.clone(), subtrace.port.clone())?;
            let frames = self
                .expanded
                .get(&(kind, subtrace.callee.clone(), subtrace.port.clone()))
                .cloned()
                .unwrap_or_default();
            for subtrace_frame in frames {
                self.graph
                    .add_trace_frame_annotation_trace_frame_assoc(annotation_id, subtrace_frame);
            }
        }
        Ok(())
    }

    /// Materializes the conditions reachable from a callee key, walking
    /// callee keys outward until the frontier is exhausted.
    fn expand_from(&mut self, kind: TraceKind, callee: String, callee_port: String) -> Result<()> {
        let mut worklist = vec![(callee, callee_port)];
        while let Some((caller, port)) = worklist.pop() {
            let key = (kind, caller.clone(), port.clone());
            if self.expanded.contains_key(&key) {
                continue;
            }
            // Mark before building: conditions may recurse onto their own key.
            self.expanded.insert(key.clone(), Vec::new());

            let dictionary_key = ConditionKey::CallerPort { caller, port };
            let conditions = match kind {
                TraceKind::Precondition => self.entries.preconditions.get(&dictionary_key),
                TraceKind::Postcondition => self.entries.postconditions.get(&dictionary_key),
            };
            let conditions: Vec<ConditionRecord> =
                conditions.into_iter().flatten().cloned().collect();

            let mut frames = Vec::with_capacity(conditions.len());
            for condition in &conditions {
                let frame_id = self.add_condition_frame(kind, condition)?;
                frames.push(frame_id);
                worklist.push((condition.callee.clone(), condition.callee_port.clone()));
            }
            self.expanded.insert(key, frames);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{IssueLeafRecord, LeafRecord, ParsedRecord, PositionRecord, collect_entries};

    fn condition(
        caller: &str,
        caller_port: &str,
        callee: &str,
        callee_port: &str,
        leaves: &[(&str, u32)],
    ) -> ConditionRecord {
        ConditionRecord {
            caller: caller.to_owned(),
            caller_port: caller_port.to_owned(),
            filename: "lib/a.py".to_owned(),
            callee: callee.to_owned(),
            callee_port: callee_port.to_owned(),
            callee_location: PositionRecord {
                line: 10,
                start: 1,
                end: 2,
            },
            leaves: leaves
                .iter()
                .map(|(kind, distance)| LeafRecord((*kind).to_owned(), *distance))
                .collect(),
            type_interval: None,
            features: Vec::new(),
            titos: Vec::new(),
            annotations: Vec::new(),
            handle: None,
        }
    }

    fn issue() -> IssueRecord {
        IssueRecord {
            code: 6015,
            message: "tainted data reaches a sink".to_owned(),
            callable: "Foo.bar".to_owned(),
            handle: "h1".to_owned(),
            filename: "src/foo.py".to_owned(),
            line: 5,
            start: 1,
            end: 9,
            preconditions: vec![IssueConditionRecord {
                callee: "Mid.step".to_owned(),
                port: "formal(x)".to_owned(),
                location: PositionRecord {
                    line: 6,
                    start: 1,
                    end: 2,
                },
                leaves: vec![LeafRecord("RCE".to_owned(), 2)],
                titos: Vec::new(),
                features: Vec::new(),
                type_interval: None,
                annotations: Vec::new(),
                root_port: None,
            }],
            postconditions: Vec::new(),
            initial_sources: vec![IssueLeafRecord(
                "Source.get".to_owned(),
                "UserControlled".to_owned(),
                1,
            )],
            final_sinks: vec![IssueLeafRecord("Sink.run".to_owned(), "RCE".to_owned(), 2)],
            features: Vec::new(),
            callable_line: None,
            fix_info: None,
        }
    }

    #[test]
    fn builds_instance_with_expanded_trace() {
        let records = vec![
            ParsedRecord::Issue(issue()),
            ParsedRecord::Precondition(condition(
                "Mid.step",
                "formal(x)",
                "Sink.run",
                "sink",
                &[("RCE", 0)],
            )),
        ];
        let entries = collect_entries(records);
        let mut step = CreateGraph::new();
        let graph = step.run(entries, &mut Summary::default()).unwrap();

        assert_eq!(graph.issue_count(), 1);
        assert_eq!(graph.issue_instance_count(), 1);
        // Root frame plus the expanded condition.
        assert_eq!(graph.trace_frame_count(), 2);

        let instance = graph.issue_instances().next().unwrap();
        assert_eq!(instance.min_trace_length_to_sources, Some(1));
        assert_eq!(instance.min_trace_length_to_sinks, Some(2));
        assert!(instance.is_new_issue);

        let first_hops: Vec<_> = graph.issue_instance_trace_frames(instance.id).collect();
        assert_eq!(first_hops.len(), 1);
        let root = graph.trace_frame(first_hops[0]);
        assert_eq!(root.caller_port, "root");
        // The leaf assoc carries the parsed distance and the kind flows
        // through an identity mapping.
        let sink = graph.get_shared_text(SharedTextKind::Sink, "RCE").unwrap();
        assert_eq!(
            graph.trace_frame_leaf_assoc(root.id).collect::<Vec<_>>(),
            vec![(sink, Some(2))]
        );
        assert!(root.leaf_mapping.contains(&LeafMapping::identity(sink)));

        // The expanded frame is reachable through the forward index.
        assert_eq!(graph.get_next_trace_frames(root).len(), 1);
    }

    #[test]
    fn same_handle_reuses_issue() {
        let mut second = issue();
        second.filename = "src/other.py".to_owned();
        let entries = collect_entries(vec![
            ParsedRecord::Issue(issue()),
            ParsedRecord::Issue(second),
        ]);
        let graph = CreateGraph::new()
            .run(entries, &mut Summary::default())
            .unwrap();
        assert_eq!(graph.issue_count(), 1);
        assert_eq!(graph.issue_instance_count(), 2);
        let new_flags: Vec<bool> = graph
            .issue_instances()
            .map(|instance| instance.is_new_issue)
            .collect();
        assert_eq!(new_flags, vec![true, false]);
    }
}
