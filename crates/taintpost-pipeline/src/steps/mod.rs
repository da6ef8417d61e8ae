//! The pipeline stages: record-level filters ahead of graph construction and
//! the graph propagation passes behind it.

pub mod add_features;
pub mod add_reverse_traces;
pub mod issue_callable_filter;
pub mod issue_handle_filter;
pub mod mark_partial_flows;
pub mod meta_run_issue_duplicate_filter;
pub mod propagate_context_to_leaf_frames;
pub mod propagate_extra_features_to_instances;
pub mod propagate_shared_texts;
pub mod trim_trace_graph;
pub mod warning_code_filter;

pub use add_features::AddFeatures;
pub use add_reverse_traces::AddReverseTraces;
pub use issue_callable_filter::IssueCallableFilter;
pub use issue_handle_filter::IssueHandleFilter;
pub use mark_partial_flows::{MarkPartialFlows, PartialFlowRule};
pub use meta_run_issue_duplicate_filter::MetaRunIssueDuplicateFilter;
pub use propagate_context_to_leaf_frames::PropagateContextToLeafFrames;
pub use propagate_extra_features_to_instances::PropagateExtraFeaturesToInstances;
pub use propagate_shared_texts::PropagateSharedTexts;
pub use trim_trace_graph::TrimTraceGraph;
pub use warning_code_filter::WarningCodeFilter;

#[cfg(test)]
pub(crate) mod tests {
    use crate::record::IssueRecord;

    pub(crate) fn issue_with(code: u32, handle: &str, callable: &str) -> IssueRecord {
        IssueRecord {
            code,
            message: "tainted data reaches a sink".to_owned(),
            callable: callable.to_owned(),
            handle: handle.to_owned(),
            filename: "src/a.py".to_owned(),
            line: 1,
            start: 1,
            end: 2,
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            initial_sources: Vec::new(),
            final_sinks: Vec::new(),
            features: Vec::new(),
            callable_line: None,
            fix_info: None,
        }
    }
}
