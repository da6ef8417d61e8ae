use anyhow::Result;
use taintpost_graph::{TraceGraph, TrimmedTraceGraph};
use tracing::info;

use crate::{PipelineStep, summary::Summary};

/// Replaces the graph with its trimmed reconstruction when the summary
/// carries affected files; a pass-through otherwise.
pub struct TrimTraceGraph;

impl PipelineStep for TrimTraceGraph {
    type In = TraceGraph;
    type Out = TraceGraph;

    fn name(&self) -> &'static str {
        "TrimTraceGraph"
    }

    fn run(&mut self, input: TraceGraph, summary: &mut Summary) -> Result<TraceGraph> {
        let Some(affected_files) = summary.affected_files() else {
            return Ok(input);
        };

        info!("trimming graph to affected files");
        let mut trimmed =
            TrimmedTraceGraph::new(affected_files.to_vec(), summary.affected_issues_only());
        trimmed.populate_from_trace_graph(&input);
        Ok(trimmed.into_graph())
    }
}

#[cfg(test)]
mod tests {
    use taintpost_graph::testing::FakeGraphBuilder;

    use super::*;

    #[test]
    fn passes_through_without_affected_files() {
        let mut builder = FakeGraphBuilder::new();
        let issue = builder.issue("Foo.bar", 6015);
        builder.instance(issue, "src/a/x.py", "Foo.bar");
        let graph = builder.into_graph();

        let output = TrimTraceGraph
            .run(graph, &mut Summary::default())
            .unwrap();
        assert_eq!(output.issue_instance_count(), 1);
    }

    #[test]
    fn trims_when_affected_files_are_set() {
        let mut builder = FakeGraphBuilder::new();
        let issue = builder.issue("Foo.bar", 6015);
        builder.instance(issue, "src/a/x.py", "Foo.bar");
        let other = builder.issue("Other.one", 6016);
        builder.instance(other, "src/b/y.py", "Other.one");
        let graph = builder.into_graph();

        let mut summary = Summary::default();
        summary.set_affected_files(vec!["src/a/".to_owned()]);
        let output = TrimTraceGraph.run(graph, &mut summary).unwrap();
        assert_eq!(output.issue_instance_count(), 1);
    }
}
