//! End-to-end runs over analyzer output files: parse, filter, build the
//! graph, propagate, trim and hand off to a sink.

use std::{
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use indoc::indoc;
use taintpost_pipeline::{
    CreateGraph, GraphSink, JsonLinesParser, ParallelParserStep, Pipeline, SinkError, Summary,
    sink::SaveGraph,
    steps::{AddFeatures, PropagateSharedTexts, TrimTraceGraph, WarningCodeFilter},
};

use taintpost_graph::{SharedTextKind, TraceGraph, testing::assert_graph_invariants};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Clone, Default)]
struct CountingSink {
    consumed: Arc<AtomicUsize>,
}

impl GraphSink for CountingSink {
    fn consume(&mut self, _graph: &TraceGraph) -> Result<(), SinkError> {
        self.consumed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fixture_files(dir: &tempfile::TempDir) -> Vec<PathBuf> {
    let issues = indoc! {r#"
        {"type": "issue", "code": 6015, "message": "tainted data reaches a sink", "callable": "Entry.main", "handle": "h1", "filename": "src/a/x.py", "line": 5, "start": 1, "end": 9, "preconditions": [{"callee": "Mid.step", "port": "formal(x)", "location": {"line": 6, "start": 1, "end": 2}, "leaves": [["RCE", 1]]}], "postconditions": [{"callee": "Source.get", "port": "source", "location": {"line": 7, "start": 1, "end": 2}, "leaves": [["UserControlled", 0]]}], "initial_sources": [["Source.get", "UserControlled", 1]], "final_sinks": [["Sink.run", "RCE", 2]], "features": ["via-entry"]}
        {"type": "issue", "code": 7000, "message": "filtered out", "callable": "Noise.fn", "handle": "h2", "filename": "src/b/y.py", "line": 1, "start": 1, "end": 2}
    "#};
    let conditions = indoc! {r#"
        {"type": "precondition", "caller": "Mid.step", "caller_port": "formal(x)", "filename": "lib/mid.py", "callee": "Sink.run", "callee_port": "anchor:formal(0)", "callee_location": {"line": 9, "start": 1, "end": 2}, "leaves": [["RCE", 0]]}
    "#};

    let issues_path = dir.path().join("issues.json");
    let conditions_path = dir.path().join("conditions.json");
    fs::write(&issues_path, issues).unwrap();
    fs::write(&conditions_path, conditions).unwrap();
    vec![issues_path, conditions_path]
}

#[test]
fn full_pipeline_over_analyzer_output() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let files = fixture_files(&dir);

    let sink = CountingSink::default();
    let mut summary = Summary::default();
    summary.set_affected_files(vec!["src/a/".to_owned()]);

    let pipeline = Pipeline::with_summary(files, summary)
        .then(ParallelParserStep::new(|| JsonLinesParser))
        .unwrap()
        .then(WarningCodeFilter::new([6015]))
        .unwrap()
        .then(AddFeatures::new(["from-ci".to_owned()]))
        .unwrap()
        .then(CreateGraph::new())
        .unwrap()
        .then(PropagateSharedTexts::new(true, true))
        .unwrap()
        .then(TrimTraceGraph)
        .unwrap()
        .then(SaveGraph::new(sink.clone()))
        .unwrap();
    let (graph, _summary) = pipeline.finish();

    assert_eq!(sink.consumed.load(Ordering::SeqCst), 1);
    assert_graph_invariants(&graph);

    // The filtered issue is gone, the kept one survived the trim.
    assert_eq!(graph.issue_count(), 1);
    assert_eq!(graph.issue_instance_count(), 1);
    let instance = graph.issue_instances().next().unwrap();
    assert_eq!(graph.issue(instance.issue_id).code, 6015);

    // Features from the issue and from AddFeatures are on the instance.
    let features: Vec<String> = graph
        .issue_instance_shared_texts_by_kind(instance.id, SharedTextKind::Feature)
        .into_iter()
        .map(|text| graph.shared_text(text).contents.clone())
        .collect();
    assert!(features.contains(&"via-entry".to_owned()));
    assert!(features.contains(&"from-ci".to_owned()));

    // Trimming recomputed the minimum trace lengths from the surviving
    // frames: the source is immediately at the postcondition hop, the sink
    // one hop behind the precondition hop.
    assert_eq!(instance.min_trace_length_to_sources, Some(0));
    assert_eq!(instance.min_trace_length_to_sinks, Some(1));

    // The propagated source kind reached the anchor frame with a depth
    // offset by the instance's min trace length to sources.
    let source = graph
        .get_shared_text(SharedTextKind::Source, "UserControlled")
        .unwrap();
    let anchor_frame = graph
        .trace_frames()
        .find(|frame| frame.callee_port == "anchor:formal(0)")
        .expect("anchor frame survived the trim");
    let propagated = graph
        .trace_frame_leaf_assoc(anchor_frame.id)
        .find(|(leaf, _)| *leaf == source)
        .expect("source kind propagated to the anchor frame");
    assert_eq!(propagated.1, Some(2));

    // Feature propagation targets anchor ports; the propagated feature
    // carries no depth.
    let via_entry = graph
        .get_shared_text(SharedTextKind::Feature, "via-entry")
        .unwrap();
    assert_eq!(
        graph
            .trace_frame_leaf_assoc(anchor_frame.id)
            .find(|(leaf, _)| *leaf == via_entry)
            .expect("feature propagated to the anchor frame")
            .1,
        None
    );
}

#[test]
fn pipeline_without_affected_files_keeps_every_issue() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let files = fixture_files(&dir);

    let pipeline = Pipeline::new(files)
        .then(ParallelParserStep::new(|| JsonLinesParser))
        .unwrap()
        .then(CreateGraph::new())
        .unwrap()
        .then(TrimTraceGraph)
        .unwrap();
    let (graph, _summary) = pipeline.finish();

    assert_eq!(graph.issue_instance_count(), 2);
    assert_graph_invariants(&graph);
}
