//! The persistence boundary.
//!
//! Saving, primary-key reservation and run deletion live behind this trait;
//! the pipeline only hands the finished graph over and surfaces the
//! collaborator's failures.

use anyhow::Result;
use taintpost_graph::TraceGraph;
use thiserror::Error;

use crate::{PipelineStep, summary::Summary};

#[derive(Debug, Error)]
pub enum SinkError {
    /// Two to-be-merged entities share a key but disagree on an unmergeable
    /// attribute; aborts the save.
    #[error("merge conflict on {entity} key `{key}`")]
    MergeConflict { entity: &'static str, key: String },
    /// A delete-run request matched no run. Other deletions proceed
    /// unconditionally.
    #[error("no run with id `{run}` exists")]
    EmptyDeletion { run: String },
}

pub trait GraphSink {
    fn consume(&mut self, graph: &TraceGraph) -> Result<(), SinkError>;
}

/// Tail stage handing the graph to the persistence collaborator.
pub struct SaveGraph<S> {
    sink: S,
}

impl<S: GraphSink> SaveGraph<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<S: GraphSink> PipelineStep for SaveGraph<S> {
    type In = TraceGraph;
    type Out = TraceGraph;

    fn name(&self) -> &'static str {
        "SaveGraph"
    }

    fn run(&mut self, input: TraceGraph, _summary: &mut Summary) -> Result<TraceGraph> {
        self.sink.consume(&input)?;
        Ok(input)
    }
}
