//! Post-processing pipeline over the taint trace graph.
//!
//! Analyzer output is parsed into record tuples, filtered, assembled into a
//! [`taintpost_graph::TraceGraph`], enriched by the propagation passes and
//! finally (optionally) trimmed to a change set before it is handed to
//! persistence. A pipeline is an ordered sequence of typed steps threading a
//! free-form [`Summary`] alongside the payload.

pub mod create_graph;
pub mod error;
pub mod instance_hash;
pub mod parser;
pub mod record;
pub mod sink;
pub mod steps;
pub mod summary;

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;

pub use crate::{
    create_graph::CreateGraph,
    error::ParseError,
    parser::{AnalysisParser, JsonLinesParser, ParallelParserStep},
    record::{
        ConditionKey, ConditionRecord, FeatureEntry, IssueConditionRecord, IssueLeafRecord,
        IssueRecord, IssuesAndFrames, LeafRecord, ParsedRecord,
    },
    sink::{GraphSink, SinkError},
    summary::Summary,
};

/// One stage of the pipeline. Steps are polymorphic transformers with an
/// input and an output type; `name` is only used as a diagnostic string for
/// step timing.
pub trait PipelineStep {
    type In;
    type Out;

    fn name(&self) -> &'static str;

    fn run(&mut self, input: Self::In, summary: &mut Summary) -> Result<Self::Out>;
}

/// An ordered sequence of steps applied to a payload. The first failure
/// aborts the whole pipeline; per-step timing is logged on [`Pipeline::finish`].
pub struct Pipeline<T> {
    value: T,
    summary: Summary,
    timings: Vec<(&'static str, Duration)>,
}

impl<T> Pipeline<T> {
    pub fn new(value: T) -> Self {
        Self::with_summary(value, Summary::default())
    }

    pub fn with_summary(value: T, summary: Summary) -> Self {
        Self {
            value,
            summary,
            timings: Vec::new(),
        }
    }

    pub fn then<S>(self, mut step: S) -> Result<Pipeline<S::Out>>
    where
        S: PipelineStep<In = T>,
    {
        let Pipeline {
            value,
            mut summary,
            mut timings,
        } = self;
        let started = Instant::now();
        let value = step.run(value, &mut summary)?;
        timings.push((step.name(), started.elapsed()));
        Ok(Pipeline {
            value,
            summary,
            timings,
        })
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn finish(self) -> (T, Summary) {
        let timing = self
            .timings
            .iter()
            .map(|(name, duration)| format!("{name} took {}", time_str(*duration)))
            .collect::<Vec<_>>()
            .join(", ");
        info!("step timing: {timing}");
        (self.value, self.summary)
    }
}

fn time_str(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let (minutes, seconds) = (total_seconds / 60, total_seconds % 60);
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
