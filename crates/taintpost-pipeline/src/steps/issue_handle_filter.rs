use anyhow::Result;
use rustc_hash::FxHashSet;

use crate::{PipelineStep, record::IssuesAndFrames, summary::Summary};

/// Keeps only issues whose handle is in the configured set.
pub struct IssueHandleFilter {
    handles_to_keep: FxHashSet<String>,
}

impl IssueHandleFilter {
    pub fn new(handles_to_keep: impl IntoIterator<Item = String>) -> Self {
        Self {
            handles_to_keep: handles_to_keep.into_iter().collect(),
        }
    }
}

impl PipelineStep for IssueHandleFilter {
    type In = IssuesAndFrames;
    type Out = IssuesAndFrames;

    fn name(&self) -> &'static str {
        "IssueHandleFilter"
    }

    fn run(&mut self, mut input: IssuesAndFrames, _summary: &mut Summary) -> Result<IssuesAndFrames> {
        input
            .issues
            .retain(|issue| self.handles_to_keep.contains(&issue.handle));
        Ok(input)
    }
}
