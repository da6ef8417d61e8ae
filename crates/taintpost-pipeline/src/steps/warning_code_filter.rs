use anyhow::Result;
use rustc_hash::FxHashSet;

use crate::{PipelineStep, record::IssuesAndFrames, summary::Summary};

/// Keeps only issues whose code is in the configured set.
pub struct WarningCodeFilter {
    codes_to_keep: FxHashSet<u32>,
}

impl WarningCodeFilter {
    pub fn new(codes_to_keep: impl IntoIterator<Item = u32>) -> Self {
        Self {
            codes_to_keep: codes_to_keep.into_iter().collect(),
        }
    }
}

impl PipelineStep for WarningCodeFilter {
    type In = IssuesAndFrames;
    type Out = IssuesAndFrames;

    fn name(&self) -> &'static str {
        "WarningCodeFilter"
    }

    fn run(&mut self, mut input: IssuesAndFrames, _summary: &mut Summary) -> Result<IssuesAndFrames> {
        input
            .issues
            .retain(|issue| self.codes_to_keep.contains(&issue.code));
        Ok(input)
    }
}
