use anyhow::Result;
use rustc_hash::FxHashSet;

use crate::{PipelineStep, record::IssuesAndFrames, summary::Summary};

/// Keeps only issues whose callable is on the allowlist.
pub struct IssueCallableFilter {
    issue_callable_allowlist: FxHashSet<String>,
}

impl IssueCallableFilter {
    pub fn new(issue_callable_allowlist: impl IntoIterator<Item = String>) -> Self {
        Self {
            issue_callable_allowlist: issue_callable_allowlist.into_iter().collect(),
        }
    }
}

impl PipelineStep for IssueCallableFilter {
    type In = IssuesAndFrames;
    type Out = IssuesAndFrames;

    fn name(&self) -> &'static str {
        "IssueCallableFilter"
    }

    fn run(&mut self, mut input: IssuesAndFrames, _summary: &mut Summary) -> Result<IssuesAndFrames> {
        input
            .issues
            .retain(|issue| self.issue_callable_allowlist.contains(&issue.callable));
        Ok(input)
    }
}
