use anyhow::Result;
use rustc_hash::FxHashSet;
use tracing::info;

use crate::{
    PipelineStep, instance_hash::issue_instance_hash, record::IssuesAndFrames, summary::Summary,
};

/// Filters out issues that already exist within the current meta-run.
///
/// An issue is skipped iff its instance hash — handle, location, leaf kinds
/// and callables, minimum distances and features — is among the known
/// hashes; instances with slightly different traces can still be dropped.
/// Looking the hashes up in storage is the persistence collaborator's job;
/// this stage receives the known set.
pub struct MetaRunIssueDuplicateFilter {
    meta_run_identifier: u64,
    known_hashes: FxHashSet<String>,
}

impl MetaRunIssueDuplicateFilter {
    pub fn new(meta_run_identifier: u64, known_hashes: FxHashSet<String>) -> Self {
        Self {
            meta_run_identifier,
            known_hashes,
        }
    }
}

impl PipelineStep for MetaRunIssueDuplicateFilter {
    type In = IssuesAndFrames;
    type Out = IssuesAndFrames;

    fn name(&self) -> &'static str {
        "MetaRunIssueDuplicateFilter"
    }

    fn run(&mut self, mut input: IssuesAndFrames, _summary: &mut Summary) -> Result<IssuesAndFrames> {
        let initial_count = input.issues.len();
        input
            .issues
            .retain(|issue| !self.known_hashes.contains(&issue_instance_hash(issue)));
        info!(
            "removed {} issues existing in meta run {} (out of {} issues)",
            initial_count - input.issues.len(),
            self.meta_run_identifier,
            initial_count,
        );
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::tests::issue_with;

    #[test]
    fn drops_known_hashes_only() {
        let known = issue_with(6015, "known", "Foo.bar");
        let fresh = issue_with(6015, "fresh", "Foo.bar");
        let known_hashes: FxHashSet<String> = [issue_instance_hash(&known)].into_iter().collect();

        let mut input = IssuesAndFrames::default();
        input.issues.push(known);
        input.issues.push(fresh);

        let output = MetaRunIssueDuplicateFilter::new(7, known_hashes)
            .run(input, &mut Summary::default())
            .unwrap();
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.issues[0].handle, "fresh");
    }
}
