use anyhow::Result;
use tracing::info;

use crate::{PipelineStep, record::IssuesAndFrames, summary::Summary};

/// Attaches the given features to all issues. With an empty feature list the
/// input passes through unchanged.
pub struct AddFeatures {
    features: Vec<String>,
}

impl AddFeatures {
    pub fn new(features: impl IntoIterator<Item = String>) -> Self {
        Self {
            features: features.into_iter().collect(),
        }
    }
}

impl PipelineStep for AddFeatures {
    type In = IssuesAndFrames;
    type Out = IssuesAndFrames;

    fn name(&self) -> &'static str {
        "AddFeatures"
    }

    fn run(&mut self, mut input: IssuesAndFrames, _summary: &mut Summary) -> Result<IssuesAndFrames> {
        if !self.features.is_empty() {
            info!("attaching provided features");
            input.issues = input
                .issues
                .into_iter()
                .map(|issue| issue.with_added_features(self.features.iter().cloned()))
                .collect();
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record::flatten_features, steps::tests::issue_with};

    #[test]
    fn attaches_features_to_every_issue() {
        let mut input = IssuesAndFrames::default();
        input.issues.push(issue_with(6015, "h1", "Foo.bar"));

        let output = AddFeatures::new(["from-ci".to_owned()])
            .run(input, &mut Summary::default())
            .unwrap();
        assert_eq!(flatten_features(&output.issues[0].features), vec!["from-ci"]);
    }
}
