//! Issue-instance hashing for de-duplication within a meta-run.

use std::{
    collections::BTreeSet,
    hash::Hasher,
};

use twox_hash::XxHash64;

use crate::record::{IssueRecord, flatten_features};

/// Returns a hash that uniquely represents the given issue instance: xxh64
/// over the `$`-joined canonical string of handle, location, sorted leaf
/// kinds and callables, minimum leaf distances and sorted features. Sorting
/// makes the hash stable under permutation of the input collections.
pub fn issue_instance_hash(issue: &IssueRecord) -> String {
    let source_kinds: BTreeSet<&str> = issue.initial_sources.iter().map(|leaf| leaf.kind()).collect();
    let sink_kinds: BTreeSet<&str> = issue.final_sinks.iter().map(|leaf| leaf.kind()).collect();
    let source_callables: BTreeSet<&str> =
        issue.initial_sources.iter().map(|leaf| leaf.callable()).collect();
    let sink_callables: BTreeSet<&str> =
        issue.final_sinks.iter().map(|leaf| leaf.callable()).collect();
    let min_source_distance = issue
        .initial_sources
        .iter()
        .map(|leaf| leaf.distance())
        .min()
        .unwrap_or(0);
    let min_sink_distance = issue
        .final_sinks
        .iter()
        .map(|leaf| leaf.distance())
        .min()
        .unwrap_or(0);
    let features: BTreeSet<String> = flatten_features(&issue.features).into_iter().collect();

    let unique_string = [
        issue.handle.clone(),
        issue.filename.clone(),
        issue.line.to_string(),
        issue.start.to_string(),
        issue.end.to_string(),
        join_sorted(source_kinds),
        join_sorted(sink_kinds),
        join_sorted(source_callables),
        join_sorted(sink_callables),
        min_source_distance.to_string(),
        min_sink_distance.to_string(),
        features.into_iter().collect::<Vec<_>>().join("|"),
    ]
    .join("$");

    let mut hasher = XxHash64::with_seed(0);
    hasher.write(unique_string.as_bytes());
    format!("{:016x}", hasher.finish())
}

fn join_sorted(values: BTreeSet<&str>) -> String {
    values.into_iter().collect::<Vec<_>>().join("|")
}
