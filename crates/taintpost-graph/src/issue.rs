//! Issues, issue instances and run metadata.
//!
//! An issue is the persistent bug identity, keyed externally by its handle.
//! It can persist across runs even if it moves around in the code. An issue
//! instance is one appearance of that issue in one specific run, carrying
//! per-run information such as the source location.

use crate::{
    id::{FixInfoId, InstanceId, IssueId, RunId, SharedTextId},
    location::SourceLocation,
};

/// Issues are born uncategorized; humans triage them afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum IssueStatus {
    #[default]
    Uncategorized,
    /// Not a security bug, but a bad practice. Still needs fixing.
    BadPractice,
    FalsePositive,
    ValidBug,
    DoNotCare,
}

/// Set when an issue is triaged to valid.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Critical,
    Significant,
    Limited,
}

#[derive(Clone, Debug)]
pub struct Issue {
    pub id: IssueId,
    /// Uniquely identifies the issue across runs on different revisions.
    pub handle: String,
    pub code: u32,
    pub callable_id: SharedTextId,
    pub status: IssueStatus,
    pub severity: Option<Severity>,
    pub detected_time: u64,
    pub first_instance_id: Option<InstanceId>,
}

/// Purge bookkeeping for an instance. Set by merge logic at ingestion only;
/// passes never touch it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PurgeStatus {
    #[default]
    None,
    /// This instance must not be purged.
    Archive,
    /// The instance's dependencies have been marked for archiving.
    Marked,
}

#[derive(Clone, Debug)]
pub struct IssueInstance {
    pub id: InstanceId,
    pub issue_id: IssueId,
    pub run_id: RunId,
    pub filename_id: SharedTextId,
    pub callable_id: SharedTextId,
    pub message_id: SharedTextId,
    pub location: SourceLocation,
    pub fix_info_id: Option<FixInfoId>,
    pub is_new_issue: bool,
    pub min_trace_length_to_sources: Option<u32>,
    pub min_trace_length_to_sinks: Option<u32>,
    /// Number of instances sharing this instance's callable in the run.
    pub callable_count: u32,
    pub purge_status: PurgeStatus,
}

#[derive(Clone, Debug)]
pub struct FixInfo {
    pub id: FixInfoId,
    pub contents: String,
}

/// A single run of the analyzer over one revision. Lifecycle management
/// (status, purging, meta-runs) belongs to the persistence layer; the graph
/// only needs the identity for instances and frames to reference.
#[derive(Clone, Debug)]
pub struct Run {
    pub id: RunId,
    pub job_id: Option<String>,
}
