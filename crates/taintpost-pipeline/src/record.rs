//! Parsed analyzer output, as it arrives at the head of the pipeline.
//!
//! Records are plain serde types: issues with their first-hop conditions,
//! plus the full condition dictionaries keyed by handle or by
//! `(caller, caller_port)`.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use taintpost_graph::SourceLocation;

/// `line`/`start`/`end` position as analyzers emit it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PositionRecord {
    pub line: u32,
    pub start: u32,
    pub end: u32,
}

impl From<PositionRecord> for SourceLocation {
    fn from(position: PositionRecord) -> Self {
        SourceLocation::new(position.line, position.start, position.end)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TypeIntervalRecord {
    pub start: i32,
    pub finish: i32,
    pub preserves_type_context: bool,
}

/// `(kind, distance)` leaf of a condition.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct LeafRecord(pub String, pub u32);

impl LeafRecord {
    pub fn kind(&self) -> &str {
        &self.0
    }

    pub fn distance(&self) -> u32 {
        self.1
    }
}

/// `(callable, kind, distance)` leaf of an issue.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IssueLeafRecord(pub String, pub String, pub u32);

impl IssueLeafRecord {
    pub fn callable(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> &str {
        &self.1
    }

    pub fn distance(&self) -> u32 {
        self.2
    }
}

/// An issue feature: either a plain name or a `{key: value}` map that
/// flattens to `key:value` entries (`key` alone for empty values).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureEntry {
    Name(String),
    Map(BTreeMap<String, String>),
}

pub fn flatten_features<'a>(features: impl IntoIterator<Item = &'a FeatureEntry>) -> Vec<String> {
    let mut flattened = Vec::new();
    for feature in features {
        match feature {
            FeatureEntry::Name(name) => flattened.push(name.clone()),
            FeatureEntry::Map(map) => {
                for (key, value) in map {
                    if value.is_empty() {
                        flattened.push(key.clone());
                    } else {
                        flattened.push(format!("{key}:{value}"));
                    }
                }
            }
        }
    }
    flattened
}

/// A feature attached to a trace frame, optionally carrying locations.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceFeatureEntry {
    Name(String),
    Record {
        name: String,
        #[serde(default)]
        locations: Vec<PositionRecord>,
    },
}

impl TraceFeatureEntry {
    pub fn name(&self) -> &str {
        match self {
            TraceFeatureEntry::Name(name) => name,
            TraceFeatureEntry::Record { name, .. } => name,
        }
    }
}

/// Reference from an annotation into the subtrace it documents: the subtrace
/// root frames are the conditions whose caller matches.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SubtraceRecord {
    pub callee: String,
    pub port: String,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TraceAnnotationRecord {
    pub location: PositionRecord,
    pub kind: String,
    pub msg: String,
    #[serde(default)]
    pub leaf_kind: Option<String>,
    #[serde(default)]
    pub leaf_depth: u32,
    #[serde(default)]
    pub type_interval: Option<TypeIntervalRecord>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub trace_key: Option<String>,
    #[serde(default)]
    pub titos: Vec<PositionRecord>,
    #[serde(default)]
    pub subtraces: Vec<SubtraceRecord>,
}

/// One trace frame as parsed: an edge from `(caller, caller_port)` to
/// `(callee, callee_port)`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub caller: String,
    pub caller_port: String,
    pub filename: String,
    pub callee: String,
    pub callee_port: String,
    pub callee_location: PositionRecord,
    #[serde(default)]
    pub leaves: Vec<LeafRecord>,
    #[serde(default)]
    pub type_interval: Option<TypeIntervalRecord>,
    #[serde(default)]
    pub features: Vec<TraceFeatureEntry>,
    #[serde(default)]
    pub titos: Vec<PositionRecord>,
    #[serde(default)]
    pub annotations: Vec<TraceAnnotationRecord>,
    /// Set when the condition belongs to a specific issue rather than a
    /// caller; such conditions are keyed by the issue handle.
    #[serde(default)]
    pub handle: Option<String>,
}

/// A first-hop condition as recorded on the issue itself. The caller is the
/// issue's callable; `root_port` overrides the default `root` caller port.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct IssueConditionRecord {
    pub callee: String,
    pub port: String,
    pub location: PositionRecord,
    #[serde(default)]
    pub leaves: Vec<LeafRecord>,
    #[serde(default)]
    pub titos: Vec<PositionRecord>,
    #[serde(default)]
    pub features: Vec<TraceFeatureEntry>,
    #[serde(default)]
    pub type_interval: Option<TypeIntervalRecord>,
    #[serde(default)]
    pub annotations: Vec<TraceAnnotationRecord>,
    #[serde(default)]
    pub root_port: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct IssueRecord {
    pub code: u32,
    pub message: String,
    pub callable: String,
    pub handle: String,
    pub filename: String,
    pub line: u32,
    pub start: u32,
    pub end: u32,
    #[serde(default)]
    pub preconditions: Vec<IssueConditionRecord>,
    #[serde(default)]
    pub postconditions: Vec<IssueConditionRecord>,
    #[serde(default)]
    pub initial_sources: Vec<IssueLeafRecord>,
    #[serde(default)]
    pub final_sinks: Vec<IssueLeafRecord>,
    #[serde(default)]
    pub features: Vec<FeatureEntry>,
    #[serde(default)]
    pub callable_line: Option<u32>,
    #[serde(default)]
    pub fix_info: Option<serde_json::Value>,
}

impl IssueRecord {
    pub fn with_added_features(mut self, features: impl IntoIterator<Item = String>) -> Self {
        self.features
            .extend(features.into_iter().map(FeatureEntry::Name));
        self
    }
}

/// One record of a parsed analyzer output file.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedRecord {
    Issue(IssueRecord),
    Precondition(ConditionRecord),
    Postcondition(ConditionRecord),
}

/// Key of the condition dictionaries: the issue handle, or the caller view
/// of the edge.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ConditionKey {
    Handle(String),
    CallerPort { caller: String, port: String },
}

/// The typed payload flowing between the parse-adjacent stages.
#[derive(Default, Debug)]
pub struct IssuesAndFrames {
    pub issues: Vec<IssueRecord>,
    pub preconditions: FxHashMap<ConditionKey, Vec<ConditionRecord>>,
    pub postconditions: FxHashMap<ConditionKey, Vec<ConditionRecord>>,
}

/// Groups a flat stream of parsed records into the pipeline payload.
pub fn collect_entries(records: impl IntoIterator<Item = ParsedRecord>) -> IssuesAndFrames {
    let mut entries = IssuesAndFrames::default();
    for record in records {
        match record {
            ParsedRecord::Issue(issue) => entries.issues.push(issue),
            ParsedRecord::Precondition(condition) => {
                entries
                    .preconditions
                    .entry(condition_key(&condition))
                    .or_default()
                    .push(condition);
            }
            ParsedRecord::Postcondition(condition) => {
                entries
                    .postconditions
                    .entry(condition_key(&condition))
                    .or_default()
                    .push(condition);
            }
        }
    }
    entries
}

fn condition_key(condition: &ConditionRecord) -> ConditionKey {
    match &condition.handle {
        Some(handle) => ConditionKey::Handle(handle.clone()),
        None => ConditionKey::CallerPort {
            caller: condition.caller.clone(),
            port: condition.caller_port.clone(),
        },
    }
}
