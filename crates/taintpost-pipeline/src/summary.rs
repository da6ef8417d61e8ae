//! The free-form mapping threaded through all pipeline steps, carrying
//! cross-cutting context such as the affected files of a change set and
//! counters the stages publish.

use rustc_hash::FxHashMap;

pub const AFFECTED_FILES: &str = "affected_files";
pub const AFFECTED_ISSUES_ONLY: &str = "affected_issues_only";

#[derive(Clone, Debug, PartialEq)]
pub enum SummaryValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Strings(Vec<String>),
}

#[derive(Default, Debug)]
pub struct Summary {
    values: FxHashMap<&'static str, SummaryValue>,
}

impl Summary {
    pub fn set(&mut self, key: &'static str, value: SummaryValue) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&SummaryValue> {
        self.values.get(key)
    }

    pub fn set_affected_files(&mut self, files: Vec<String>) {
        self.set(AFFECTED_FILES, SummaryValue::Strings(files));
    }

    /// Path prefixes restricting the graph to a change set, if any.
    pub fn affected_files(&self) -> Option<&[String]> {
        match self.get(AFFECTED_FILES) {
            Some(SummaryValue::Strings(files)) => Some(files),
            _ => None,
        }
    }

    pub fn set_affected_issues_only(&mut self, value: bool) {
        self.set(AFFECTED_ISSUES_ONLY, SummaryValue::Bool(value));
    }

    pub fn affected_issues_only(&self) -> bool {
        matches!(self.get(AFFECTED_ISSUES_ONLY), Some(SummaryValue::Bool(true)))
    }

    pub fn add_count(&mut self, key: &'static str, amount: i64) {
        let value = match self.values.get(key) {
            Some(SummaryValue::Int(current)) => current + amount,
            _ => amount,
        };
        self.values.insert(key, SummaryValue::Int(value));
    }

    pub fn count(&self, key: &str) -> i64 {
        match self.get(key) {
            Some(SummaryValue::Int(value)) => *value,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut summary = Summary::default();
        assert_eq!(summary.affected_files(), None);
        assert!(!summary.affected_issues_only());

        summary.set_affected_files(vec!["src/a/".to_owned()]);
        summary.set_affected_issues_only(true);
        assert_eq!(summary.affected_files().unwrap(), ["src/a/".to_owned()]);
        assert!(summary.affected_issues_only());

        summary.add_count("parsed", 10);
        summary.add_count("parsed", 5);
        assert_eq!(summary.count("parsed"), 15);
    }
}
