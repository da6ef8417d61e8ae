//! Parsing of analyzer output files, fanned out across a worker pool.
//!
//! Workers exchange only serializable records and never share the graph:
//! each worker builds its own parser, reads one file and sends back a flat
//! batch of records. The driver consumes the batches unordered, logging
//! progress every 10 files. On failure the receiver is dropped and the
//! remaining workers drain cooperatively.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use tracing::info;

use crate::{
    PipelineStep,
    error::ParseError,
    record::{IssuesAndFrames, ParsedRecord, collect_entries},
    summary::Summary,
};

/// A parser for one analyzer output format. Constructed once per worker.
pub trait AnalysisParser {
    fn parse_file(&self, path: &Path) -> Result<Vec<ParsedRecord>, ParseError>;
}

/// The default format: one JSON object per line, tagged with `type`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesParser;

impl AnalysisParser for JsonLinesParser {
    fn parse_file(&self, path: &Path) -> Result<Vec<ParsedRecord>, ParseError> {
        let contents = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut records = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|source| ParseError::Json {
                path: path.to_owned(),
                line: line.to_owned(),
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Parses all files on the rayon pool, streaming batches back unordered.
pub fn parse_files<P, F>(factory: F, files: Vec<PathBuf>) -> Result<Vec<ParsedRecord>, ParseError>
where
    P: AnalysisParser + 'static,
    F: Fn() -> P + Send + Sync + 'static,
{
    let total = files.len();
    info!("parsing {total} files in parallel");
    let factory = Arc::new(factory);
    let (batch_tx, batch_rx) = crossbeam_channel::unbounded();
    for path in files {
        let batch_tx = batch_tx.clone();
        let factory = Arc::clone(&factory);
        rayon::spawn(move || {
            let parser = factory();
            // The receiver may be gone if the driver already failed; the
            // worker just drains.
            let _ = batch_tx.send(parser.parse_file(&path));
        });
    }
    drop(batch_tx);

    let mut records = Vec::new();
    for (index, batch) in batch_rx.iter().enumerate() {
        if index % 10 == 0 {
            let current = index + 1;
            let percent = (current as f64 / total as f64) * 100.0;
            info!("{current}/{total} ({percent:.2}%) files parsed");
        }
        records.extend(batch?);
    }
    Ok(records)
}

/// Pipeline head: file paths in, grouped issues and conditions out.
pub struct ParallelParserStep<P, F> {
    factory: F,
    _parser: std::marker::PhantomData<fn() -> P>,
}

impl<P, F> ParallelParserStep<P, F>
where
    P: AnalysisParser + 'static,
    F: Fn() -> P + Clone + Send + Sync + 'static,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            _parser: std::marker::PhantomData,
        }
    }
}

impl<P, F> PipelineStep for ParallelParserStep<P, F>
where
    P: AnalysisParser + 'static,
    F: Fn() -> P + Clone + Send + Sync + 'static,
{
    type In = Vec<PathBuf>;
    type Out = IssuesAndFrames;

    fn name(&self) -> &'static str {
        "ParallelParser"
    }

    fn run(&mut self, input: Vec<PathBuf>, _summary: &mut Summary) -> Result<IssuesAndFrames> {
        let records = parse_files(self.factory.clone(), input)?;
        info!("parsed {} records", records.len());
        Ok(collect_entries(records))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_files_unordered() {
        let dir = tempfile::tempdir().unwrap();
        let issue = r#"{"type": "issue", "code": 6015, "message": "m", "callable": "Foo.bar",
            "handle": "h1", "filename": "a.py", "line": 1, "start": 2, "end": 3}"#
            .replace('\n', " ");
        let condition = r#"{"type": "postcondition", "caller": "Foo.bar", "caller_port": "result",
            "filename": "a.py", "callee": "Source.get", "callee_port": "source",
            "callee_location": {"line": 4, "start": 1, "end": 2}, "leaves": [["UserControlled", 0]]}"#
            .replace('\n', " ");
        let files = vec![
            write_file(&dir, "one.json", &issue),
            write_file(&dir, "two.json", &format!("{condition}\n\n")),
        ];

        let records = parse_files(|| JsonLinesParser, files).unwrap();
        assert_eq!(records.len(), 2);
        let entries = collect_entries(records);
        assert_eq!(entries.issues.len(), 1);
        assert_eq!(entries.postconditions.len(), 1);
    }

    #[test]
    fn malformed_input_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![write_file(&dir, "bad.json", "{\"type\": \"issue\"")];
        assert!(parse_files(|| JsonLinesParser, files).is_err());
    }
}
