use std::path::PathBuf;

use thiserror::Error;

/// A malformed input record. The containing parser stage reports the
/// offending payload and either skips or aborts per configuration.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{message}; received: `{received}`")]
    Malformed { message: String, received: String },
    #[error("failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid record in `{}`; received: `{line}`", path.display())]
    Json {
        path: PathBuf,
        line: String,
        #[source]
        source: serde_json::Error,
    },
}
