//! Error types and exit codes.
//!
//! - 0: success
//! - 1: processing failure (I/O, malformed records, failed tasks)
//! - 2: usage error (bad parameters, detected before any work is submitted)

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ThesaurusError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    Usage = 2,
}

#[derive(Error, Debug)]
pub enum ThesaurusError {
    #[error("invalid parameters: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record in {path:?} at line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("enumerator error: {0}")]
    Enumerator(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("task {task} failed: {source}")]
    Task {
        task: String,
        #[source]
        source: Box<ThesaurusError>,
    },

    #[error("{0}")]
    Internal(String),
}

impl ThesaurusError {
    pub fn validation(reason: impl Into<String>) -> Self {
        ThesaurusError::Validation(reason.into())
    }

    /// Attach a file location to a record-level parse failure.
    pub fn at(self, path: impl Into<PathBuf>, line: u64) -> Self {
        match self {
            ThesaurusError::Malformed(reason) => ThesaurusError::Parse {
                path: path.into(),
                line,
                reason,
            },
            other => other,
        }
    }

    /// The innermost error, looking through task wrappers.
    pub fn root_cause(&self) -> &ThesaurusError {
        match self {
            ThesaurusError::Task { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.root_cause() {
            ThesaurusError::Validation(_)
            | ThesaurusError::Pattern(_)
            | ThesaurusError::Json(_) => ExitCode::Usage,

            ThesaurusError::Io(_)
            | ThesaurusError::Parse { .. }
            | ThesaurusError::Malformed(_)
            | ThesaurusError::Enumerator(_)
            | ThesaurusError::ThreadPool(_)
            | ThesaurusError::Task { .. }
            | ThesaurusError::Internal(_) => ExitCode::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_gains_location_test() {
        let err = ThesaurusError::Malformed("expected 3 fields".into()).at("events.tsv", 7);
        match err {
            ThesaurusError::Parse { path, line, reason } => {
                assert_eq!(path, PathBuf::from("events.tsv"));
                assert_eq!(line, 7);
                assert_eq!(reason, "expected 3 fields");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn task_failures_keep_the_cause_exit_code_test() {
        let err = ThesaurusError::Task {
            task: "sort-3".into(),
            source: Box::new(ThesaurusError::validation("bad")),
        };
        assert_eq!(err.exit_code(), ExitCode::Usage);

        let err = ThesaurusError::Task {
            task: "merge-1".into(),
            source: Box::new(ThesaurusError::Io(std::io::Error::other("disk full"))),
        };
        assert_eq!(err.exit_code(), ExitCode::Failure);
        assert!(err.to_string().contains("merge-1"));
    }
}
