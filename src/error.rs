// src/error.rs

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error was raised in, used to locate the offending file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Diff,
    Placeholder,
    Assign,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Diff => "diff",
            Stage::Placeholder => "placeholder insertion",
            Stage::Assign => "id assignment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open repository at {path}: {source}")]
    Repository {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("cannot resolve revision `{rev}`: {source}")]
    Resolve {
        rev: String,
        #[source]
        source: git2::Error,
    },

    #[error("working tree has uncommitted changes: {}", .paths.join(", "))]
    DirtyTree { paths: Vec<String> },

    #[error("target revision {target} is not checked out (HEAD is {head}), switch to the correct commit first")]
    NotCheckedOut { target: String, head: String },

    #[error("git error during {stage} of `{path}`: {source}")]
    Git {
        stage: Stage,
        path: String,
        #[source]
        source: git2::Error,
    },

    #[error(transparent)]
    Git2(#[from] git2::Error),

    #[error("failed to parse `{path}` during {stage}")]
    Parse { path: String, stage: Stage },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("gofmt failed on `{path}`: {message}")]
    Format { path: String, message: String },

    #[error("generated file: {0}")]
    Generated(String),

    #[error("worker pool: {0}")]
    Pool(String),

    #[error("change record: {0}")]
    ChangeRecord(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn git(stage: Stage, path: impl Into<String>, source: git2::Error) -> Self {
        Error::Git {
            stage,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
