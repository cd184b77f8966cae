use std::path::PathBuf;

use thiserror::Error;

use crate::imports::ImportError;
use crate::planner::PlanError;
use crate::select::SelectError;
use crate::versions::VersionError;

#[derive(Debug, Error)]
pub enum VerspecError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Select(#[from] SelectError),
}

/// A structural error in one spec file. Always carries the file and 1-based line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}:{line}: {message}")]
pub struct ParseError {
    pub path: String,
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(path: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("path {} is not valid UTF-8", path.display())]
    NonUtf8Path { path: PathBuf },
}
