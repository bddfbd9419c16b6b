//! Errors raised by the graph and scheduler core.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A path was requested with a prototype different from the one it
    /// was first created with.
    #[error("prototype conflict for '{path}': already '{existing}', requested '{requested}'")]
    PrototypeConflict {
        path: String,
        existing: String,
        requested: String,
    },

    /// A bind, preorder, or postorder was started while another was running.
    #[error("a traversal is already in progress")]
    TraversalInProgress,

    #[error("{path}: not a graph file or version mismatch")]
    VersionInvalid { path: PathBuf },

    /// A context issued a request while an earlier one was still pending.
    #[error("context already waiting on a request")]
    Busy,

    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    /// A request named a context that has already finished.
    #[error("no such context")]
    UnknownContext,

    #[error("no loader to execute buildfile '{0}'")]
    NoLoader(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
