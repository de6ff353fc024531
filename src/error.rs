//! Error taxonomy for the enforcer. All of these are absorbed at the public API boundary
//! (logged, then collapsed to a bool or a `(0, message, false)` tuple) rather than propagated
//! to callers of `Enforcer`; they exist so internal plumbing can use `?` instead of manual
//! matching.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnforcerError {
    #[error("apparmor directory {0} is not readable")]
    Environment(PathBuf),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a profile managed by this component")]
    NotManaged(String),

    #[error("apparmor_parser {args:?} failed: {stderr}")]
    Parser { args: Vec<String>, stderr: String },
}

pub type Result<T> = std::result::Result<T, EnforcerError>;
