//! Error taxonomy for update task execution.
//!
//! Side effects already committed to disk (lock refreshes, hash rewrites,
//! script copy-backs) are never rolled back on error; a later run picks up
//! from whatever mixed state was produced.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no update task named {name} (known tasks: {known})")]
    UnknownTask { name: String, known: String },

    #[error("task {name} lists itself in required_update_tasks")]
    SelfReference { name: String },

    #[error("task {task}: required task {required}: {source}")]
    RequiredTaskFailed {
        task: String,
        required: String,
        #[source]
        source: Box<Error>,
    },

    #[error("parse flake.lock: {0}")]
    LockParse(#[source] serde_json::Error),

    #[error("task {task}: input {input} missing from flake.lock")]
    MissingInput { task: String, input: String },

    #[error("task {task}: input {input}: {source}")]
    InputFailed {
        task: String,
        input: String,
        #[source]
        source: Box<Error>,
    },

    #[error("cannot find nix binary on path")]
    NixNotFound,

    #[error("cannot find git binary on path")]
    GitNotFound,

    #[error("nix {command}: {detail}")]
    BuildTool { command: String, detail: String },

    #[error("git {command}: {detail}")]
    Git { command: String, detail: String },

    #[error("attr path {attr_path}: build unexpectedly succeeded")]
    UnexpectedBuildSuccess { attr_path: String },

    #[error("hash mismatch parse: {0}")]
    HashMismatchParse(String),

    #[error("nix build output malformed: {0}")]
    BuildResultMalformed(String),

    #[error("parse hash file {}: {source}", .path.display())]
    HashFileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("task {task}: derived hash {attr_path}: {source}")]
    DerivedHashFailed {
        task: String,
        attr_path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("update script {}: {detail}", .executable.display())]
    ScriptExecution { executable: PathBuf, detail: String },

    #[error("task {task}: update script {attr_path}: {source}")]
    ScriptFailed {
        task: String,
        attr_path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("task {task}: main build of {attr_path} failed")]
    MainBuildFailed { task: String, attr_path: String },

    #[error("task {task}: test build of {attr_path} failed")]
    TestBuildFailed { task: String, attr_path: String },

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
