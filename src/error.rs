use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("path already exists")]
    AlreadyExists,

    #[error("depot already in use by {0}")]
    RepoInUse(String),

    #[error("fileset '{0}' already exists")]
    FilesetExists(String),

    #[error("artifact '{0}' already exists")]
    ArtifactExists(String),

    #[error("fileset {0} not found")]
    FilesetNotFound(i64),

    #[error("artifact {0} not found")]
    ArtifactNotFound(i64),

    #[error("source file {} not found", .0.display())]
    SourceNotFound(PathBuf),

    #[error("source file {} is not readable", .0.display())]
    SourcePermissionDenied(PathBuf),

    #[error("user {uid} does not have capability {capability}")]
    PermissionDenied { uid: i64, capability: String },

    #[error("unknown state '{0}'")]
    UnknownState(String),

    #[error("invalid state '{0}'")]
    InvalidState(String),

    #[error("no transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("state changes are only allowed on primary artifacts")]
    InvalidTargetForStateChange,

    #[error("transition from '{from}' to '{to}' rejected: {source}")]
    CannotTransition {
        from: String,
        to: String,
        #[source]
        source: Box<Error>,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("property '{0}' already exists")]
    PropertyExists(String),

    #[error("destination {} already exists", .0.display())]
    DestinationExists(PathBuf),

    #[error("cannot write to destination {}", .0.display())]
    CannotWriteDestination(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
