//! Storage error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The object does not exist at the source.
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store error for {path}: {source}")]
    ObjectStore {
        path: String,
        #[source]
        source: ::object_store::Error,
    },

    #[error("failed to configure object store: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid table name {0:?}: expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidTableName(String),

    #[error("stored row is malformed: {0}")]
    MalformedRow(String),
}

impl StorageError {
    pub(crate) fn object_store(path: &str, source: ::object_store::Error) -> Self {
        match source {
            ::object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
            source => StorageError::ObjectStore {
                path: path.to_string(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
