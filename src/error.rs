use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} is {size} bytes, above the {limit} byte ingestion limit")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("{path:?} is not valid UTF-8")]
    Decode { path: PathBuf },

    #[error("malformed frontmatter in {path}: {message}")]
    Frontmatter { path: String, message: String },

    #[error("index store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("index store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid regular expression: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("invalid parameter `{name}`: {message}")]
    InvalidParameter { name: &'static str, message: String },

    #[error("vault walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("vault root is not a directory: {0:?}")]
    InvalidVault(PathBuf),

    #[error("background task failed: {0}")]
    Task(String),
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that mean the durable store itself can no longer be trusted.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, IndexError::Store(_) | IndexError::StoreUnavailable(_))
    }

    /// Another connection held the database past the busy timeout. Worth one
    /// retry before the store is written off.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            IndexError::Store(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }

    /// Errors caused by the caller's input rather than the vault or the store.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IndexError::InvalidQuery(_)
                | IndexError::InvalidRegex(_)
                | IndexError::InvalidParameter { .. }
        )
    }
}

impl From<tokio::task::JoinError> for IndexError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failures_are_classified() {
        let err = IndexError::StoreUnavailable("disk full".to_string());
        assert!(err.is_store_failure());
        assert!(!err.is_validation());

        let err = IndexError::InvalidQuery("empty".to_string());
        assert!(err.is_validation());
        assert!(!err.is_store_failure());

        let err = IndexError::FileTooLarge {
            path: PathBuf::from("big.md"),
            size: 20,
            limit: 10,
        };
        assert!(!err.is_store_failure());
        assert!(err.to_string().contains("20 bytes"));
    }

    #[test]
    fn test_busy_is_a_store_failure_worth_retrying() {
        let busy = IndexError::Store(rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(5), None));
        assert!(busy.is_busy());
        assert!(busy.is_store_failure());

        let corrupt = IndexError::Store(rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(11), None));
        assert!(!corrupt.is_busy());
        assert!(!IndexError::StoreUnavailable("gone".to_string()).is_busy());
    }
}
