//! Errors returned by [`Store`](super::Store) and [`Client`](super::Client).

use thiserror::Error;

/// Failures of record store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{key} not found")]
    NotFound {
        key: String,
    },

    #[error("{key} already exists")]
    AlreadyExists {
        key: String,
    },

    /// The write carried a stale resource version.
    #[error("conflict writing {key}: the record has been modified")]
    Conflict {
        key: String,
    },

    /// The existing record is controlled by another owner.
    #[error("{key} is not controllable: it is controlled by {owner}")]
    NotControllable {
        key: String,
        owner: String,
    },

    #[error("cannot convert record: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_controllable(&self) -> bool {
        matches!(self, Self::NotControllable { .. })
    }
}

/// Turn a not-found error into `None`.
pub fn ignore_not_found<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
