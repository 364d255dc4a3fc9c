//! Error taxonomy for the photo feed
//!
//! Each layer gets its own enum:
//! - `StoreError` for the key-value store contract
//! - `ValidationError` for caller bugs, returned before any request is issued
//! - `QueryError` for paginated reads and feed fetches
//! - `VoteError` for the two-step vote write

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a key-value store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// The write precondition (`attribute not exists`) did not hold
    #[error("conditional check failed on {table}")]
    ConditionalCheckFailed { table: String },

    /// The continuation token does not belong to this query shape
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unsupported condition on attribute {0}")]
    UnsupportedCondition(String),

    #[error("record is missing required attribute {0}")]
    MissingAttribute(String),

    #[error("no item with key {key} in {table}")]
    ItemNotFound { table: String, key: String },

    /// The store could not be reached or the request could not be executed
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Missing or malformed required input. Always a caller bug.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a required parameter, partition key, is missing")]
    MissingPartitionKey,
    #[error("user id is missing")]
    MissingUserId,
    #[error("photo has no image id")]
    MissingImageId,
}

/// Errors delivered by paginated reads and feed fetches
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Recoverable: the same logical read may be issued again
    #[error("transient store failure: {0}")]
    Transient(#[from] StoreError),

    #[error("fetch did not complete within {0:?}")]
    Timeout(Duration),
}

impl QueryError {
    /// Whether the caller may re-issue the same read
    pub fn is_retryable(&self) -> bool {
        !matches!(self, QueryError::Validation(_))
    }
}

/// Errors delivered by `VoteCoordinator::vote`
#[derive(Error, Debug)]
pub enum VoteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The user already has a vote on this photo. Expected, user-facing.
    #[error("You have already voted on this image")]
    AlreadyVoted { user_id: String, image_id: String },

    /// Nothing was written
    #[error("transient store failure: {0}")]
    Transient(StoreError),

    /// The vote record exists but the photo's counter was not incremented
    #[error("vote recorded for {image_id} but the vote count was not updated: {source}")]
    PartialWrite {
        user_id: String,
        image_id: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("folder not found: {0}")]
    FolderNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
