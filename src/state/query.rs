//! Paginated reads over the three ordered views
//!
//! Each view has its own request type. Constructing a request validates the
//! partition key, so a missing key is reported before any I/O is attempted.
//! Read failures are returned as-is: retrying is the caller's decision.

use std::sync::Arc;
use tracing::debug;

use super::data::{Photo, Record, UserVote};
use super::store::{
    Cursor, IndexName, KeyCondition, KeyValueStore, Query, SortCondition, PARTITION_ATTRIBUTE,
    TIME_ATTRIBUTE, USER_ATTRIBUTE, VOTES_ATTRIBUTE,
};
use crate::config::ExplorerConfig;
use crate::error::{QueryError, StoreError, ValidationError};

/// One page of results plus the continuation for the next one
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// None means there are no further pages
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Photos of one mission+instrument, newest capture first
#[derive(Debug, Clone, PartialEq)]
pub struct RecencyQuery {
    partition_key: String,
    cursor: Option<Cursor>,
    before_time: Option<i64>,
}

impl RecencyQuery {
    pub fn new(partition_key: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self {
            partition_key: require_partition(partition_key.into())?,
            cursor: None,
            before_time: None,
        })
    }

    /// Only photos captured at or before `time`
    pub fn before(mut self, time: Option<i64>) -> Self {
        self.before_time = time;
        self
    }

    /// Continue after a previous page of the same query
    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }
}

/// Photos of one mission+instrument, most votes first
#[derive(Debug, Clone, PartialEq)]
pub struct PopularityQuery {
    partition_key: String,
    cursor: Option<Cursor>,
    max_votes: Option<i64>,
}

impl PopularityQuery {
    pub fn new(partition_key: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self {
            partition_key: require_partition(partition_key.into())?,
            cursor: None,
            max_votes: None,
        })
    }

    /// Only photos with at most `votes` votes
    pub fn at_most(mut self, votes: Option<i64>) -> Self {
        self.max_votes = votes;
        self
    }

    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }
}

/// A user's votes, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct UserVotesQuery {
    user_id: String,
    cursor: Option<Cursor>,
}

impl UserVotesQuery {
    pub fn new(user_id: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self {
            user_id: require_partition(user_id.into())?,
            cursor: None,
        })
    }

    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

fn require_partition(key: String) -> Result<String, ValidationError> {
    if key.trim().is_empty() {
        return Err(ValidationError::MissingPartitionKey);
    }
    Ok(key)
}

/// Issues ordered, paginated queries against the photo and vote tables
#[derive(Clone)]
pub struct QueryCursorClient {
    store: Arc<dyn KeyValueStore>,
    photos_table: String,
    user_votes_table: String,
    page_size: usize,
}

impl QueryCursorClient {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &ExplorerConfig) -> Self {
        Self {
            store,
            photos_table: config.photos_table.clone(),
            user_votes_table: config.user_votes_table.clone(),
            page_size: config.page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub async fn query_by_recency(&self, request: RecencyQuery) -> Result<Page<Photo>, QueryError> {
        let query = Query {
            table: self.photos_table.clone(),
            partition: KeyCondition {
                attribute: PARTITION_ATTRIBUTE.to_string(),
                value: request.partition_key,
            },
            sort: request.before_time.map(|value| SortCondition {
                attribute: TIME_ATTRIBUTE.to_string(),
                value,
            }),
            index: Some(IndexName::Date),
            limit: Some(self.page_size),
            scan_forward: false,
            exclusive_start_key: request.cursor,
        };

        self.fetch(query, Photo::from_record).await
    }

    pub async fn query_by_popularity(
        &self,
        request: PopularityQuery,
    ) -> Result<Page<Photo>, QueryError> {
        let query = Query {
            table: self.photos_table.clone(),
            partition: KeyCondition {
                attribute: PARTITION_ATTRIBUTE.to_string(),
                value: request.partition_key,
            },
            sort: request.max_votes.map(|value| SortCondition {
                attribute: VOTES_ATTRIBUTE.to_string(),
                value,
            }),
            index: Some(IndexName::Vote),
            limit: Some(self.page_size),
            scan_forward: false,
            exclusive_start_key: request.cursor,
        };

        self.fetch(query, Photo::from_record).await
    }

    pub async fn query_user_votes(
        &self,
        request: UserVotesQuery,
    ) -> Result<Page<UserVote>, QueryError> {
        let query = Query {
            table: self.user_votes_table.clone(),
            partition: KeyCondition {
                attribute: USER_ATTRIBUTE.to_string(),
                value: request.user_id,
            },
            sort: None,
            index: None,
            limit: Some(self.page_size),
            scan_forward: false,
            exclusive_start_key: request.cursor,
        };

        self.fetch(query, UserVote::from_record).await
    }

    async fn fetch<T>(
        &self,
        query: Query,
        decode: fn(Record) -> Result<T, serde_json::Error>,
    ) -> Result<Page<T>, QueryError> {
        debug!("Requesting store to query with the following parameters: {:?}", query);

        let output = self.store.query(query).await?;
        let items = output
            .items
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        debug!(
            "Query returned {} items, more pages: {}",
            items.len(),
            output.last_evaluated_key.is_some()
        );

        Ok(Page {
            items,
            next_cursor: output.last_evaluated_key,
        })
    }
}

impl std::fmt::Debug for QueryCursorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCursorClient")
            .field("photos_table", &self.photos_table)
            .field("user_votes_table", &self.user_votes_table)
            .field("page_size", &self.page_size)
            .finish()
    }
}
