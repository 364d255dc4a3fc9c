//! Key-value store contract
//!
//! The feeds and the vote coordinator only talk to the store through three
//! request shapes: an ordered, paginated `Query`, a `ConditionalPut` that
//! succeeds only when the key is new, and an additive `Increment`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::data::Record;
use crate::error::StoreError;

/// Partition attribute of the photos table and both of its indexes
pub const PARTITION_ATTRIBUTE: &str = "mission_instrument";
/// Sort attribute of the recency index
pub const TIME_ATTRIBUTE: &str = "captured_at";
/// Sort attribute of the popularity index, and the vote counter
pub const VOTES_ATTRIBUTE: &str = "votes";
/// Primary key of the photos table
pub const IMAGE_ID_ATTRIBUTE: &str = "image_id";
/// Partition attribute of the user votes table
pub const USER_ATTRIBUTE: &str = "user_id";
/// Sort attribute of the user votes table
pub const VOTED_AT_ATTRIBUTE: &str = "voted_at";

/// Secondary index selecting the sort order of a photos query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexName {
    /// Ordered by capture time
    Date,
    /// Ordered by vote count
    Vote,
}

impl IndexName {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexName::Date => "date-gsi",
            IndexName::Vote => "vote-gsi",
        }
    }
}

/// The ordered view a cursor was produced for
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortView {
    Recency,
    Popularity,
    UserVotes,
}

/// Opaque continuation token: the last-seen key of a page.
///
/// Only valid for a requery with the same view and partition key; the
/// store rejects it anywhere else.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    view: SortView,
    partition: String,
    sort_value: i64,
    id: String,
}

impl Cursor {
    pub fn new(view: SortView, partition: &str, sort_value: i64, id: &str) -> Self {
        Self {
            view,
            partition: partition.to_string(),
            sort_value,
            id: id.to_string(),
        }
    }

    pub fn view(&self) -> SortView {
        self.view
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn sort_value(&self) -> i64 {
        self.sort_value
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fails with `InvalidCursor` unless the cursor was issued for this shape
    pub fn check(&self, view: SortView, partition: &str) -> Result<(), StoreError> {
        if self.view != view {
            return Err(StoreError::InvalidCursor(format!(
                "cursor for {:?} used on a {:?} query",
                self.view, view
            )));
        }
        if self.partition != partition {
            return Err(StoreError::InvalidCursor(format!(
                "cursor for partition {} used on partition {}",
                self.partition, partition
            )));
        }
        Ok(())
    }
}

/// `attribute = value`
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub attribute: String,
    pub value: String,
}

/// `attribute <= value`
#[derive(Debug, Clone, PartialEq)]
pub struct SortCondition {
    pub attribute: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub partition: KeyCondition,
    pub sort: Option<SortCondition>,
    pub index: Option<IndexName>,
    pub limit: Option<usize>,
    /// false = descending
    pub scan_forward: bool,
    pub exclusive_start_key: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PutCondition {
    AttributeNotExists(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalPut {
    pub table: String,
    pub item: Record,
    pub condition: PutCondition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Increment {
    pub table: String,
    pub key: KeyCondition,
    pub attribute: String,
    pub delta: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub items: Vec<Record>,
    /// Absent when the store has no further continuation
    pub last_evaluated_key: Option<Cursor>,
}

/// A store reachable through query and conditional-write requests
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn query(&self, query: Query) -> Result<QueryOutput, StoreError>;

    /// Fails with `ConditionalCheckFailed` when the condition does not hold
    async fn conditional_put(&self, put: ConditionalPut) -> Result<(), StoreError>;

    /// Adds `delta` to the attribute and returns the updated value
    async fn increment(&self, increment: Increment) -> Result<i64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_rejects_other_partition() {
        let cursor = Cursor::new(SortView::Recency, "curiosity+fcam", 10, "a");
        assert!(cursor.check(SortView::Recency, "curiosity+fcam").is_ok());
        assert!(matches!(
            cursor.check(SortView::Recency, "curiosity+mahli"),
            Err(StoreError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_cursor_rejects_other_view() {
        let cursor = Cursor::new(SortView::Recency, "curiosity+fcam", 10, "a");
        assert!(matches!(
            cursor.check(SortView::Popularity, "curiosity+fcam"),
            Err(StoreError::InvalidCursor(_))
        ));
    }
}
