//! One vote per user and photo
//!
//! A vote is two writes: a conditional put of the (user, photo) vote record,
//! then an additive increment of the photo's counter. The put is the
//! authoritative record; if the increment fails afterwards the caller gets
//! `VoteError::PartialWrite` and the counter is left for reconciliation.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::data::{Photo, UserContext, UserVote};
use super::store::{
    ConditionalPut, Increment, KeyCondition, KeyValueStore, PutCondition, IMAGE_ID_ATTRIBUTE,
    VOTES_ATTRIBUTE,
};
use crate::config::ExplorerConfig;
use crate::error::{StoreError, ValidationError, VoteError};

/// A validated vote, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct VoteRequest {
    vote: UserVote,
}

impl VoteRequest {
    pub fn new(user: &UserContext, photo: &Photo) -> Result<Self, ValidationError> {
        if photo.image_id.trim().is_empty() {
            return Err(ValidationError::MissingImageId);
        }
        Ok(Self {
            vote: UserVote::from_photo(user, photo, Utc::now().timestamp_millis()),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.vote.user_id
    }

    pub fn image_id(&self) -> &str {
        &self.vote.image_id
    }
}

/// Outcome of a counted vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub image_id: String,
    /// The photo's vote count after this vote
    pub votes: i64,
}

#[derive(Clone)]
pub struct VoteCoordinator {
    store: Arc<dyn KeyValueStore>,
    photos_table: String,
    user_votes_table: String,
}

impl VoteCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &ExplorerConfig) -> Self {
        Self {
            store,
            photos_table: config.photos_table.clone(),
            user_votes_table: config.user_votes_table.clone(),
        }
    }

    /// Convenience for `vote(VoteRequest::new(user, photo)?)`
    pub async fn vote_on(&self, user: &UserContext, photo: &Photo) -> Result<VoteReceipt, VoteError> {
        self.vote(VoteRequest::new(user, photo)?).await
    }

    pub async fn vote(&self, request: VoteRequest) -> Result<VoteReceipt, VoteError> {
        let user_id = request.user_id().to_string();
        let image_id = request.image_id().to_string();
        debug!("Voting on {} as {}", image_id, user_id);

        let item = request
            .vote
            .to_record()
            .map_err(|e| VoteError::Transient(StoreError::from(e)))?;

        let put = ConditionalPut {
            table: self.user_votes_table.clone(),
            item,
            condition: PutCondition::AttributeNotExists(IMAGE_ID_ATTRIBUTE.to_string()),
        };

        match self.store.conditional_put(put).await {
            Ok(()) => debug!("Vote record created for {}", image_id),
            Err(StoreError::ConditionalCheckFailed { .. }) => {
                info!("{} has already voted on {}", user_id, image_id);
                return Err(VoteError::AlreadyVoted { user_id, image_id });
            }
            Err(e) => return Err(VoteError::Transient(e)),
        }

        // Not retried: a blind retry could count the vote twice
        let increment = Increment {
            table: self.photos_table.clone(),
            key: KeyCondition {
                attribute: IMAGE_ID_ATTRIBUTE.to_string(),
                value: image_id.clone(),
            },
            attribute: VOTES_ATTRIBUTE.to_string(),
            delta: 1,
        };

        match self.store.increment(increment).await {
            Ok(votes) => {
                info!("Vote counted on {}, now {} votes", image_id, votes);
                Ok(VoteReceipt { image_id, votes })
            }
            Err(source) => {
                warn!(
                    "Vote by {} on {} recorded but the counter was not incremented: {}",
                    user_id, image_id, source
                );
                Err(VoteError::PartialWrite {
                    user_id,
                    image_id,
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for VoteCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteCoordinator")
            .field("photos_table", &self.photos_table)
            .field("user_votes_table", &self.user_votes_table)
            .finish()
    }
}
