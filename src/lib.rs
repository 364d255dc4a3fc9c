//! Browse rover photos through paginated, scroll-driven feeds and vote on
//! them, one vote per user and photo.

pub mod config;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ExplorerConfig;
pub use error::{ConfigError, IngestError, QueryError, StoreError, ValidationError, VoteError};
pub use feed::controllers::{
    FavoritesFeed, FavoritesNav, FeedController, Listing, TimelineFeed, TimelineNav, TopVotedFeed,
    TopVotedNav,
};
pub use feed::scroll::{FeedItem, FetchOutcome, PageSource, ScrollFeed, ScrollGeometry};
pub use state::data::{Instrument, MissionInstrument, Photo, UserContext, UserVote, INSTRUMENTS};
pub use state::library::Library;
pub use state::query::{Page, PopularityQuery, QueryCursorClient, RecencyQuery, UserVotesQuery};
pub use state::store::{Cursor, KeyValueStore};
pub use state::vote::{VoteCoordinator, VoteReceipt, VoteRequest};
