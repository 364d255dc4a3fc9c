//! Feed controllers
//!
//! A controller binds one `ScrollFeed` to one listing: the recency timeline,
//! the top-voted gallery, or a user's favorites. The listing value carries
//! the navigation state (mission+instrument, time bound, user). Navigating
//! to a different listing always starts a fresh feed, so a cursor is never
//! carried from one partition key to another.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::scroll::{FetchOutcome, PageSource, ScrollFeed, ScrollGeometry};
use crate::config::ExplorerConfig;
use crate::error::{QueryError, ValidationError, VoteError};
use crate::state::data::{MissionInstrument, Photo, UserContext, UserVote};
use crate::state::query::{Page, PopularityQuery, QueryCursorClient, RecencyQuery, UserVotesQuery};
use crate::state::store::Cursor;
use crate::state::vote::{VoteCoordinator, VoteReceipt};

/// Navigation state that selects one query shape
pub trait Listing: Clone + PartialEq + fmt::Debug + Send + Sync {
    type Source: PageSource;

    fn source(&self, client: &QueryCursorClient) -> Result<Self::Source, ValidationError>;
}

/// Recency timeline of one instrument, optionally starting at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineNav {
    pub mission_instrument: MissionInstrument,
    /// Only photos captured at or before this time (ms since epoch)
    pub time: Option<i64>,
}

impl TimelineNav {
    pub fn new(mission_instrument: MissionInstrument, time: Option<i64>) -> Self {
        Self {
            mission_instrument,
            time,
        }
    }

    /// Build from route parameters. A missing instrument falls back to the
    /// configured default; a time that is not a positive integer is ignored.
    pub fn from_route(config: &ExplorerConfig, instrument: Option<&str>, time: Option<&str>) -> Self {
        let time = time.and_then(|raw| match raw.parse::<i64>() {
            Ok(time) if time > 0 => Some(time),
            _ => {
                error!("Failed to parse time parameter: {}", raw);
                None
            }
        });

        Self::new(route_partition(config, instrument), time)
    }
}

/// Most-voted photos of one instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopVotedNav {
    pub mission_instrument: MissionInstrument,
    pub max_votes: Option<i64>,
}

impl TopVotedNav {
    pub fn new(mission_instrument: MissionInstrument) -> Self {
        Self {
            mission_instrument,
            max_votes: None,
        }
    }

    pub fn from_route(config: &ExplorerConfig, instrument: Option<&str>) -> Self {
        Self::new(route_partition(config, instrument))
    }
}

/// Photos one user has voted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavoritesNav {
    pub user: UserContext,
}

fn route_partition(config: &ExplorerConfig, instrument: Option<&str>) -> MissionInstrument {
    let instrument = instrument
        .filter(|i| !i.is_empty())
        .unwrap_or(&config.default_instrument);
    MissionInstrument::new(&config.default_mission, instrument)
}

pub struct RecencySource {
    client: QueryCursorClient,
    request: RecencyQuery,
}

#[async_trait]
impl PageSource for RecencySource {
    type Item = Photo;

    async fn fetch(&self, cursor: Option<Cursor>) -> Result<Page<Photo>, QueryError> {
        self.client
            .query_by_recency(self.request.clone().after(cursor))
            .await
    }
}

pub struct PopularitySource {
    client: QueryCursorClient,
    request: PopularityQuery,
}

#[async_trait]
impl PageSource for PopularitySource {
    type Item = Photo;

    async fn fetch(&self, cursor: Option<Cursor>) -> Result<Page<Photo>, QueryError> {
        self.client
            .query_by_popularity(self.request.clone().after(cursor))
            .await
    }
}

pub struct UserVotesSource {
    client: QueryCursorClient,
    request: UserVotesQuery,
}

#[async_trait]
impl PageSource for UserVotesSource {
    type Item = UserVote;

    async fn fetch(&self, cursor: Option<Cursor>) -> Result<Page<UserVote>, QueryError> {
        self.client
            .query_user_votes(self.request.clone().after(cursor))
            .await
    }
}

impl Listing for TimelineNav {
    type Source = RecencySource;

    fn source(&self, client: &QueryCursorClient) -> Result<RecencySource, ValidationError> {
        Ok(RecencySource {
            client: client.clone(),
            request: RecencyQuery::new(self.mission_instrument.to_string())?.before(self.time),
        })
    }
}

impl Listing for TopVotedNav {
    type Source = PopularitySource;

    fn source(&self, client: &QueryCursorClient) -> Result<PopularitySource, ValidationError> {
        Ok(PopularitySource {
            client: client.clone(),
            request: PopularityQuery::new(self.mission_instrument.to_string())?
                .at_most(self.max_votes),
        })
    }
}

impl Listing for FavoritesNav {
    type Source = UserVotesSource;

    fn source(&self, client: &QueryCursorClient) -> Result<UserVotesSource, ValidationError> {
        Ok(UserVotesSource {
            client: client.clone(),
            request: UserVotesQuery::new(self.user.user_id())?,
        })
    }
}

pub struct FeedController<L: Listing> {
    client: QueryCursorClient,
    listing: L,
    feed: Arc<ScrollFeed<L::Source>>,
    fetch_timeout: Option<Duration>,
}

pub type TimelineFeed = FeedController<TimelineNav>;
pub type TopVotedFeed = FeedController<TopVotedNav>;
pub type FavoritesFeed = FeedController<FavoritesNav>;

impl<L: Listing> FeedController<L> {
    pub fn new(client: QueryCursorClient, listing: L) -> Result<Self, ValidationError> {
        let feed = Arc::new(ScrollFeed::new(listing.source(&client)?));
        Ok(Self {
            client,
            listing,
            feed,
            fetch_timeout: None,
        })
    }

    /// Abandon fetches that take longer than `timeout`
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn listing(&self) -> &L {
        &self.listing
    }

    /// The current feed. Fetches already running on it keep it alive after a
    /// navigation, but their results never reach the replacement feed.
    pub fn feed(&self) -> Arc<ScrollFeed<L::Source>> {
        Arc::clone(&self.feed)
    }

    /// Switch to `listing`. Returns true if the feed was replaced.
    pub fn navigate(&mut self, listing: L) -> Result<bool, ValidationError> {
        if listing == self.listing {
            return Ok(false);
        }

        let feed = Arc::new(ScrollFeed::new(listing.source(&self.client)?));
        info!("Navigating from {:?} to {:?}, starting a fresh feed", self.listing, listing);
        self.listing = listing;
        self.feed = feed;
        Ok(true)
    }

    pub async fn load_more(&self) -> Result<FetchOutcome, QueryError> {
        match self.fetch_timeout {
            Some(timeout) => self.feed.request_more_within(timeout).await,
            None => self.feed.request_more().await,
        }
    }

    pub async fn on_scroll(&self, geometry: ScrollGeometry) -> Result<FetchOutcome, QueryError> {
        if !geometry.is_near_bottom() {
            return Ok(FetchOutcome::NotNearBottom);
        }
        self.load_more().await
    }
}

impl<L> FeedController<L>
where
    L: Listing,
    L::Source: PageSource<Item = Photo>,
{
    /// Vote on a photo and reflect the new count in the loaded items
    pub async fn vote(
        &self,
        coordinator: &VoteCoordinator,
        user: &UserContext,
        photo: &Photo,
    ) -> Result<VoteReceipt, VoteError> {
        let receipt = coordinator.vote_on(user, photo).await?;
        self.feed
            .update_item(&receipt.image_id, |p| p.votes = receipt.votes);
        Ok(receipt)
    }
}

impl<L: Listing> fmt::Debug for FeedController<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedController")
            .field("listing", &self.listing)
            .field("feed", &self.feed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::library::Library;
    use crate::testing::seed_photos;
    use std::collections::HashSet;

    fn setup() -> (ExplorerConfig, Arc<Library>, QueryCursorClient) {
        let config = ExplorerConfig::default();
        let library = Arc::new(Library::open_in_memory(&config).unwrap());
        let client = QueryCursorClient::new(library.clone(), &config);
        (config, library, client)
    }

    async fn drain<L: Listing>(controller: &FeedController<L>) -> usize {
        let mut fetches = 0;
        while controller.load_more().await.unwrap() != FetchOutcome::Exhausted {
            fetches += 1;
        }
        fetches
    }

    #[test]
    fn test_route_defaults() {
        let config = ExplorerConfig::default();
        let nav = TimelineNav::from_route(&config, None, None);
        assert_eq!(nav.mission_instrument.to_string(), "curiosity+fcam");
        assert_eq!(nav.time, None);

        let nav = TimelineNav::from_route(&config, Some("mahli"), Some("1400000000000"));
        assert_eq!(nav.mission_instrument.to_string(), "curiosity+mahli");
        assert_eq!(nav.time, Some(1_400_000_000_000));
    }

    #[test]
    fn test_bad_time_parameter_is_ignored() {
        let config = ExplorerConfig::default();
        assert_eq!(TimelineNav::from_route(&config, None, Some("yesterday")).time, None);
        assert_eq!(TimelineNav::from_route(&config, None, Some("-5")).time, None);
        assert_eq!(TimelineNav::from_route(&config, None, Some("0")).time, None);
    }

    #[tokio::test]
    async fn test_timeline_drains_in_order_without_duplicates() {
        let (config, library, client) = setup();
        seed_photos(&library, "curiosity+fcam", 12).await;
        seed_photos(&library, "curiosity+mahli", 4).await;

        let timeline = TimelineFeed::new(client, TimelineNav::from_route(&config, None, None)).unwrap();
        assert_eq!(drain(&timeline).await, 3);

        let items = timeline.feed().items();
        assert_eq!(items.len(), 12);
        assert!(items.windows(2).all(|w| w[0].captured_at >= w[1].captured_at));
        let ids: HashSet<_> = items.iter().map(|p| p.image_id.as_str()).collect();
        assert_eq!(ids.len(), 12);
    }

    #[tokio::test]
    async fn test_top_voted_drains_by_votes() {
        let (config, library, client) = setup();
        seed_photos(&library, "curiosity+fcam", 11).await;

        let top = TopVotedFeed::new(client, TopVotedNav::from_route(&config, Some("fcam"))).unwrap();
        drain(&top).await;

        let items = top.feed().items();
        assert_eq!(items.len(), 11);
        assert!(items.windows(2).all(|w| w[0].votes >= w[1].votes));
        let ids: HashSet<_> = items.iter().map(|p| p.image_id.as_str()).collect();
        assert_eq!(ids.len(), 11);
    }

    #[tokio::test]
    async fn test_time_bound_limits_timeline() {
        let (config, library, client) = setup();
        seed_photos(&library, "curiosity+fcam", 8).await;

        let nav = TimelineNav::from_route(&config, None, Some("4000"));
        let timeline = TimelineFeed::new(client, nav).unwrap();
        drain(&timeline).await;

        let items = timeline.feed().items();
        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|p| p.captured_at <= 4_000));
    }

    #[tokio::test]
    async fn test_navigation_starts_a_fresh_feed() {
        let (config, library, client) = setup();
        seed_photos(&library, "curiosity+fcam", 7).await;
        seed_photos(&library, "curiosity+mahli", 2).await;

        let mut timeline =
            TimelineFeed::new(client, TimelineNav::from_route(&config, None, None)).unwrap();
        timeline.load_more().await.unwrap();
        let old_feed = timeline.feed();
        assert!(old_feed.cursor().is_some());

        assert!(!timeline
            .navigate(TimelineNav::from_route(&config, Some("fcam"), None))
            .unwrap());
        assert!(Arc::ptr_eq(&old_feed, &timeline.feed()));

        assert!(timeline
            .navigate(TimelineNav::from_route(&config, Some("mahli"), None))
            .unwrap());
        let fresh = timeline.feed();
        assert!(fresh.is_empty());
        assert!(fresh.cursor().is_none());

        timeline.load_more().await.unwrap();
        assert_eq!(fresh.len(), 2);
        assert!(fresh
            .items()
            .iter()
            .all(|p| p.mission_instrument == "curiosity+mahli"));
        assert_eq!(old_feed.len(), 5);
    }

    #[tokio::test]
    async fn test_vote_updates_loaded_photo() {
        let (config, library, client) = setup();
        seed_photos(&library, "curiosity+fcam", 3).await;
        let coordinator = VoteCoordinator::new(library.clone(), &config);
        let user = UserContext::new("alice").unwrap();

        let timeline = TimelineFeed::new(client, TimelineNav::from_route(&config, None, None)).unwrap();
        timeline.load_more().await.unwrap();
        let target = timeline.feed().items()[0].clone();

        let receipt = timeline.vote(&coordinator, &user, &target).await.unwrap();
        assert_eq!(receipt.votes, target.votes + 1);
        assert_eq!(timeline.feed().items()[0].votes, target.votes + 1);

        let again = timeline.vote(&coordinator, &user, &target).await.unwrap_err();
        assert!(matches!(again, VoteError::AlreadyVoted { .. }));
        assert_eq!(timeline.feed().items()[0].votes, target.votes + 1);
    }

    #[tokio::test]
    async fn test_favorites_lists_voted_photos() {
        let (config, library, client) = setup();
        let photos = seed_photos(&library, "curiosity+fcam", 8).await;
        let coordinator = VoteCoordinator::new(library.clone(), &config);
        let user = UserContext::new("alice").unwrap();
        for photo in photos.iter().take(7) {
            coordinator.vote_on(&user, photo).await.unwrap();
        }

        let favorites = FavoritesFeed::new(client, FavoritesNav { user }).unwrap();
        drain(&favorites).await;
        let items = favorites.feed().items();
        assert_eq!(items.len(), 7);
        assert!(items.windows(2).all(|w| w[0].voted_at >= w[1].voted_at));
        assert!(items.iter().all(|v| v.user_id == "alice"));
    }

    #[tokio::test]
    async fn test_scroll_far_from_bottom_does_not_load() {
        let (config, library, client) = setup();
        seed_photos(&library, "curiosity+fcam", 3).await;

        let timeline = TimelineFeed::new(client, TimelineNav::from_route(&config, None, None))
            .unwrap()
            .with_fetch_timeout(config.fetch_timeout());
        let outcome = timeline
            .on_scroll(ScrollGeometry::new(0.0, 500.0, 2000.0, 0.0))
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::NotNearBottom);
        assert!(timeline.feed().is_empty());

        let outcome = timeline
            .on_scroll(ScrollGeometry::new(1500.0, 500.0, 2000.0, 0.0))
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Fetched { appended: 3, exhausted: true }));
    }
}
