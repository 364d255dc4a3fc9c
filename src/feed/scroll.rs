use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::QueryError;
use crate::state::data::{Photo, UserVote};
use crate::state::query::Page;
use crate::state::store::Cursor;

/// Something a feed can hold. The key must be unique within one listing.
pub trait FeedItem: Clone + Send + Sync + 'static {
    fn feed_key(&self) -> &str;
}

impl FeedItem for Photo {
    fn feed_key(&self) -> &str {
        &self.image_id
    }
}

impl FeedItem for UserVote {
    fn feed_key(&self) -> &str {
        &self.image_id
    }
}

/// The query a feed is bound to: one view, one partition key
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: FeedItem;

    async fn fetch(&self, cursor: Option<Cursor>) -> Result<Page<Self::Item>, QueryError>;
}

/// Scroll position reported by the view, in any consistent unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollGeometry {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub content_height: f64,
    /// Offset of the feed's content from the top of the scrolled area
    pub content_top: f64,
}

impl ScrollGeometry {
    pub fn new(scroll_top: f64, viewport_height: f64, content_height: f64, content_top: f64) -> Self {
        Self {
            scroll_top,
            viewport_height,
            content_height,
            content_top,
        }
    }

    /// Whether the viewport's bottom edge has reached the end of the content
    pub fn is_near_bottom(&self) -> bool {
        self.scroll_top + self.viewport_height >= self.content_height - self.content_top
    }
}

/// What a call to `request_more` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A page arrived and was appended
    Fetched { appended: usize, exhausted: bool },
    /// Another fetch is still in flight; nothing was issued
    InFlight,
    /// The last page was already received; nothing was issued
    Exhausted,
    /// The scroll signal was not close enough to the bottom
    NotNearBottom,
}

struct FeedState<T> {
    items: Vec<T>,
    seen: HashSet<String>,
    cursor: Option<Cursor>,
    busy: bool,
    exhausted: bool,
}

/// Incrementally loaded, append-only listing.
///
/// At most one fetch is outstanding at a time: `busy` is claimed before the
/// query is issued and released when it resolves, fails, or is dropped.
/// Reaching the last page sets the sticky `exhausted` flag; a feed for a
/// different partition key is a new `ScrollFeed`.
pub struct ScrollFeed<S: PageSource> {
    source: S,
    state: Mutex<FeedState<S::Item>>,
}

/// Releases `busy` however the fetch ends
struct BusyGuard<'a, T> {
    state: &'a Mutex<FeedState<T>>,
}

impl<T> Drop for BusyGuard<'_, T> {
    fn drop(&mut self) {
        lock_state(self.state).busy = false;
    }
}

fn lock_state<T>(state: &Mutex<FeedState<T>>) -> MutexGuard<'_, FeedState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: PageSource> ScrollFeed<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: Mutex::new(FeedState {
                items: Vec::new(),
                seen: HashSet::new(),
                cursor: None,
                busy: false,
                exhausted: false,
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Snapshot of the loaded items, in arrival order
    pub fn items(&self) -> Vec<S::Item> {
        lock_state(&self.state).items.clone()
    }

    pub fn len(&self) -> usize {
        lock_state(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_busy(&self) -> bool {
        lock_state(&self.state).busy
    }

    pub fn is_exhausted(&self) -> bool {
        lock_state(&self.state).exhausted
    }

    pub fn cursor(&self) -> Option<Cursor> {
        lock_state(&self.state).cursor.clone()
    }

    /// Apply `f` to the loaded item with this key. Returns false if absent.
    pub fn update_item(&self, key: &str, f: impl FnOnce(&mut S::Item)) -> bool {
        let mut state = lock_state(&self.state);
        match state.items.iter_mut().find(|item| item.feed_key() == key) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    /// Fetch the next page unless one is in flight or the feed is exhausted.
    ///
    /// On failure the items and cursor are untouched and the feed can be
    /// asked again; nothing is retried here.
    pub async fn request_more(&self) -> Result<FetchOutcome, QueryError> {
        let cursor = {
            let mut state = lock_state(&self.state);
            if state.busy {
                debug!("Fetch already in flight, ignoring request");
                return Ok(FetchOutcome::InFlight);
            }
            if state.exhausted {
                return Ok(FetchOutcome::Exhausted);
            }
            state.busy = true;
            state.cursor.clone()
        };
        let _busy = BusyGuard { state: &self.state };

        debug!("Fetching more items (continuing: {})", cursor.is_some());
        let page = match self.source.fetch(cursor).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Feed fetch failed, items kept: {}", e);
                return Err(e);
            }
        };

        let mut state = lock_state(&self.state);
        let received = page.items.len();
        let mut appended = 0;
        for item in page.items {
            if state.seen.insert(item.feed_key().to_string()) {
                state.items.push(item);
                appended += 1;
            }
        }
        if appended < received {
            debug!("Dropped {} items already in the feed", received - appended);
        }

        state.exhausted = page.next_cursor.is_none();
        state.cursor = page.next_cursor;
        let exhausted = state.exhausted;
        drop(state);

        debug!("Appended {} items, exhausted: {}", appended, exhausted);
        Ok(FetchOutcome::Fetched {
            appended,
            exhausted,
        })
    }

    /// `request_more`, abandoned after `timeout`. An abandoned fetch releases
    /// `busy` so the next scroll can try again.
    pub async fn request_more_within(&self, timeout: Duration) -> Result<FetchOutcome, QueryError> {
        match tokio::time::timeout(timeout, self.request_more()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Feed fetch timed out after {:?}", timeout);
                Err(QueryError::Timeout(timeout))
            }
        }
    }

    /// Fetch more if the viewport has reached the end of the content
    pub async fn on_scroll_signal(&self, geometry: ScrollGeometry) -> Result<FetchOutcome, QueryError> {
        if !geometry.is_near_bottom() {
            return Ok(FetchOutcome::NotNearBottom);
        }
        self.request_more().await
    }
}

impl<S: PageSource> fmt::Debug for ScrollFeed<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock_state(&self.state);
        f.debug_struct("ScrollFeed")
            .field("items", &state.items.len())
            .field("busy", &state.busy)
            .field("exhausted", &state.exhausted)
            .field("has_cursor", &state.cursor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::state::store::SortView;
    use crate::testing::{page, photo, ScriptedSource};

    fn cursor(id: &str) -> Cursor {
        Cursor::new(SortView::Recency, "curiosity+fcam", 0, id)
    }

    #[test]
    fn test_geometry_threshold() {
        // content ends at 1000 - 100 = 900 from the scroll origin
        assert!(!ScrollGeometry::new(0.0, 600.0, 1000.0, 100.0).is_near_bottom());
        assert!(ScrollGeometry::new(300.0, 600.0, 1000.0, 100.0).is_near_bottom());
        assert!(ScrollGeometry::new(450.0, 600.0, 1000.0, 100.0).is_near_bottom());
    }

    #[tokio::test]
    async fn test_short_last_page_exhausts_feed() {
        let source = ScriptedSource::new(vec![Ok(page(vec![photo("a", 2), photo("b", 1)], None))]);
        let feed = ScrollFeed::new(source.clone());

        let outcome = feed.request_more().await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                appended: 2,
                exhausted: true
            }
        );
        assert_eq!(feed.len(), 2);
        assert!(feed.is_exhausted());

        assert_eq!(feed.request_more().await.unwrap(), FetchOutcome::Exhausted);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_request_while_busy_is_ignored() {
        let source = ScriptedSource::gated(vec![Ok(page(vec![photo("a", 1)], Some(cursor("a"))))]);
        let feed = ScrollFeed::new(source.clone());

        let first = feed.request_more();
        let second = async {
            source.started().await;
            assert!(feed.is_busy());
            let outcome = feed.request_more().await.unwrap();
            assert_eq!(feed.len(), 0);
            source.release();
            outcome
        };

        let (first, second) = tokio::join!(first, second);
        assert_eq!(second, FetchOutcome::InFlight);
        assert_eq!(
            first.unwrap(),
            FetchOutcome::Fetched {
                appended: 1,
                exhausted: false
            }
        );
        assert_eq!(source.calls(), 1);
        assert!(!feed.is_busy());
    }

    #[tokio::test]
    async fn test_failure_keeps_items_and_cursor() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![photo("a", 3)], Some(cursor("a")))),
            Err(QueryError::Transient(StoreError::Unavailable("offline".to_string()))),
            Ok(page(vec![photo("b", 2)], None)),
        ]);
        let feed = ScrollFeed::new(source.clone());

        feed.request_more().await.unwrap();
        assert!(feed.request_more().await.is_err());
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.cursor(), Some(cursor("a")));
        assert!(!feed.is_busy());
        assert!(!feed.is_exhausted());

        feed.request_more().await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(source.cursors(), vec![None, Some(cursor("a")), Some(cursor("a"))]);
    }

    #[tokio::test]
    async fn test_empty_page_with_cursor_is_followed() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![], Some(cursor("x")))),
            Ok(page(vec![photo("a", 1)], None)),
        ]);
        let feed = ScrollFeed::new(source.clone());

        assert_eq!(
            feed.request_more().await.unwrap(),
            FetchOutcome::Fetched {
                appended: 0,
                exhausted: false
            }
        );
        feed.request_more().await.unwrap();
        assert_eq!(feed.len(), 1);
        assert!(feed.is_exhausted());
        assert_eq!(source.cursors(), vec![None, Some(cursor("x"))]);
    }

    #[tokio::test]
    async fn test_repeated_items_are_not_appended_twice() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![photo("a", 3), photo("b", 2)], Some(cursor("b")))),
            Ok(page(vec![photo("b", 2), photo("c", 1)], None)),
        ]);
        let feed = ScrollFeed::new(source);

        feed.request_more().await.unwrap();
        let outcome = feed.request_more().await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                appended: 1,
                exhausted: true
            }
        );
        let ids: Vec<_> = feed.items().into_iter().map(|p| p.image_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_far_from_bottom_never_fetches() {
        let source = ScriptedSource::new(vec![]);
        let feed = ScrollFeed::new(source.clone());

        for scroll_top in [0.0, 50.0, 100.0] {
            let outcome = feed
                .on_scroll_signal(ScrollGeometry::new(scroll_top, 600.0, 1000.0, 100.0))
                .await
                .unwrap();
            assert_eq!(outcome, FetchOutcome::NotNearBottom);
        }
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_repeated_signals_while_busy_fetch_once() {
        let source = ScriptedSource::gated(vec![Ok(page(vec![photo("a", 1)], Some(cursor("a"))))]);
        let feed = ScrollFeed::new(source.clone());
        let bottom = ScrollGeometry::new(400.0, 600.0, 1000.0, 100.0);

        let first = feed.on_scroll_signal(bottom);
        let repeats = async {
            source.started().await;
            let mut outcomes = Vec::new();
            for _ in 0..3 {
                outcomes.push(feed.on_scroll_signal(bottom).await.unwrap());
            }
            source.release();
            outcomes
        };

        let (first, repeats) = tokio::join!(first, repeats);
        assert!(matches!(first.unwrap(), FetchOutcome::Fetched { appended: 1, .. }));
        assert!(repeats.iter().all(|o| *o == FetchOutcome::InFlight));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_fetch_releases_busy() {
        let source = ScriptedSource::gated(vec![Ok(page(vec![photo("a", 1)], None))]);
        let feed = ScrollFeed::new(source.clone());

        let err = feed
            .request_more_within(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout(_)));
        assert!(!feed.is_busy());
        assert!(feed.is_empty());
        assert_eq!(feed.cursor(), None);
    }

    #[tokio::test]
    async fn test_update_item() {
        let source = ScriptedSource::new(vec![Ok(page(vec![photo("a", 1)], None))]);
        let feed = ScrollFeed::new(source);
        feed.request_more().await.unwrap();

        assert!(feed.update_item("a", |p| p.votes = 42));
        assert!(!feed.update_item("zzz", |p| p.votes = 0));
        assert_eq!(feed.items()[0].votes, 42);
    }
}
