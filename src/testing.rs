//! Test doubles and fixtures shared by the unit tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::config::ExplorerConfig;
use crate::error::{QueryError, StoreError};
use crate::feed::scroll::PageSource;
use crate::state::data::{Photo, Record};
use crate::state::library::Library;
use crate::state::query::Page;
use crate::state::store::{
    ConditionalPut, Cursor, Increment, KeyValueStore, PutCondition, Query, QueryOutput,
    IMAGE_ID_ATTRIBUTE,
};

pub fn photo(id: &str, captured_at: i64) -> Photo {
    Photo {
        image_id: id.to_string(),
        mission_instrument: "curiosity+fcam".to_string(),
        captured_at,
        received_at: None,
        votes: 0,
        url: None,
        thumbnail: None,
        metadata: Record::new(),
    }
}

pub fn page(items: Vec<Photo>, next_cursor: Option<Cursor>) -> Page<Photo> {
    Page { items, next_cursor }
}

pub async fn insert_photo(library: &Library, photo: &Photo) {
    library
        .conditional_put(ConditionalPut {
            table: ExplorerConfig::default().photos_table,
            item: photo.to_record().unwrap(),
            condition: PutCondition::AttributeNotExists(IMAGE_ID_ATTRIBUTE.to_string()),
        })
        .await
        .unwrap();
}

/// `count` photos in `partition`, captured one second apart, with tied vote counts
pub async fn seed_photos(library: &Library, partition: &str, count: usize) -> Vec<Photo> {
    let mut photos = Vec::with_capacity(count);
    for i in 0..count {
        let mut p = photo(&format!("{partition}-{i:03}"), (i as i64 + 1) * 1_000);
        p.mission_instrument = partition.to_string();
        p.votes = (i % 3) as i64;
        insert_photo(library, &p).await;
        photos.push(p);
    }
    photos
}

/// Delegates to a real catalog but fails every counter increment
pub struct FailingIncrementStore {
    inner: Arc<Library>,
}

impl FailingIncrementStore {
    pub fn new(inner: Arc<Library>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl KeyValueStore for FailingIncrementStore {
    async fn query(&self, query: Query) -> Result<QueryOutput, StoreError> {
        self.inner.query(query).await
    }

    async fn conditional_put(&self, put: ConditionalPut) -> Result<(), StoreError> {
        self.inner.conditional_put(put).await
    }

    async fn increment(&self, _increment: Increment) -> Result<i64, StoreError> {
        Err(StoreError::Unavailable("injected increment failure".to_string()))
    }
}

/// Page source replaying canned responses.
///
/// A gated source signals `started` when a fetch begins and holds it until
/// `release` is called, so tests can observe a feed while it is busy.
#[derive(Clone)]
pub struct ScriptedSource {
    inner: Arc<Scripted>,
}

struct Scripted {
    responses: Mutex<VecDeque<Result<Page<Photo>, QueryError>>>,
    cursors: Mutex<Vec<Option<Cursor>>>,
    calls: AtomicUsize,
    gated: bool,
    started: Notify,
    release: Notify,
}

impl ScriptedSource {
    pub fn new(responses: Vec<Result<Page<Photo>, QueryError>>) -> Self {
        Self::build(responses, false)
    }

    pub fn gated(responses: Vec<Result<Page<Photo>, QueryError>>) -> Self {
        Self::build(responses, true)
    }

    fn build(responses: Vec<Result<Page<Photo>, QueryError>>, gated: bool) -> Self {
        Self {
            inner: Arc::new(Scripted {
                responses: Mutex::new(responses.into()),
                cursors: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                gated,
                started: Notify::new(),
                release: Notify::new(),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Cursor passed to each fetch, in call order
    pub fn cursors(&self) -> Vec<Option<Cursor>> {
        self.inner.cursors.lock().unwrap().clone()
    }

    pub async fn started(&self) {
        self.inner.started.notified().await;
    }

    pub fn release(&self) {
        self.inner.release.notify_one();
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    type Item = Photo;

    async fn fetch(&self, cursor: Option<Cursor>) -> Result<Page<Photo>, QueryError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.cursors.lock().unwrap().push(cursor);
        self.inner.started.notify_one();

        if self.inner.gated {
            self.inner.release.notified().await;
        }

        let next = self.inner.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(page(Vec::new(), None)))
    }
}
