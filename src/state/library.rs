use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task;
use tracing::{debug, info};

use super::data::{Photo, Record};
use super::store::{
    ConditionalPut, Cursor, Increment, IndexName, KeyValueStore, PutCondition, Query, QueryOutput,
    SortView, IMAGE_ID_ATTRIBUTE, PARTITION_ATTRIBUTE, TIME_ATTRIBUTE, USER_ATTRIBUTE,
    VOTED_AT_ATTRIBUTE, VOTES_ATTRIBUTE,
};
use crate::config::ExplorerConfig;
use crate::error::StoreError;

/// The Library is the SQLite-backed photo catalog.
///
/// It implements the key-value store contract over two tables: photos
/// (with recency and popularity indexes per mission+instrument) and user
/// votes (one row per user and photo).
pub struct Library {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
    tables: Tables,
}

#[derive(Debug, Clone)]
struct Tables {
    photos: String,
    user_votes: String,
}

/// Column layout a query resolves to
struct QueryShape {
    view: SortView,
    table: String,
    partition_column: &'static str,
    sort_column: &'static str,
    /// Photos keep the counter in its own column
    has_votes_column: bool,
}

impl Library {
    /// Open (or create) the catalog database at `path`
    pub fn open(path: &Path, config: &ExplorerConfig) -> Result<Self, StoreError> {
        // Ensure the parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "failed to create data directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        info!("Catalog database opened at {}", path.display());

        Self::with_connection(conn, Some(path.to_path_buf()), config)
    }

    /// A throwaway catalog, used by tests and dry runs
    pub fn open_in_memory(config: &ExplorerConfig) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, None, config)
    }

    fn with_connection(
        conn: Connection,
        db_path: Option<PathBuf>,
        config: &ExplorerConfig,
    ) -> Result<Self, StoreError> {
        let tables = Tables {
            photos: config.photos_table.clone(),
            user_votes: config.user_votes_table.clone(),
        };
        init_schema(&conn, &tables)?;

        Ok(Library {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            tables,
        })
    }

    /// Path to the database file (None for in-memory catalogs)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Get a count of photos in the catalog
    pub fn photo_count(&self) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", self.tables.photos),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Look a photo up by its image ID
    pub fn photo(&self, image_id: &str) -> Result<Option<Photo>, StoreError> {
        let conn = lock(&self.conn)?;
        let row: Option<(String, i64)> = conn
            .query_row(
                &format!(
                    "SELECT record, votes FROM \"{}\" WHERE image_id = ?1",
                    self.tables.photos
                ),
                params![image_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((record, votes)) => {
                let record = photo_record(&record, votes)?;
                Ok(Some(Photo::from_record(record)?))
            }
            None => Ok(None),
        }
    }

    /// Run `f` against the connection on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &Tables) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let tables = self.tables.clone();

        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            f(&conn, &tables)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("Task join error: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|_| StoreError::Unavailable("catalog connection lock poisoned".to_string()))
}

/// Create all tables and indexes if they don't exist.
fn init_schema(conn: &Connection, tables: &Tables) -> Result<(), StoreError> {
    // Photos: the counter lives in its own column so increments stay additive
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                image_id            TEXT PRIMARY KEY,
                mission_instrument  TEXT NOT NULL,
                captured_at         INTEGER NOT NULL,
                votes               INTEGER NOT NULL DEFAULT 0,
                record              TEXT NOT NULL
            )",
            tables.photos
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                user_id     TEXT NOT NULL,
                image_id    TEXT NOT NULL,
                voted_at    INTEGER NOT NULL,
                record      TEXT NOT NULL,
                PRIMARY KEY (user_id, image_id)
            )",
            tables.user_votes
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS \"{0}_date_gsi\"
             ON \"{0}\"(mission_instrument, captured_at DESC, image_id DESC)",
            tables.photos
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS \"{0}_vote_gsi\"
             ON \"{0}\"(mission_instrument, votes DESC, image_id DESC)",
            tables.photos
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS \"{0}_voted_at\"
             ON \"{0}\"(user_id, voted_at DESC, image_id DESC)",
            tables.user_votes
        ),
        [],
    )?;

    debug!("Catalog schema initialized");
    Ok(())
}

impl Tables {
    fn shape_of(&self, query: &Query) -> Result<QueryShape, StoreError> {
        let shape = if query.table == self.photos {
            let (view, sort_column) = match query.index {
                Some(IndexName::Date) => (SortView::Recency, TIME_ATTRIBUTE),
                Some(IndexName::Vote) => (SortView::Popularity, VOTES_ATTRIBUTE),
                None => {
                    return Err(StoreError::UnsupportedCondition(format!(
                        "{} (photos queries need an index)",
                        query.partition.attribute
                    )))
                }
            };
            QueryShape {
                view,
                table: self.photos.clone(),
                partition_column: PARTITION_ATTRIBUTE,
                sort_column,
                has_votes_column: true,
            }
        } else if query.table == self.user_votes {
            if query.index.is_some() {
                return Err(StoreError::UnsupportedCondition(format!(
                    "{} (user votes have no secondary index)",
                    query.partition.attribute
                )));
            }
            QueryShape {
                view: SortView::UserVotes,
                table: self.user_votes.clone(),
                partition_column: USER_ATTRIBUTE,
                sort_column: VOTED_AT_ATTRIBUTE,
                has_votes_column: false,
            }
        } else {
            return Err(StoreError::UnknownTable(query.table.clone()));
        };

        if query.partition.attribute != shape.partition_column {
            return Err(StoreError::UnsupportedCondition(
                query.partition.attribute.clone(),
            ));
        }
        if let Some(sort) = &query.sort {
            if sort.attribute != shape.sort_column {
                return Err(StoreError::UnsupportedCondition(sort.attribute.clone()));
            }
        }

        Ok(shape)
    }
}

fn run_query(conn: &Connection, tables: &Tables, query: &Query) -> Result<QueryOutput, StoreError> {
    let shape = tables.shape_of(query)?;

    if let Some(cursor) = &query.exclusive_start_key {
        cursor.check(shape.view, &query.partition.value)?;
    }

    let (order, cmp) = if query.scan_forward {
        ("ASC", ">")
    } else {
        ("DESC", "<")
    };
    let votes_column = if shape.has_votes_column { "votes" } else { "NULL" };
    let sql = format!(
        "SELECT record, {votes}, {sort}, image_id FROM \"{table}\"
         WHERE {partition} = ?1
           AND (?2 IS NULL OR {sort} <= ?2)
           AND (?3 IS NULL OR {sort} {cmp} ?3 OR ({sort} = ?3 AND image_id {cmp} ?4))
         ORDER BY {sort} {order}, image_id {order}
         LIMIT ?5",
        votes = votes_column,
        sort = shape.sort_column,
        table = shape.table,
        partition = shape.partition_column,
        cmp = cmp,
        order = order,
    );

    // One row of lookahead tells us whether another page exists
    let fetch_limit = query.limit.map(|l| l as i64 + 1).unwrap_or(-1);
    let start = query.exclusive_start_key.as_ref();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![
                query.partition.value,
                query.sort.as_ref().map(|s| s.value),
                start.map(|c| c.sort_value()),
                start.map(|c| c.id().to_string()),
                fetch_limit,
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let more = matches!(query.limit, Some(limit) if rows.len() > limit);
    let keep = query.limit.unwrap_or(rows.len()).min(rows.len());

    let mut items = Vec::with_capacity(keep);
    let mut last_evaluated_key = None;
    for (record, votes, sort_value, id) in rows.into_iter().take(keep) {
        items.push(match votes {
            Some(votes) => photo_record(&record, votes)?,
            None => serde_json::from_str(&record)?,
        });
        if more {
            last_evaluated_key = Some(Cursor::new(
                shape.view,
                &query.partition.value,
                sort_value,
                &id,
            ));
        }
    }

    Ok(QueryOutput {
        items,
        last_evaluated_key,
    })
}

fn run_conditional_put(
    conn: &Connection,
    tables: &Tables,
    put: &ConditionalPut,
) -> Result<(), StoreError> {
    let PutCondition::AttributeNotExists(attribute) = &put.condition;

    let result = if put.table == tables.photos {
        if attribute != IMAGE_ID_ATTRIBUTE {
            return Err(StoreError::UnsupportedCondition(attribute.clone()));
        }
        let mut record = put.item.clone();
        let votes = match record.remove(VOTES_ATTRIBUTE) {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| StoreError::MissingAttribute(VOTES_ATTRIBUTE.to_string()))?,
            None => 0,
        };
        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (image_id, mission_instrument, captured_at, votes, record)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                tables.photos
            ),
            params![
                string_attribute(&record, IMAGE_ID_ATTRIBUTE)?,
                string_attribute(&record, PARTITION_ATTRIBUTE)?,
                number_attribute(&record, TIME_ATTRIBUTE)?,
                votes,
                serde_json::to_string(&record)?,
            ],
        )
    } else if put.table == tables.user_votes {
        if attribute != IMAGE_ID_ATTRIBUTE && attribute != USER_ATTRIBUTE {
            return Err(StoreError::UnsupportedCondition(attribute.clone()));
        }
        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (user_id, image_id, voted_at, record)
                 VALUES (?1, ?2, ?3, ?4)",
                tables.user_votes
            ),
            params![
                string_attribute(&put.item, USER_ATTRIBUTE)?,
                string_attribute(&put.item, IMAGE_ID_ATTRIBUTE)?,
                number_attribute(&put.item, VOTED_AT_ATTRIBUTE)?,
                serde_json::to_string(&put.item)?,
            ],
        )
    } else {
        return Err(StoreError::UnknownTable(put.table.clone()));
    };

    match result {
        Ok(_) => Ok(()),
        // A UNIQUE/PRIMARY KEY violation means the key already exists
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            Err(StoreError::ConditionalCheckFailed {
                table: put.table.clone(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn run_increment(
    conn: &Connection,
    tables: &Tables,
    increment: &Increment,
) -> Result<i64, StoreError> {
    if increment.table != tables.photos {
        return Err(StoreError::UnknownTable(increment.table.clone()));
    }
    if increment.key.attribute != IMAGE_ID_ATTRIBUTE {
        return Err(StoreError::UnsupportedCondition(increment.key.attribute.clone()));
    }
    if increment.attribute != VOTES_ATTRIBUTE {
        return Err(StoreError::UnsupportedCondition(increment.attribute.clone()));
    }

    // Additive update: concurrent increments never overwrite each other
    let updated: Option<i64> = conn
        .query_row(
            &format!(
                "UPDATE \"{}\" SET votes = votes + ?1 WHERE image_id = ?2 RETURNING votes",
                tables.photos
            ),
            params![increment.delta, increment.key.value],
            |row| row.get(0),
        )
        .optional()?;

    updated.ok_or_else(|| StoreError::ItemNotFound {
        table: increment.table.clone(),
        key: increment.key.value.clone(),
    })
}

/// Stored photo JSON with the live counter merged back in
fn photo_record(record: &str, votes: i64) -> Result<Record, StoreError> {
    let mut record: Record = serde_json::from_str(record)?;
    record.insert(VOTES_ATTRIBUTE.to_string(), votes.into());
    Ok(record)
}

fn string_attribute(record: &Record, name: &str) -> Result<String, StoreError> {
    record
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| StoreError::MissingAttribute(name.to_string()))
}

fn number_attribute(record: &Record, name: &str) -> Result<i64, StoreError> {
    record
        .get(name)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| StoreError::MissingAttribute(name.to_string()))
}

#[async_trait]
impl KeyValueStore for Library {
    async fn query(&self, query: Query) -> Result<QueryOutput, StoreError> {
        self.blocking(move |conn, tables| run_query(conn, tables, &query))
            .await
    }

    async fn conditional_put(&self, put: ConditionalPut) -> Result<(), StoreError> {
        self.blocking(move |conn, tables| run_conditional_put(conn, tables, &put))
            .await
    }

    async fn increment(&self, increment: Increment) -> Result<i64, StoreError> {
        self.blocking(move |conn, tables| run_increment(conn, tables, &increment))
            .await
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .field("photos_table", &self.tables.photos)
            .field("user_votes_table", &self.tables.user_votes)
            .finish()
    }
}
