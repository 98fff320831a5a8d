//! Document storage layer.
//!
//! [`DocumentStore`] is the storage surface the lifecycle services depend on;
//! [`Database`] implements it on SQLite.

mod documents;
mod schema;

pub use schema::*;

use rusqlite::Connection;
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Storage collaborator used by the lifecycle services.
///
/// Documents live in named collections. `update` and `delete` report a
/// missing id as `Ok(false)`; `get_by_id` reports it as `Ok(None)`.
pub trait DocumentStore {
    /// Store a new document and return its id.
    ///
    /// The document's `id` member is used when it is a non-empty string,
    /// otherwise a fresh id is assigned and written into the stored body.
    fn add(&self, collection: &str, document: &Document) -> DbResult<String>;

    fn get_by_id(&self, collection: &str, id: &str) -> DbResult<Option<Document>>;

    /// All documents of a collection matching `predicate`, in insertion order.
    fn get_by_filter(
        &self,
        collection: &str,
        predicate: &dyn Fn(&Document) -> bool,
    ) -> DbResult<Vec<Document>>;

    fn get_all(&self, collection: &str) -> DbResult<Vec<Document>> {
        self.get_by_filter(collection, &|_| true)
    }

    /// Set the members of `patch` on the stored document.
    fn update(&self, collection: &str, id: &str, patch: &Document) -> DbResult<bool>;

    fn delete(&self, collection: &str, id: &str) -> DbResult<bool>;
}

/// SQLite-backed [`DocumentStore`]. Every collection shares the single
/// `documents` table, partitioned by collection name.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the document store file at `path`, creating the file and its
    /// schema when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::with_schema(Connection::open(path)?)
    }

    /// Open a private in-memory document store.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Names of the collections holding at least one document, sorted.
    pub fn collections(&self) -> DbResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT collection FROM documents ORDER BY collection")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}
