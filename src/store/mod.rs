//! Remote store abstraction.
//!
//! Models the hosted backend the meeting app syncs against: three tables of
//! JSON rows with CRUD operations, a per-table change feed that fires on any
//! insert/update/delete, and a photo blob store. Consumers reconcile local
//! caches from the feed; see `crate::sync`.

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// The tables the backend exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Participants,
    Captions,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Participants => "participants",
            Self::Captions => "captions",
        }
    }

    /// Columns that identify a row for insert/upsert conflict resolution.
    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Users => &["id"],
            Self::Participants => &["meeting_id", "user_id"],
            Self::Captions => &["id"],
        }
    }
}

/// A typed row belonging to one fixed table.
pub trait Row: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: Table;

    /// Stable cache key. Must agree with `Table::key_columns`.
    fn key(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change-feed notification. Carries no row payload: subscribers reload
/// the whole table, which sidesteps ordering races across concurrent writes.
#[derive(Debug, Clone, Copy)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
}

/// Conjunction of column equality conditions.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether a row matches every condition.
    pub fn matches(&self, row: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

/// Error taxonomy for store and store-adjacent operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("validation failed: {0}")]
    ValidationFailure(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::RemoteUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::RemoteUnavailable(format!("malformed row: {err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Hosted backend interface: CRUD over JSON rows plus a change feed and photo
/// blob storage. All mutations fire a `ChangeEvent` on success.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch all rows matching the filter, in the backend's response order.
    async fn select(&self, table: Table, filter: &Filter) -> StoreResult<Vec<Value>>;

    async fn insert(&self, table: Table, row: Value) -> StoreResult<()>;

    /// Merge `patch` into every row matching the filter.
    async fn update(&self, table: Table, filter: &Filter, patch: Value) -> StoreResult<()>;

    /// Insert, or replace the row with the same key columns.
    async fn upsert(&self, table: Table, row: Value) -> StoreResult<()>;

    async fn delete(&self, table: Table, filter: &Filter) -> StoreResult<()>;

    /// Register for change notifications on one table.
    fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeEvent>;

    /// Store a user photo and return its public URL.
    async fn store_photo(
        &self,
        user_id: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> StoreResult<String>;
}

/// Serialize a typed row for the store.
pub fn to_row<T: Row>(row: &T) -> StoreResult<Value> {
    serde_json::to_value(row).map_err(StoreError::from)
}

/// Deserialize a stored row back into its type.
pub fn from_row<T: Row>(value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(StoreError::from)
}
