//! Local store backend over sqlite.
//!
//! Rows live as JSON text in a `data` column keyed by the table's key
//! columns; equality filters compile to `json_extract` conditions. Every
//! successful mutation publishes a `ChangeEvent` on the table's broadcast
//! channel, which is what drives collection reloads.

use rusqlite::Connection;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChangeEvent, ChangeKind, Filter, RemoteStore, StoreError, StoreResult, Table};
use async_trait::async_trait;

const FEED_CAPACITY: usize = 64;

pub struct SqliteStore {
    // Calls are short and never held across an await point.
    conn: Mutex<Connection>,
    photo_dir: PathBuf,
    users_feed: broadcast::Sender<ChangeEvent>,
    participants_feed: broadcast::Sender<ChangeEvent>,
    captions_feed: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    pub fn open(db_path: &Path, photo_dir: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::RemoteUnavailable(e.to_string()))?;
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, photo_dir)
    }

    /// In-memory store, used by tests and throwaway sessions.
    pub fn in_memory(photo_dir: &Path) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, photo_dir)
    }

    fn with_connection(conn: Connection, photo_dir: &Path) -> StoreResult<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            photo_dir: photo_dir.to_path_buf(),
            users_feed: broadcast::channel(FEED_CAPACITY).0,
            participants_feed: broadcast::channel(FEED_CAPACITY).0,
            captions_feed: broadcast::channel(FEED_CAPACITY).0,
        })
    }

    fn feed(&self, table: Table) -> &broadcast::Sender<ChangeEvent> {
        match table {
            Table::Users => &self.users_feed,
            Table::Participants => &self.participants_feed,
            Table::Captions => &self.captions_feed,
        }
    }

    fn notify(&self, table: Table, kind: ChangeKind) {
        // No receivers is fine; nobody has subscribed yet.
        let _ = self.feed(table).send(ChangeEvent { table, kind });
        debug!("store change: {} {:?}", table.as_str(), kind);
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::RemoteUnavailable("store connection poisoned".to_string()))
    }
}

fn migrate(conn: &Connection) -> StoreResult<()> {
    for table in ["users", "participants", "captions"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    key TEXT PRIMARY KEY,
                    data TEXT NOT NULL
                )"
            ),
            [],
        )?;
    }
    Ok(())
}

/// Key columns joined into the row's primary key. Every key column must be a
/// JSON string in the row.
fn row_key(table: Table, row: &Value) -> StoreResult<String> {
    let mut parts = Vec::new();
    for column in table.key_columns() {
        match row.get(*column).and_then(Value::as_str) {
            Some(value) if !value.is_empty() => parts.push(value.to_string()),
            _ => {
                return Err(StoreError::ValidationFailure(format!(
                    "row for table '{}' is missing key column '{}'",
                    table.as_str(),
                    column
                )))
            }
        }
    }
    Ok(parts.join(":"))
}

fn check_column(column: &str) -> StoreResult<()> {
    if column.is_empty()
        || !column
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(StoreError::ValidationFailure(format!(
            "invalid filter column '{column}'"
        )));
    }
    Ok(())
}

/// Filter values bind as sqlite-native types so they compare against what
/// `json_extract` yields (JSON booleans come back as 0/1 integers).
fn bind_value(value: &Value) -> StoreResult<Box<dyn rusqlite::ToSql>> {
    match value {
        Value::Null => Ok(Box::new(rusqlite::types::Null)),
        Value::Bool(b) => Ok(Box::new(*b as i64)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Box::new(i))
            } else {
                Ok(Box::new(n.as_f64().unwrap_or(0.0)))
            }
        }
        Value::String(s) => Ok(Box::new(s.clone())),
        other => Err(StoreError::ValidationFailure(format!(
            "unsupported filter value: {other}"
        ))),
    }
}

fn where_clause(filter: &Filter) -> StoreResult<(String, Vec<Box<dyn rusqlite::ToSql>>)> {
    let mut sql = String::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    for (column, value) in filter.conditions() {
        check_column(column)?;
        if sql.is_empty() {
            sql.push_str(" WHERE ");
        } else {
            sql.push_str(" AND ");
        }
        sql.push_str(&format!("json_extract(data, '$.{column}') = ?"));
        params.push(bind_value(value)?);
    }

    Ok((sql, params))
}

/// Shallow object merge of `patch` into `base`.
fn merge_patch(base: &mut Value, patch: &Value) -> StoreResult<()> {
    let (Some(base_map), Some(patch_map)) = (base.as_object_mut(), patch.as_object()) else {
        return Err(StoreError::ValidationFailure(
            "rows and patches must be JSON objects".to_string(),
        ));
    };
    for (field, value) in patch_map {
        base_map.insert(field.clone(), value.clone());
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn select(&self, table: Table, filter: &Filter) -> StoreResult<Vec<Value>> {
        let (clause, params) = where_clause(filter)?;
        let conn = self.lock()?;

        // rowid order preserves insertion order, which is the arrival order
        // callers rely on for same-timestamp rows.
        let sql = format!("SELECT data FROM {}{} ORDER BY rowid", table.as_str(), clause);
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;

        let mut values = Vec::with_capacity(rows.len());
        for raw in rows {
            values.push(serde_json::from_str(&raw)?);
        }
        Ok(values)
    }

    async fn insert(&self, table: Table, row: Value) -> StoreResult<()> {
        let key = row_key(table, &row)?;
        let data = serde_json::to_string(&row)?;
        {
            let conn = self.lock()?;
            conn.execute(
                &format!("INSERT INTO {} (key, data) VALUES (?1, ?2)", table.as_str()),
                rusqlite::params![key, data],
            )?;
        }
        self.notify(table, ChangeKind::Insert);
        Ok(())
    }

    async fn update(&self, table: Table, filter: &Filter, patch: Value) -> StoreResult<()> {
        let changed = {
            let (clause, params) = where_clause(filter)?;
            let conn = self.lock()?;

            let sql = format!("SELECT key, data FROM {}{}", table.as_str(), clause);
            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let matches = stmt
                .query_map(param_refs.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<(String, String)>, _>>()?;

            for (key, raw) in &matches {
                let mut value: Value = serde_json::from_str(raw)?;
                merge_patch(&mut value, &patch)?;
                conn.execute(
                    &format!("UPDATE {} SET data = ?1 WHERE key = ?2", table.as_str()),
                    rusqlite::params![serde_json::to_string(&value)?, key],
                )?;
            }
            matches.len()
        };

        if changed > 0 {
            self.notify(table, ChangeKind::Update);
        }
        Ok(())
    }

    async fn upsert(&self, table: Table, row: Value) -> StoreResult<()> {
        let key = row_key(table, &row)?;
        let data = serde_json::to_string(&row)?;
        {
            let conn = self.lock()?;
            conn.execute(
                &format!(
                    "INSERT INTO {} (key, data) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET data = excluded.data",
                    table.as_str()
                ),
                rusqlite::params![key, data],
            )?;
        }
        self.notify(table, ChangeKind::Update);
        Ok(())
    }

    async fn delete(&self, table: Table, filter: &Filter) -> StoreResult<()> {
        let deleted = {
            let (clause, params) = where_clause(filter)?;
            let conn = self.lock()?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            conn.execute(
                &format!("DELETE FROM {}{}", table.as_str(), clause),
                param_refs.as_slice(),
            )?
        };

        if deleted > 0 {
            self.notify(table, ChangeKind::Delete);
        }
        Ok(())
    }

    fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
        self.feed(table).subscribe()
    }

    async fn store_photo(
        &self,
        user_id: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> StoreResult<String> {
        let Some(subtype) = content_type.strip_prefix("image/") else {
            return Err(StoreError::ValidationFailure(format!(
                "photo must be an image, got '{content_type}'"
            )));
        };
        // The subtype lands in a filename; refuse anything path-like.
        if subtype.is_empty()
            || !subtype
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
        {
            return Err(StoreError::ValidationFailure(format!(
                "unsupported image subtype '{subtype}'"
            )));
        }

        std::fs::create_dir_all(&self.photo_dir)
            .map_err(|e| StoreError::RemoteUnavailable(e.to_string()))?;

        let path = self.photo_dir.join(format!("{user_id}.{subtype}"));
        std::fs::write(&path, bytes)
            .map_err(|e| StoreError::RemoteUnavailable(e.to_string()))?;

        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::in_memory(dir.path()).unwrap();
        (store, dir)
    }

    fn participant(user_id: &str, speaking: bool) -> Value {
        json!({
            "meeting_id": "main-meeting",
            "user_id": user_id,
            "user_name": user_id.to_uppercase(),
            "photo_url": "",
            "joined_at": "2025-01-01T00:00:00Z",
            "is_speaking": speaking,
            "status": "online",
        })
    }

    #[tokio::test]
    async fn test_insert_and_select_with_filter() {
        let (store, _dir) = store();
        store
            .insert(Table::Participants, participant("u1", false))
            .await
            .unwrap();
        store
            .insert(Table::Participants, participant("u2", true))
            .await
            .unwrap();

        let all = store
            .select(Table::Participants, &Filter::all())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store
            .select(Table::Participants, &Filter::all().eq("user_id", "u2"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["is_speaking"], json!(true));
    }

    #[tokio::test]
    async fn test_boolean_filters_match_json_booleans() {
        let (store, _dir) = store();
        store
            .insert(Table::Participants, participant("u1", true))
            .await
            .unwrap();
        store
            .insert(Table::Participants, participant("u2", false))
            .await
            .unwrap();

        let speaking = store
            .select(Table::Participants, &Filter::all().eq("is_speaking", true))
            .await
            .unwrap();
        assert_eq!(speaking.len(), 1);
        assert_eq!(speaking[0]["user_id"], json!("u1"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_composite_key() {
        let (store, _dir) = store();
        store
            .upsert(Table::Participants, participant("u1", false))
            .await
            .unwrap();
        store
            .upsert(Table::Participants, participant("u1", true))
            .await
            .unwrap();

        let rows = store
            .select(Table::Participants, &Filter::all())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["is_speaking"], json!(true));
    }

    #[tokio::test]
    async fn test_update_merges_patch_into_matches() {
        let (store, _dir) = store();
        store
            .insert(Table::Participants, participant("u1", false))
            .await
            .unwrap();

        store
            .update(
                Table::Participants,
                &Filter::all().eq("user_id", "u1"),
                json!({"is_speaking": true}),
            )
            .await
            .unwrap();

        let rows = store
            .select(Table::Participants, &Filter::all())
            .await
            .unwrap();
        assert_eq!(rows[0]["is_speaking"], json!(true));
        // Untouched fields survive the patch.
        assert_eq!(rows[0]["user_name"], json!("U1"));
    }

    #[tokio::test]
    async fn test_delete_with_filter() {
        let (store, _dir) = store();
        store
            .insert(Table::Participants, participant("u1", false))
            .await
            .unwrap();
        store
            .insert(Table::Participants, participant("u2", false))
            .await
            .unwrap();

        store
            .delete(Table::Participants, &Filter::all().eq("user_id", "u1"))
            .await
            .unwrap();

        let rows = store
            .select(Table::Participants, &Filter::all())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_id"], json!("u2"));
    }

    #[tokio::test]
    async fn test_mutations_fire_change_events() {
        let (store, _dir) = store();
        let mut feed = store.subscribe(Table::Participants);

        store
            .insert(Table::Participants, participant("u1", false))
            .await
            .unwrap();
        let event = feed.try_recv().unwrap();
        assert_eq!(event.table, Table::Participants);
        assert_eq!(event.kind, ChangeKind::Insert);

        store
            .update(
                Table::Participants,
                &Filter::all().eq("user_id", "u1"),
                json!({"is_speaking": true}),
            )
            .await
            .unwrap();
        assert_eq!(feed.try_recv().unwrap().kind, ChangeKind::Update);

        store
            .delete(Table::Participants, &Filter::all().eq("user_id", "u1"))
            .await
            .unwrap();
        assert_eq!(feed.try_recv().unwrap().kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn test_update_without_matches_is_silent() {
        let (store, _dir) = store();
        let mut feed = store.subscribe(Table::Participants);

        store
            .update(
                Table::Participants,
                &Filter::all().eq("user_id", "ghost"),
                json!({"is_speaking": true}),
            )
            .await
            .unwrap();

        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_insert_missing_key_column_is_rejected() {
        let (store, _dir) = store();
        let result = store
            .insert(Table::Users, json!({"email": "x@example.com"}))
            .await;
        assert!(matches!(result, Err(StoreError::ValidationFailure(_))));
    }

    #[tokio::test]
    async fn test_select_preserves_insertion_order() {
        let (store, _dir) = store();
        for i in 0..5 {
            store
                .insert(Table::Participants, participant(&format!("u{i}"), false))
                .await
                .unwrap();
        }

        let rows = store
            .select(Table::Participants, &Filter::all())
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r["user_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["u0", "u1", "u2", "u3", "u4"]);
    }

    #[tokio::test]
    async fn test_store_photo_requires_image_content_type() {
        let (store, _dir) = store();
        let result = store.store_photo("u1", b"%PDF-", "application/pdf").await;
        assert!(matches!(result, Err(StoreError::ValidationFailure(_))));
    }

    #[tokio::test]
    async fn test_store_photo_rejects_path_like_subtypes() {
        let (store, dir) = store();
        for content_type in ["image/", "image/../secret", "image/png/../../x"] {
            let result = store.store_photo("u1", &[0x89], content_type).await;
            assert!(matches!(result, Err(StoreError::ValidationFailure(_))));
        }
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());

        // Multi-part subtypes like svg+xml are still images.
        let url = store.store_photo("u1", b"<svg/>", "image/svg+xml").await.unwrap();
        assert!(url.ends_with("u1.svg+xml"));
    }

    #[tokio::test]
    async fn test_store_photo_writes_and_returns_url() {
        let (store, dir) = store();
        let url = store.store_photo("u1", &[0x89, 0x50], "image/png").await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(dir.path().join("u1.png").exists());
    }
}
