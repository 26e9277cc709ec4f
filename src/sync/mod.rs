//! Realtime-sync local caches.
//!
//! A `SyncedCollection` mirrors one remote table slice (a fixed equality
//! filter) and reconciles by full reload whenever the change feed fires,
//! regardless of which row changed. The feed gives no total order for
//! concurrent writes and rows carry no version counter, so wholesale reload
//! is the race-free option; tables are bounded by meeting-room size.
//!
//! Reload requests are never cancelled. When two reloads race, the last one
//! to *complete* wins, which can transiently publish a stale snapshot.

use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::{from_row, to_row, Filter, RemoteStore, Row, StoreResult};

pub struct SyncedCollection<T: Row> {
    store: Arc<dyn RemoteStore>,
    filter: Filter,
    // Arrival order of the last completed fetch; readers only ever see a
    // fully swapped snapshot.
    rows: RwLock<Vec<T>>,
    // Retention cap on the cached set; oldest arrivals are evicted first.
    cap: Option<usize>,
    generation: watch::Sender<u64>,
}

impl<T: Row> SyncedCollection<T> {
    pub fn new(store: Arc<dyn RemoteStore>, filter: Filter) -> Arc<Self> {
        Self::build(store, filter, None)
    }

    /// Collection that never caches more than `cap` rows: each reload keeps
    /// only the newest `cap` arrivals. Remote history stays unbounded.
    pub fn new_bounded(store: Arc<dyn RemoteStore>, filter: Filter, cap: usize) -> Arc<Self> {
        Self::build(store, filter, Some(cap))
    }

    fn build(store: Arc<dyn RemoteStore>, filter: Filter, cap: Option<usize>) -> Arc<Self> {
        let (generation, _) = watch::channel(0);
        Arc::new(Self {
            store,
            filter,
            rows: RwLock::new(Vec::new()),
            cap,
            generation,
        })
    }

    /// Fetch every row matching the predicate and replace the cache
    /// atomically. On failure the previous snapshot stays visible and the
    /// error goes to the caller; there is no automatic retry.
    pub async fn load(&self) -> StoreResult<()> {
        let raw = self.store.select(T::TABLE, &self.filter).await?;

        let mut fresh = Vec::with_capacity(raw.len());
        for value in raw {
            fresh.push(from_row::<T>(value)?);
        }

        if let Some(cap) = self.cap {
            if fresh.len() > cap {
                let drop = fresh.len() - cap;
                fresh.drain(..drop);
            }
        }

        *self.rows.write().unwrap() = fresh;
        self.bump();
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.rows
            .read()
            .unwrap()
            .iter()
            .find(|row| row.key() == key)
            .cloned()
    }

    /// Snapshot of all cached rows in arrival order.
    pub fn values(&self) -> Vec<T> {
        self.rows.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }

    /// Optimistic local application of a row ahead of reload confirmation.
    /// The next completed reload overwrites it either way.
    pub fn upsert_local(&self, row: T) {
        {
            let mut rows = self.rows.write().unwrap();
            match rows.iter_mut().find(|r| r.key() == row.key()) {
                Some(existing) => *existing = row,
                None => rows.push(row),
            }
        }
        self.bump();
    }

    /// Write a row remotely. Visibility, including for the writer, comes via
    /// the subscribe→reload round trip — there is no local echo.
    pub async fn push_remote(&self, row: &T) -> StoreResult<()> {
        self.store.upsert(T::TABLE, to_row(row)?).await
    }

    /// Generation counter observers can await; it bumps after every cache
    /// replacement.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Background reconciliation: any feed event, of any kind and for any
    /// row, triggers a full reload. Reload failures keep the stale cache and
    /// are logged, never retried.
    pub fn spawn_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let collection = Arc::clone(self);
        let mut feed = collection.store.subscribe(T::TABLE);

        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(event) => {
                        debug!(
                            "{} changed ({:?}), reloading",
                            event.table.as_str(),
                            event.kind
                        );
                    }
                    // Missed events still mean "something changed".
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("{} feed lagged by {missed}, reloading", T::TABLE.as_str());
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }

                if let Err(e) = collection.load().await {
                    warn!(
                        "reload of {} failed, keeping stale cache: {e}",
                        T::TABLE.as_str()
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Participant, Presence};
    use crate::store::{
        ChangeEvent, SqliteStore, StoreError, Table,
    };
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    fn participant(user_id: &str) -> Participant {
        Participant {
            meeting_id: "main-meeting".to_string(),
            user_id: user_id.to_string(),
            user_name: user_id.to_uppercase(),
            photo_url: String::new(),
            joined_at: chrono::Utc::now(),
            is_speaking: false,
            status: Presence::Online,
        }
    }

    fn sqlite() -> (Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (Arc::new(SqliteStore::in_memory(dir.path()).unwrap()), dir)
    }

    #[tokio::test]
    async fn test_load_matches_remote_snapshot_exactly() {
        let (store, _dir) = sqlite();
        let collection: Arc<SyncedCollection<Participant>> =
            SyncedCollection::new(store.clone(), Filter::all());

        collection.push_remote(&participant("u1")).await.unwrap();
        collection.push_remote(&participant("u2")).await.unwrap();
        collection.load().await.unwrap();
        assert_eq!(collection.len(), 2);

        // A removed row must not linger as a ghost after the next load.
        store
            .delete(Table::Participants, &Filter::all().eq("user_id", "u1"))
            .await
            .unwrap();
        collection.load().await.unwrap();

        let ids: Vec<String> = collection.values().iter().map(|p| p.user_id.clone()).collect();
        assert_eq!(ids, vec!["u2"]);
        assert!(collection.get("main-meeting:u1").is_none());
    }

    #[tokio::test]
    async fn test_load_honors_fixed_predicate() {
        let (store, _dir) = sqlite();
        let mut other = participant("u9");
        other.meeting_id = "other-meeting".to_string();

        let collection: Arc<SyncedCollection<Participant>> = SyncedCollection::new(
            store.clone(),
            Filter::all().eq("meeting_id", "main-meeting"),
        );
        collection.push_remote(&participant("u1")).await.unwrap();
        store
            .upsert(Table::Participants, crate::store::to_row(&other).unwrap())
            .await
            .unwrap();

        collection.load().await.unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.values()[0].user_id, "u1");
    }

    #[tokio::test]
    async fn test_change_event_triggers_reload() {
        let (store, _dir) = sqlite();
        let collection: Arc<SyncedCollection<Participant>> =
            SyncedCollection::new(store.clone(), Filter::all());
        let _sync = collection.spawn_sync();
        let mut generations = collection.watch();

        collection.push_remote(&participant("u1")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), generations.changed())
            .await
            .expect("reload never happened")
            .unwrap();
        assert_eq!(collection.len(), 1);
    }

    struct FailingStore;

    #[async_trait]
    impl RemoteStore for FailingStore {
        async fn select(&self, _: Table, _: &Filter) -> StoreResult<Vec<Value>> {
            Err(StoreError::RemoteUnavailable("down".to_string()))
        }
        async fn insert(&self, _: Table, _: Value) -> StoreResult<()> {
            Err(StoreError::RemoteUnavailable("down".to_string()))
        }
        async fn update(&self, _: Table, _: &Filter, _: Value) -> StoreResult<()> {
            Err(StoreError::RemoteUnavailable("down".to_string()))
        }
        async fn upsert(&self, _: Table, _: Value) -> StoreResult<()> {
            Err(StoreError::RemoteUnavailable("down".to_string()))
        }
        async fn delete(&self, _: Table, _: &Filter) -> StoreResult<()> {
            Err(StoreError::RemoteUnavailable("down".to_string()))
        }
        fn subscribe(&self, _: Table) -> broadcast::Receiver<ChangeEvent> {
            broadcast::channel(1).1
        }
        async fn store_photo(&self, _: &str, _: &[u8], _: &str) -> StoreResult<String> {
            Err(StoreError::RemoteUnavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_cache() {
        let collection: Arc<SyncedCollection<Participant>> =
            SyncedCollection::new(Arc::new(FailingStore), Filter::all());
        collection.upsert_local(participant("u1"));

        let result = collection.load().await;
        assert!(matches!(result, Err(StoreError::RemoteUnavailable(_))));
        // Stale but consistent.
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.values()[0].user_id, "u1");
    }

    #[tokio::test]
    async fn test_bounded_collection_caches_only_newest_rows() {
        let (store, _dir) = sqlite();
        let collection: Arc<SyncedCollection<Participant>> =
            SyncedCollection::new_bounded(store.clone(), Filter::all(), 10);

        for i in 0..25 {
            collection
                .push_remote(&participant(&format!("u{i:02}")))
                .await
                .unwrap();
        }
        collection.load().await.unwrap();

        // The cached set itself is bounded, not just a read-time view.
        assert_eq!(collection.len(), 10);
        let ids: Vec<String> = collection.values().iter().map(|p| p.user_id.clone()).collect();
        assert_eq!(ids.first().map(String::as_str), Some("u15"));
        assert_eq!(ids.last().map(String::as_str), Some("u24"));

        // Eviction is local only.
        let remote = store
            .select(Table::Participants, &Filter::all())
            .await
            .unwrap();
        assert_eq!(remote.len(), 25);
    }

    #[tokio::test]
    async fn test_upsert_local_replaces_by_key_and_bumps_generation() {
        let (store, _dir) = sqlite();
        let collection: Arc<SyncedCollection<Participant>> =
            SyncedCollection::new(store, Filter::all());
        let generations = collection.watch();
        let before = *generations.borrow();

        collection.upsert_local(participant("u1"));
        let mut updated = participant("u1");
        updated.is_speaking = true;
        collection.upsert_local(updated);

        assert_eq!(collection.len(), 1);
        assert!(collection.get("main-meeting:u1").unwrap().is_speaking);
        assert!(*generations.borrow() > before);
    }
}
