//! Live caption log.
//!
//! A bounded, time-ordered view over the synced caption table for one
//! meeting. Appends go straight to the remote table; the author sees their
//! own caption only after the subscribe→reload round trip, same as everyone
//! else. The retention cap bounds the cached set: each reload keeps only the
//! newest entries, so memory stays flat while remote history grows.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::model::{Caption, User};
use crate::store::{to_row, Filter, RemoteStore, StoreError, StoreResult, Table};
use crate::sync::SyncedCollection;

pub const DEFAULT_MAX_CAPTIONS: usize = 100;

pub struct CaptionLog {
    collection: Arc<SyncedCollection<Caption>>,
    store: Arc<dyn RemoteStore>,
    meeting_id: String,
}

impl CaptionLog {
    pub fn new(store: Arc<dyn RemoteStore>, meeting_id: &str, max_captions: usize) -> Self {
        let collection = SyncedCollection::new_bounded(
            store.clone(),
            Filter::all().eq("meeting_id", meeting_id),
            max_captions,
        );
        Self {
            collection,
            store,
            meeting_id: meeting_id.to_string(),
        }
    }

    pub async fn load(&self) -> StoreResult<()> {
        self.collection.load().await
    }

    pub fn spawn_sync(&self) -> JoinHandle<()> {
        self.collection.spawn_sync()
    }

    pub fn watch(&self) -> tokio::sync::watch::Receiver<u64> {
        self.collection.watch()
    }

    /// Append one finalized transcript segment. Blank text is rejected
    /// before any remote call is issued.
    pub async fn append(&self, author: &User, text: &str, language: &str) -> StoreResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::ValidationFailure(
                "caption text is empty".to_string(),
            ));
        }

        let caption = Caption {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_id: self.meeting_id.clone(),
            user_id: author.id.clone(),
            user_name: author.display_name.clone(),
            text: text.to_string(),
            language: language.to_string(),
            created_at: chrono::Utc::now(),
        };

        self.store.insert(Table::Captions, to_row(&caption)?).await
    }

    /// The retained view in non-decreasing `created_at` order. The cap is
    /// enforced by the bounded collection at reload time; equal timestamps
    /// keep arrival order (stable sort over the fetch order).
    pub fn visible(&self) -> Vec<Caption> {
        let mut captions = self.collection.values();
        captions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        captions
    }

    /// The last `n` captions, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Caption> {
        let visible = self.visible();
        let skip = visible.len().saturating_sub(n);
        visible[skip..].to_vec()
    }
}
