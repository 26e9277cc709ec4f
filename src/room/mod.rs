//! Meeting room membership.
//!
//! One fixed logical room per deployment. Joining upserts this client's
//! participant row (keyed by meeting and user); leaving deletes it, so a row
//! exists exactly while its owner is joined. The speaking detector publishes
//! its flag through [`MeetingRoom::presence_sink`].

pub mod grid;

pub use grid::GridLayout;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::detector::PresenceSink;
use crate::model::{Participant, Presence, User};
use crate::store::{to_row, Filter, RemoteStore, StoreResult, Table};
use crate::sync::SyncedCollection;

pub struct MeetingRoom {
    store: Arc<dyn RemoteStore>,
    meeting_id: String,
    participants: Arc<SyncedCollection<Participant>>,
    joined: AtomicBool,
}

impl MeetingRoom {
    pub fn new(store: Arc<dyn RemoteStore>, meeting_id: &str) -> Arc<Self> {
        let participants = SyncedCollection::new(
            store.clone(),
            Filter::all().eq("meeting_id", meeting_id),
        );
        Arc::new(Self {
            store,
            meeting_id: meeting_id.to_string(),
            participants,
            joined: AtomicBool::new(false),
        })
    }

    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Relaxed)
    }

    pub async fn load(&self) -> StoreResult<()> {
        self.participants.load().await
    }

    pub fn spawn_sync(&self) -> JoinHandle<()> {
        self.participants.spawn_sync()
    }

    pub fn watch(&self) -> tokio::sync::watch::Receiver<u64> {
        self.participants.watch()
    }

    /// Enter the room: upsert our participant row. Re-joining refreshes the
    /// row rather than duplicating it.
    pub async fn join(&self, user: &User) -> StoreResult<()> {
        let participant = Participant {
            meeting_id: self.meeting_id.clone(),
            user_id: user.id.clone(),
            user_name: user.display_name.clone(),
            photo_url: user.photo_url.clone(),
            joined_at: Utc::now(),
            is_speaking: false,
            status: Presence::Online,
        };

        self.store
            .upsert(Table::Participants, to_row(&participant)?)
            .await?;
        self.joined.store(true, Ordering::Relaxed);
        info!("{} joined meeting {}", user.display_name, self.meeting_id);
        Ok(())
    }

    /// Leave the room: delete our row. A no-op when not joined.
    pub async fn leave(&self, user_id: &str) -> StoreResult<()> {
        if !self.is_joined() {
            return Ok(());
        }

        self.store
            .delete(
                Table::Participants,
                &Filter::all()
                    .eq("meeting_id", self.meeting_id.clone())
                    .eq("user_id", user_id),
            )
            .await?;
        self.joined.store(false, Ordering::Relaxed);
        info!("user {} left meeting {}", user_id, self.meeting_id);
        Ok(())
    }

    /// Flip our `is_speaking` flag. Silently skipped when not joined, so a
    /// detector outliving the membership cannot resurrect the row.
    pub async fn set_speaking(&self, user_id: &str, speaking: bool) -> StoreResult<()> {
        if !self.is_joined() {
            return Ok(());
        }

        self.store
            .update(
                Table::Participants,
                &Filter::all()
                    .eq("meeting_id", self.meeting_id.clone())
                    .eq("user_id", user_id),
                json!({"is_speaking": speaking}),
            )
            .await
    }

    /// Cached participant list in arrival order.
    pub fn participants(&self) -> Vec<Participant> {
        self.participants.values()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Grid shape for the current participant count.
    pub fn grid(&self) -> GridLayout {
        GridLayout::for_count(self.participant_count())
    }

    /// Detector-facing view bound to one user.
    pub fn presence_sink(self: &Arc<Self>, user_id: &str) -> Arc<dyn PresenceSink> {
        Arc::new(RoomPresence {
            room: Arc::clone(self),
            user_id: user_id.to_string(),
        })
    }
}

struct RoomPresence {
    room: Arc<MeetingRoom>,
    user_id: String,
}

#[async_trait]
impl PresenceSink for RoomPresence {
    async fn set_speaking(&self, speaking: bool) -> StoreResult<()> {
        self.room.set_speaking(&self.user_id, speaking).await
    }
}
