//! User directory and admin approval workflow.
//!
//! Wraps the synced users table. Admin-only actions check the acting user
//! locally and refuse before any remote call goes out.

use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::model::{Role, User};
use crate::store::{Filter, RemoteStore, StoreError, StoreResult, Table};
use crate::sync::SyncedCollection;

pub struct UserDirectory {
    store: Arc<dyn RemoteStore>,
    users: Arc<SyncedCollection<User>>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        let users = SyncedCollection::new(store.clone(), Filter::all());
        Self { store, users }
    }

    pub fn users(&self) -> &Arc<SyncedCollection<User>> {
        &self.users
    }

    pub async fn load(&self) -> StoreResult<()> {
        self.users.load().await
    }

    pub fn spawn_sync(&self) -> JoinHandle<()> {
        self.users.spawn_sync()
    }

    pub fn all_users(&self) -> Vec<User> {
        self.users.values()
    }

    /// Members still waiting for an admin decision.
    pub fn pending_users(&self) -> Vec<User> {
        self.users
            .values()
            .into_iter()
            .filter(|user| user.role == Role::Member && !user.approved)
            .collect()
    }

    /// Admit a pending member.
    pub async fn approve(&self, actor: &User, user_id: &str) -> StoreResult<()> {
        require_admin(actor)?;
        info!("admin {} approving user {}", actor.id, user_id);
        self.store
            .update(
                Table::Users,
                &Filter::all().eq("id", user_id),
                json!({"approved": true}),
            )
            .await
    }

    /// Reject a join request by deleting the account row.
    pub async fn reject(&self, actor: &User, user_id: &str) -> StoreResult<()> {
        require_admin(actor)?;
        info!("admin {} rejecting user {}", actor.id, user_id);
        self.store
            .delete(Table::Users, &Filter::all().eq("id", user_id))
            .await
    }

    /// Grant admin role.
    pub async fn promote(&self, actor: &User, user_id: &str) -> StoreResult<()> {
        require_admin(actor)?;
        info!("admin {} promoting user {}", actor.id, user_id);
        self.store
            .update(
                Table::Users,
                &Filter::all().eq("id", user_id),
                json!({"role": "admin"}),
            )
            .await
    }

    /// Store a profile photo for the acting user and point their row at it.
    /// Non-image uploads are refused here, before any remote round trip.
    pub async fn upload_photo(
        &self,
        actor: &User,
        bytes: &[u8],
        content_type: &str,
    ) -> StoreResult<String> {
        if !content_type.starts_with("image/") {
            return Err(StoreError::ValidationFailure(format!(
                "photo must be an image, got '{content_type}'"
            )));
        }

        let url = self.store.store_photo(&actor.id, bytes, content_type).await?;
        self.store
            .update(
                Table::Users,
                &Filter::all().eq("id", actor.id.clone()),
                json!({"photo_url": url}),
            )
            .await?;
        Ok(url)
    }
}

fn require_admin(actor: &User) -> StoreResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(StoreError::NotAuthorized(format!(
            "user {} is not an admin",
            actor.id
        )))
    }
}
