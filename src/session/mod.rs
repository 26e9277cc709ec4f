//! Session authorization gate.
//!
//! Pure state machine over the authenticated user: Unauthenticated →
//! (PendingApproval | Admitted) on login, PendingApproval → Admitted when a
//! reloaded users cache shows the approval, Admitted → LoggedOut on explicit
//! logout. The gate mutates the users table but performs no navigation or
//! other environment effects; callers react to the returned states.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::model::{Presence, Role, User};
use crate::store::{from_row, to_row, Filter, RemoteStore, StoreResult, Table};
use crate::sync::SyncedCollection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    PendingApproval,
    Admitted,
    LoggedOut,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::PendingApproval => "pending_approval",
            Self::Admitted => "admitted",
            Self::LoggedOut => "logged_out",
        }
    }
}

/// What the external authentication provider hands us.
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

pub struct SessionGate {
    store: Arc<dyn RemoteStore>,
    state: SessionState,
    current: Option<User>,
}

impl SessionGate {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            state: SessionState::Unauthenticated,
            current: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current.as_ref()
    }

    /// Handle a successful external authentication. The first user ever seen
    /// becomes an approved admin; later identities start as unapproved
    /// members; returning users keep their stored role and approval.
    pub async fn login(&mut self, identity: &AuthIdentity) -> StoreResult<SessionState> {
        let existing = self
            .store
            .select(Table::Users, &Filter::all().eq("id", identity.id.clone()))
            .await?
            .into_iter()
            .next()
            .map(from_row::<User>)
            .transpose()?;

        let user_count = self.store.select(Table::Users, &Filter::all()).await?.len();
        let is_first_user = user_count == 0;

        let now = Utc::now();
        let user = User {
            id: identity.id.clone(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone().unwrap_or_else(|| {
                identity
                    .email
                    .split('@')
                    .next()
                    .unwrap_or(&identity.email)
                    .to_string()
            }),
            photo_url: identity
                .photo_url
                .clone()
                .or_else(|| existing.as_ref().map(|u| u.photo_url.clone()))
                .unwrap_or_default(),
            role: existing
                .as_ref()
                .map(|u| u.role)
                .unwrap_or(if is_first_user { Role::Admin } else { Role::Member }),
            approved: existing.as_ref().map(|u| u.approved).unwrap_or(false) || is_first_user,
            created_at: existing.as_ref().map(|u| u.created_at).unwrap_or(now),
            last_seen: now,
            status: Presence::Online,
        };

        self.store.upsert(Table::Users, to_row(&user)?).await?;

        self.state = if user.is_admitted() {
            SessionState::Admitted
        } else {
            SessionState::PendingApproval
        };
        info!(
            "user {} logged in as {} ({})",
            user.display_name,
            user.role.as_str(),
            self.state.as_str()
        );
        self.current = Some(user);

        Ok(self.state)
    }

    /// Re-check admission against a freshly reloaded users cache. This is
    /// the only path from PendingApproval to Admitted: approval arrives as
    /// an ordinary row change, not a dedicated signal.
    pub fn evaluate(&mut self, users: &SyncedCollection<User>) -> SessionState {
        if self.state != SessionState::PendingApproval {
            return self.state;
        }

        let Some(current) = self.current.as_ref() else {
            return self.state;
        };

        if let Some(row) = users.get(&current.id) {
            let admitted = row.is_admitted();
            self.current = Some(row);
            if admitted {
                info!("approval observed, session admitted");
                self.state = SessionState::Admitted;
            }
        }
        self.state
    }

    /// Explicit logout: mark offline, forget the session.
    pub async fn logout(&mut self) -> StoreResult<SessionState> {
        if let Some(user) = &self.current {
            self.store
                .update(
                    Table::Users,
                    &Filter::all().eq("id", user.id.clone()),
                    serde_json::json!({
                        "status": "offline",
                        "last_seen": Utc::now(),
                    }),
                )
                .await?;
        }

        self.current = None;
        self.state = SessionState::LoggedOut;
        Ok(self.state)
    }
}
