//! Row types for the three synced tables.
//!
//! Field names match the remote schema one-to-one so rows serialize straight
//! into store filters and patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Row, Table};

/// Role of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

/// Online/offline presence flag stored on both users and participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: String,
    pub role: Role,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: Presence,
}

impl User {
    /// Whether this user may enter the meeting room.
    pub fn is_admitted(&self) -> bool {
        self.role == Role::Admin || self.approved
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl Row for User {
    const TABLE: Table = Table::Users;

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// One joined client in the meeting room. Exists iff its owner is joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub meeting_id: String,
    pub user_id: String,
    pub user_name: String,
    pub photo_url: String,
    pub joined_at: DateTime<Utc>,
    pub is_speaking: bool,
    pub status: Presence,
}

impl Row for Participant {
    const TABLE: Table = Table::Participants;

    fn key(&self) -> String {
        format!("{}:{}", self.meeting_id, self.user_id)
    }
}

/// One finalized speech-to-text segment. Append-only; never mutated remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caption {
    pub id: String,
    pub meeting_id: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

impl Row for Caption {
    const TABLE: Table = Table::Captions;

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user(role: Role, approved: bool) -> User {
        User {
            id: "u1".to_string(),
            email: "a@example.com".to_string(),
            display_name: "A".to_string(),
            photo_url: String::new(),
            role,
            approved,
            created_at: Utc::now(),
            last_seen: Utc::now(),
            status: Presence::Online,
        }
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let parsed: Role = serde_json::from_str("\"member\"").unwrap();
        assert_eq!(parsed, Role::Member);
    }

    #[test]
    fn test_admitted_rules() {
        assert!(sample_user(Role::Admin, false).is_admitted());
        assert!(sample_user(Role::Member, true).is_admitted());
        assert!(!sample_user(Role::Member, false).is_admitted());
    }

    #[test]
    fn test_participant_key_is_composite() {
        let p = Participant {
            meeting_id: "main-meeting".to_string(),
            user_id: "u1".to_string(),
            user_name: "A".to_string(),
            photo_url: String::new(),
            joined_at: Utc::now(),
            is_speaking: false,
            status: Presence::Online,
        };
        assert_eq!(p.key(), "main-meeting:u1");
    }
}
