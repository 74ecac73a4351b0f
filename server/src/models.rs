//! Persisted entity types for the EventDesk server.
//!
//! These map one-to-one onto rows of the tables declared in
//! [`crate::db::SCHEMA`]. Wire representations live in
//! [`crate::serializers`]; nothing here is sent to clients directly.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// bcrypt hash of the password. Never rendered.
    pub password_hash: String,
}

/// An event organized by a user.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub organizer_id: i64,
}

/// A user's registration for an event.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EventRegistration {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
}

/// An opaque authentication token, at most one per user.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Token {
    pub key: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Validated input for creating a user, before the password is hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Validated values for every writable event column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub organizer_id: i64,
}

impl EventDraft {
    /// Starts a draft from an existing event, for partial updates.
    pub fn from_event(event: &Event) -> Self {
        Self {
            title: event.title.clone(),
            description: event.description.clone(),
            date: event.date,
            location: event.location.clone(),
            organizer_id: event.organizer_id,
        }
    }
}
