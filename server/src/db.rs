//! Relational store for users, events, registrations and tokens.
//!
//! The schema is declared up front in [`SCHEMA`] with typed columns,
//! uniqueness and `ON DELETE CASCADE` foreign keys, and is applied every time
//! a [`Database`] is opened. SQLite foreign-key enforcement is switched on for
//! every pooled connection, so cascades and dangling references are handled by
//! the store rather than by handler code.
//!
//! Every public method issues exactly one SQL statement.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventdesk_server::db::Database;
//!
//! # async fn example() -> Result<(), eventdesk_server::db::DbError> {
//! let db = Database::connect("sqlite://eventdesk.db", 5).await?;
//! let events = db.list_events().await?;
//! println!("{} events", events.len());
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Event, EventDraft, EventRegistration, Token, User};

/// Table and index definitions, applied in order.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        username      TEXT    NOT NULL UNIQUE,
        email         TEXT    NOT NULL,
        password_hash TEXT    NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS events (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        title        TEXT    NOT NULL UNIQUE,
        description  TEXT    NOT NULL,
        date         TEXT    NOT NULL,
        location     TEXT    NOT NULL,
        organizer_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS events_organizer_id ON events(organizer_id)",
    "CREATE TABLE IF NOT EXISTS event_registrations (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS event_registrations_user_id ON event_registrations(user_id)",
    "CREATE INDEX IF NOT EXISTS event_registrations_event_id ON event_registrations(event_id)",
    "CREATE TABLE IF NOT EXISTS tokens (
        key        TEXT    PRIMARY KEY,
        user_id    INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
        created_at TEXT    NOT NULL
    )",
];

const USER_COLUMNS: &str = "id, username, email, password_hash";
const EVENT_COLUMNS: &str = "id, title, description, date, location, organizer_id";

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// A `UNIQUE` column already holds the value being written.
    #[error("unique constraint violated on {0}")]
    UniqueViolation(&'static str),

    /// A foreign key points at a row that does not exist.
    #[error("referenced row does not exist")]
    MissingReference,

    /// The user already holds a registration for the event.
    #[error("user is already registered for this event")]
    DuplicateRegistration,

    /// Any other database failure.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Maps constraint failures onto [`DbError`] variants.
///
/// `unique_column` names the single unique column of the table being written.
fn classify(err: sqlx::Error, unique_column: &'static str) -> DbError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return DbError::UniqueViolation(unique_column);
        }
        if db_err.is_foreign_key_violation() {
            return DbError::MissingReference;
        }
    }
    DbError::Sqlx(err)
}

/// Maps foreign-key failures onto [`DbError::MissingReference`], for tables
/// without a unique column of their own.
fn classify_reference(err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_foreign_key_violation() {
            return DbError::MissingReference;
        }
    }
    DbError::Sqlx(err)
}

/// Escapes `LIKE` wildcards so the query matches as a literal substring.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for ch in query.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Handle to the connection pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database at `url` and applies [`SCHEMA`].
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        info!(max_connections, "Database ready");
        Ok(db)
    }

    /// Opens a private in-memory database.
    ///
    /// The pool holds a single connection that is never recycled, since an
    /// in-memory SQLite database lives only as long as its connection.
    pub async fn in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), DbError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(statements = SCHEMA.len(), "Schema applied");
        Ok(())
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Inserts a user. A taken username yields `UniqueViolation("username")`.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, DbError> {
        let sql = format!(
            "INSERT INTO users (username, email, password_hash) VALUES (?, ?, ?) \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, "username"))
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Deletes a user and, by cascade, their events, registrations and token.
    ///
    /// Returns `false` if no such user existed.
    pub async fn delete_user(&self, id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_users(&self) -> Result<i64, DbError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Inserts an event. A duplicate title yields `UniqueViolation("title")`,
    /// an unknown organizer yields `MissingReference`.
    pub async fn create_event(&self, draft: &EventDraft) -> Result<Event, DbError> {
        let sql = format!(
            "INSERT INTO events (title, description, date, location, organizer_id) \
             VALUES (?, ?, ?, ?, ?) RETURNING {EVENT_COLUMNS}"
        );
        sqlx::query_as::<_, Event>(&sql)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(draft.date)
            .bind(&draft.location)
            .bind(draft.organizer_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, "title"))
    }

    pub async fn find_event(&self, id: i64) -> Result<Option<Event>, DbError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?");
        Ok(sqlx::query_as::<_, Event>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Returns every event in ascending id order.
    pub async fn list_events(&self) -> Result<Vec<Event>, DbError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id");
        Ok(sqlx::query_as::<_, Event>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Returns events whose title contains `query` as a substring.
    ///
    /// Matching follows SQLite `LIKE`, so it ignores ASCII case.
    pub async fn search_events(&self, query: &str) -> Result<Vec<Event>, DbError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE title LIKE '%' || ? || '%' ESCAPE '\\' ORDER BY id"
        );
        Ok(sqlx::query_as::<_, Event>(&sql)
            .bind(escape_like(query))
            .fetch_all(&self.pool)
            .await?)
    }

    /// Overwrites every writable column of an event.
    ///
    /// Returns `None` if the event does not exist.
    pub async fn update_event(&self, id: i64, draft: &EventDraft) -> Result<Option<Event>, DbError> {
        let sql = format!(
            "UPDATE events SET title = ?, description = ?, date = ?, location = ?, \
             organizer_id = ? WHERE id = ? RETURNING {EVENT_COLUMNS}"
        );
        sqlx::query_as::<_, Event>(&sql)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(draft.date)
            .bind(&draft.location)
            .bind(draft.organizer_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "title"))
    }

    /// Deletes an event and, by cascade, its registrations.
    pub async fn delete_event(&self, id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Registrations
    // ------------------------------------------------------------------

    /// Records that `user_id` registered for `event_id`.
    ///
    /// With `unique` set, a second registration for the same pair yields
    /// `DuplicateRegistration`; the existence check and the insert are one
    /// statement.
    pub async fn create_registration(
        &self,
        user_id: i64,
        event_id: i64,
        unique: bool,
    ) -> Result<EventRegistration, DbError> {
        if !unique {
            return sqlx::query_as::<_, EventRegistration>(
                "INSERT INTO event_registrations (user_id, event_id) VALUES (?, ?) \
                 RETURNING id, user_id, event_id",
            )
            .bind(user_id)
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(classify_reference);
        }

        sqlx::query_as::<_, EventRegistration>(
            "INSERT INTO event_registrations (user_id, event_id) \
             SELECT ?1, ?2 WHERE NOT EXISTS ( \
                 SELECT 1 FROM event_registrations WHERE user_id = ?1 AND event_id = ?2 \
             ) RETURNING id, user_id, event_id",
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_reference)?
        .ok_or(DbError::DuplicateRegistration)
    }

    pub async fn registrations_for_event(
        &self,
        event_id: i64,
    ) -> Result<Vec<EventRegistration>, DbError> {
        Ok(sqlx::query_as::<_, EventRegistration>(
            "SELECT id, user_id, event_id FROM event_registrations \
             WHERE event_id = ? ORDER BY id",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn count_registrations(&self) -> Result<i64, DbError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM event_registrations")
            .fetch_one(&self.pool)
            .await?)
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Returns the user's token, storing `candidate_key` if they have none.
    ///
    /// The no-op `DO UPDATE` makes `RETURNING` yield the existing row on
    /// conflict, so concurrent logins agree on one key.
    pub async fn get_or_create_token(
        &self,
        user_id: i64,
        candidate_key: &str,
    ) -> Result<Token, DbError> {
        sqlx::query_as::<_, Token>(
            "INSERT INTO tokens (key, user_id, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET user_id = excluded.user_id \
             RETURNING key, user_id, created_at",
        )
        .bind(candidate_key)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "key"))
    }

    /// Resolves a token key to its owner.
    pub async fn find_user_by_token(&self, key: &str) -> Result<Option<User>, DbError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT u.id, u.username, u.email, u.password_hash \
             FROM users u JOIN tokens t ON t.user_id = u.id WHERE t.key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Deletes a token. Returns `false` if it was already gone.
    pub async fn delete_token(&self, key: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM tokens WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
