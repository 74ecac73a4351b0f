//! HTTP route handlers for the EventDesk server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /register/` - Create a user account
//! - `POST /login/` - Exchange credentials for a token
//! - `POST /logout/` - Revoke the caller's token
//! - `GET|POST /events/` - List or create events
//! - `GET|PUT|PATCH|DELETE /events/{id}/` - Read, replace, update or delete one event
//! - `POST /events/{event_id}/register/` - Register the caller for an event
//! - `GET /events/search/?query=` - Search events by title
//! - `GET /health` - Health check endpoint
//!
//! Everything except registration, login and health sits behind
//! [`require_token`].
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (policy toggles, bcrypt cost)
//! - The database handle
//! - The optional registration notifier
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use eventdesk_server::config::Config;
//! use eventdesk_server::db::Database;
//! use eventdesk_server::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let db = Database::connect(&config.database_url, config.max_connections)
//!         .await
//!         .expect("failed to open database");
//!     let app = create_router(AppState::new(config, db));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::{self, require_token, AuthContext};
use crate::config::Config;
use crate::db::Database;
use crate::error::{ApiError, Result};
use crate::mailer::RegistrationNotifier;
use crate::models::{Event, EventDraft};
use crate::policy::can_mutate_event;
use crate::serializers::{
    parse_body, EventRepr, EventSerializer, RegistrationRepr, RegistrationSerializer,
    UserRepr, UserSerializer,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum request body size (1 MiB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Cloned for each request. Every field is either behind an `Arc` or a
/// cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Relational store.
    pub db: Database,

    /// Sends a confirmation after each event registration when set.
    pub notifier: Option<RegistrationNotifier>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state without a registration notifier.
    #[must_use]
    pub fn new(config: Config, db: Database) -> Self {
        Self {
            config: Arc::new(config),
            db,
            notifier: None,
            start_time: Instant::now(),
        }
    }

    /// Installs the hook run after each successful event registration.
    #[must_use]
    pub fn with_notifier(mut self, notifier: RegistrationNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("notifier", &self.notifier)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// Bodies larger than 1 MiB are rejected with 413 before any handler runs.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/logout/", post(post_logout))
        .route("/events/", get(list_events).post(create_event))
        .route("/events/search/", get(search_events))
        .route(
            "/events/{id}/",
            get(get_event)
                .put(replace_event)
                .patch(update_event)
                .delete(delete_event),
        )
        .route("/events/{event_id}/register/", post(register_for_event))
        .route_layer(from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/register/", post(post_register))
        .route("/login/", post(post_login))
        .route("/health", get(get_health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parses an event id from the path. Anything that is not an integer is a 404.
fn parse_event_id(raw: &str) -> Result<i64> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

async fn load_event(db: &Database, raw_id: &str) -> Result<Event> {
    let id = parse_event_id(raw_id)?;
    db.find_event(id).await?.ok_or(ApiError::NotFound)
}

/// Loads an event the caller is allowed to change.
async fn load_mutable_event(state: &AppState, auth: &AuthContext, raw_id: &str) -> Result<Event> {
    let event = load_event(&state.db, raw_id).await?;
    if !can_mutate_event(state.config.event_mutation_policy, &auth.user, &event) {
        debug!(
            user_id = auth.user.id,
            event_id = event.id,
            "Event mutation denied by policy"
        );
        return Err(ApiError::PermissionDenied);
    }
    Ok(event)
}

// ============================================================================
// Accounts
// ============================================================================

/// POST /register/ - Create a user.
async fn post_register(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<UserRepr>)> {
    let data = parse_body(&body)?;
    let new_user = UserSerializer::validate(&data)?;

    let hash = auth::hash_password(&new_user.password, state.config.bcrypt_cost).await?;
    let user = state
        .db
        .create_user(&new_user.username, &new_user.email, &hash)
        .await
        .map_err(UserSerializer::store_error)?;

    info!(user_id = user.id, "User registered");
    Ok((StatusCode::CREATED, Json(UserSerializer::render(&user))))
}

/// Response body for a successful login.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// POST /login/ - Exchange credentials for the user's token.
///
/// Missing or non-string credentials are treated as a failed login.
async fn post_login(State(state): State<AppState>, body: Bytes) -> Result<Json<TokenResponse>> {
    let data = parse_body(&body)?;
    let (Some(username), Some(password)) = (
        data.get("username").and_then(Value::as_str),
        data.get("password").and_then(Value::as_str),
    ) else {
        return Err(ApiError::InvalidCredentials);
    };

    let user = auth::authenticate(&state.db, username, password)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let token = state
        .db
        .get_or_create_token(user.id, &auth::generate_token())
        .await?;

    info!(user_id = user.id, "User logged in");
    Ok(Json(TokenResponse { token: token.key }))
}

/// POST /logout/ - Revoke the token the request was made with.
async fn post_logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<StatusCode> {
    state.db.delete_token(&auth.token).await?;
    info!(user_id = auth.user.id, "User logged out");
    Ok(StatusCode::OK)
}

// ============================================================================
// Events
// ============================================================================

/// GET /events/ - List every event in id order.
async fn list_events(State(state): State<AppState>) -> Result<Json<Vec<EventRepr>>> {
    let events = state.db.list_events().await?;
    Ok(Json(EventSerializer::render_list(&events)))
}

/// POST /events/ - Create an event.
async fn create_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<EventRepr>)> {
    let data = parse_body(&body)?;
    let draft = EventSerializer::validate(&data)?;

    let event = state
        .db
        .create_event(&draft)
        .await
        .map_err(|e| EventSerializer::store_error(e, &draft))?;

    info!(event_id = event.id, "Event created");
    Ok((StatusCode::CREATED, Json(EventSerializer::render(&event))))
}

/// GET /events/{id}/ - Fetch one event.
async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventRepr>> {
    let event = load_event(&state.db, &id).await?;
    Ok(Json(EventSerializer::render(&event)))
}

/// PUT /events/{id}/ - Replace every field of an event.
async fn replace_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<EventRepr>> {
    let event = load_mutable_event(&state, &auth, &id).await?;
    let data = parse_body(&body)?;
    let draft = EventSerializer::validate(&data)?;
    save_event(&state, event.id, &draft).await
}

/// PATCH /events/{id}/ - Replace only the supplied fields.
async fn update_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<EventRepr>> {
    let event = load_mutable_event(&state, &auth, &id).await?;
    let data = parse_body(&body)?;
    let draft = EventSerializer::validate_partial(&data, &event)?;
    save_event(&state, event.id, &draft).await
}

async fn save_event(
    state: &AppState,
    id: i64,
    draft: &EventDraft,
) -> Result<Json<EventRepr>> {
    let event = state
        .db
        .update_event(id, draft)
        .await
        .map_err(|e| EventSerializer::store_error(e, draft))?
        .ok_or(ApiError::NotFound)?;

    info!(event_id = event.id, "Event updated");
    Ok(Json(EventSerializer::render(&event)))
}

/// DELETE /events/{id}/ - Delete an event and its registrations.
async fn delete_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let event = load_mutable_event(&state, &auth, &id).await?;
    if !state.db.delete_event(event.id).await? {
        return Err(ApiError::NotFound);
    }

    info!(event_id = event.id, "Event deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /events/{event_id}/register/ - Register the caller for an event.
///
/// The caller and the path's event are recorded regardless of any `user` or
/// `event` keys in the body.
async fn register_for_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(event_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<RegistrationRepr>)> {
    let event = load_event(&state.db, &event_id).await?;
    // Only the body's shape is checked; `user` and `event` are read-only.
    parse_body(&body)?;

    let registration = state
        .db
        .create_registration(auth.user.id, event.id, state.config.unique_registrations)
        .await
        .map_err(RegistrationSerializer::store_error)?;

    info!(
        user_id = auth.user.id,
        event_id = event.id,
        "User registered for event"
    );

    if let Some(notifier) = &state.notifier {
        notifier.notify(&auth.user, &event).await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(RegistrationSerializer::render(&registration)),
    ))
}

/// Query parameters for event search.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
}

/// GET /events/search/?query= - Events whose title contains `query`.
async fn search_events(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<EventRepr>>> {
    let events = state.db.search_events(&params.query).await?;
    debug!(matches = events.len(), "Event search complete");
    Ok(Json(EventSerializer::render_list(&events)))
}

// ============================================================================
// Health
// ============================================================================

/// Response body for the health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// No authentication required.
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "uptime_seconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Response {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
    .into_response()
}

// ============================================================================
// Tests
// ============================================================================
