//! Shared fixtures for the integration tests.
//!
//! Every test builds its own [`TestApp`] over a fresh in-memory database, so
//! no state leaks between tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use eventdesk_server::config::Config;
use eventdesk_server::db::Database;
use eventdesk_server::mailer::RegistrationNotifier;
use eventdesk_server::routes::{create_router, AppState};

/// Lowest bcrypt cost, to keep tests fast.
pub const TEST_BCRYPT_COST: u32 = 4;

/// Configuration used by tests unless they override it.
pub fn test_config() -> Config {
    Config {
        bcrypt_cost: TEST_BCRYPT_COST,
        ..Config::default()
    }
}

/// Registration payload for the canonical test user.
pub fn johny() -> Value {
    json!({ "username": "Johny", "email": "johny@mail.ua", "password": "qwerty" })
}

/// Registration payload for a second user.
pub fn mary() -> Value {
    json!({ "username": "Mary", "email": "mary@mail.ua", "password": "asdfgh" })
}

/// Event payload titled "My event".
pub fn my_event(organizer: i64) -> Value {
    json!({
        "title": "My event",
        "description": "1st event",
        "date": "2024-04-23",
        "location": "Kyiv",
        "organizer": organizer,
    })
}

/// Event payload titled "Test Event 2".
pub fn second_event(organizer: i64) -> Value {
    json!({
        "title": "Test Event 2",
        "description": "2nd event",
        "date": "2024-05-01T18:30:00Z",
        "location": "Lviv",
        "organizer": organizer,
    })
}

/// A parsed response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub www_authenticate: Option<String>,
    /// `Value::Null` when the body is empty.
    pub body: Value,
}

/// The router and its state, driven request by request with `oneshot`.
pub struct TestApp {
    pub state: AppState,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let db = Database::in_memory().await.unwrap();
        Self {
            state: AppState::new(config, db),
        }
    }

    pub async fn with_notifier(config: Config, notifier: RegistrationNotifier) -> Self {
        let db = Database::in_memory().await.unwrap();
        Self {
            state: AppState::new(config, db).with_notifier(notifier),
        }
    }

    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Sends a request with a raw body.
    pub async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: impl Into<Body>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Token {token}"));
        }

        let response = create_router(self.state.clone())
            .oneshot(builder.body(body.into()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let www_authenticate = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        TestResponse {
            status,
            www_authenticate,
            body,
        }
    }

    /// Sends a request with an optional JSON body.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let body = match body {
            Some(value) => Body::from(serde_json::to_vec(&value).unwrap()),
            None => Body::empty(),
        };
        self.send_raw(method, uri, token, body).await
    }

    /// Registers a user and returns their id.
    pub async fn register(&self, payload: Value) -> i64 {
        let response = self.send(Method::POST, "/register/", None, Some(payload)).await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"].as_i64().unwrap()
    }

    /// Logs in and returns the token key.
    pub async fn login(&self, username: &str, password: &str) -> String {
        let response = self
            .send(
                Method::POST,
                "/login/",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
        response.body["token"].as_str().unwrap().to_string()
    }

    /// Registers and logs in the given user, returning `(id, token)`.
    pub async fn sign_up(&self, payload: Value) -> (i64, String) {
        let username = payload["username"].as_str().unwrap().to_string();
        let password = payload["password"].as_str().unwrap().to_string();
        let id = self.register(payload).await;
        let token = self.login(&username, &password).await;
        (id, token)
    }

    /// Creates an event and returns its stored id.
    pub async fn create_event(&self, token: &str, payload: Value) -> i64 {
        let title = payload["title"].as_str().unwrap().to_string();
        let response = self
            .send(Method::POST, "/events/", Some(token), Some(payload))
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        self.event_id(&title).await
    }

    /// Looks up an event id by title. The wire form carries no id.
    pub async fn event_id(&self, title: &str) -> i64 {
        self.db()
            .list_events()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.title == title)
            .map(|e| e.id)
            .unwrap()
    }
}
