//! Error types for the EventDesk server.
//!
//! This module defines the error hierarchy used by request handlers and its
//! mapping onto HTTP responses.
//!
//! # Error Types
//!
//! - [`FieldErrors`] - Field-level validation messages, rendered as a JSON map
//! - [`ApiError`] - Every way a request can fail, with its status code and body
//!
//! # Example
//!
//! ```rust
//! use eventdesk_server::error::{ApiError, FieldErrors};
//!
//! let mut errors = FieldErrors::new();
//! errors.add("title", "This field is required.");
//! let err = ApiError::from(errors);
//! assert!(err.is_client_error());
//! ```

use std::collections::BTreeMap;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::db::DbError;
use crate::mailer::MailError;

/// Key used for errors that do not belong to a single field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Validation messages keyed by field name.
///
/// Serializes as `{"field": ["message", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map holding a single message.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Appends a message for `field`.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the messages recorded for `field`.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Returns `Err(self)` if any message was recorded.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Every way a request can fail.
#[derive(Debug, Error)]
pub enum ApiError {
    /// One or more fields failed validation (400).
    #[error("validation failed")]
    Validation(FieldErrors),

    /// Login with an unknown username or a wrong password (400).
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The request body is not a JSON object (400).
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    /// No usable `Authorization` header was sent (401).
    #[error("authentication credentials were not provided")]
    NotAuthenticated,

    /// The `Authorization` header is malformed or names an unknown token (401).
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The caller is authenticated but not allowed to do this (403).
    #[error("permission denied")]
    PermissionDenied,

    /// The addressed resource does not exist (404).
    #[error("not found")]
    NotFound,

    /// The store failed for a reason the client cannot fix (500).
    #[error(transparent)]
    Database(#[from] DbError),

    /// Sending mail failed (500).
    #[error(transparent)]
    Mail(#[from] MailError),

    /// Any other unexpected failure (500).
    #[error("internal server error: {0}")]
    Internal(String),
}

impl From<FieldErrors> for ApiError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}

impl ApiError {
    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates an invalid-token error with the given detail message.
    pub fn invalid_token(detail: impl Into<String>) -> Self {
        Self::InvalidToken(detail.into())
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidCredentials | Self::MalformedBody(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotAuthenticated | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Database(_) | Self::Mail(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    fn body(&self) -> serde_json::Value {
        match self {
            Self::Validation(errors) => json!(errors),
            Self::InvalidCredentials => json!({ "error": "Invalid username or password" }),
            Self::MalformedBody(detail) | Self::InvalidToken(detail) => json!({ "detail": detail }),
            Self::NotAuthenticated => {
                json!({ "detail": "Authentication credentials were not provided." })
            }
            Self::PermissionDenied => {
                json!({ "detail": "You do not have permission to perform this action." })
            }
            Self::NotFound => json!({ "detail": "Not found." }),
            Self::Database(_) | Self::Mail(_) | Self::Internal(_) => {
                json!({ "detail": "A server error occurred." })
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = Json(self.body());
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Token")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

/// A specialized Result type for request handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn field_errors_accumulate_per_field() {
        let mut errors = FieldErrors::new();
        errors.add("title", "first");
        errors.add("title", "second");
        errors.add("date", "third");

        assert_eq!(errors.get("title").unwrap(), ["first", "second"]);
        assert_eq!(errors.get("date").unwrap(), ["third"]);
        assert!(errors.get("location").is_none());
    }

    #[test]
    fn field_errors_serialize_as_map() {
        let errors = FieldErrors::single("username", "This field is required.");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json, json!({ "username": ["This field is required."] }));
    }

    #[test]
    fn empty_field_errors_into_ok() {
        assert!(FieldErrors::new().into_result().is_ok());
        assert!(FieldErrors::single("a", "b").into_result().is_err());
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            ApiError::from(FieldErrors::single("a", "b")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::InvalidCredentials.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotAuthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::invalid_token("Invalid token.").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::PermissionDenied.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn client_and_server_errors_are_disjoint() {
        assert!(ApiError::NotFound.is_client_error());
        assert!(!ApiError::NotFound.is_server_error());
        assert!(ApiError::internal("boom").is_server_error());
        assert!(!ApiError::internal("boom").is_client_error());
    }

    #[tokio::test]
    async fn invalid_credentials_body() {
        let response = ApiError::InvalidCredentials.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Invalid username or password" })
        );
    }

    #[tokio::test]
    async fn unauthorized_sets_www_authenticate() {
        let response = ApiError::NotAuthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Token"
        );
        assert_eq!(
            body_json(response).await,
            json!({ "detail": "Authentication credentials were not provided." })
        );
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = ApiError::internal("secret connection string").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body, json!({ "detail": "A server error occurred." }));
    }
}
