//! Password and token authentication.
//!
//! # Overview
//!
//! 1. Passwords are hashed with bcrypt on the blocking thread pool and never
//!    leave the server.
//! 2. A successful login issues an opaque token: 32 bytes of secure random
//!    data, base64-url encoded without padding (43 characters). Each user
//!    holds at most one token, stored in the `tokens` table.
//! 3. Protected routes sit behind [`require_token`], a middleware that reads
//!    `Authorization: Token <key>`, resolves the key to a user and stores an
//!    [`AuthContext`] in the request extensions. Handlers never see an
//!    unauthenticated request.
//!
//! Token keys and passwords are never logged.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use tracing::{debug, trace};

use crate::db::Database;
use crate::error::{ApiError, FieldErrors};
use crate::models::User;
use crate::routes::AppState;

/// Authorization scheme keyword, matched case-insensitively.
const TOKEN_KEYWORD: &str = "token";

/// Size of the random token in bytes.
const TOKEN_BYTES: usize = 32;

/// bcrypt reads at most this many bytes of input and ignores the rest.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// The authenticated caller, set by [`require_token`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    /// Key the request was authenticated with.
    pub token: String,
}

/// Hashes `password` with bcrypt at the given cost.
///
/// Passwords longer than [`MAX_PASSWORD_BYTES`] are refused rather than
/// truncated.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(FieldErrors::single("password", password_too_long_message()).into());
    }
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("password hashing failed: {e}")))
}

/// Checks `password` against a bcrypt hash.
///
/// A malformed stored hash counts as a mismatch, and so does a password
/// longer than [`MAX_PASSWORD_BYTES`], which no stored hash can have come from.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Ok(false);
    }
    let password = password.to_string();
    let hash = hash.to_string();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ApiError::internal(format!("password verification task failed: {e}")))?;
    Ok(verified.unwrap_or(false))
}

/// Validation message for a password bcrypt cannot hash in full.
pub fn password_too_long_message() -> String {
    format!("Ensure this field has no more than {MAX_PASSWORD_BYTES} bytes.")
}

/// Returns the user if `username` exists and `password` matches.
pub async fn authenticate(
    db: &Database,
    username: &str,
    password: &str,
) -> Result<Option<User>, ApiError> {
    let Some(user) = db.find_user_by_username(username).await? else {
        debug!("Login attempt for unknown username");
        return Ok(None);
    };

    if verify_password(password, &user.password_hash).await? {
        Ok(Some(user))
    } else {
        debug!(user_id = user.id, "Login attempt with wrong password");
        Ok(None)
    }
}

/// Generates a fresh token key.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Extracts the token key from an `Authorization: Token <key>` header.
///
/// Returns `Ok(None)` when no header is present or it uses another scheme,
/// and an [`ApiError::InvalidToken`] when the header is malformed.
pub fn token_from_headers(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value.to_str().map_err(|_| {
        ApiError::invalid_token(
            "Invalid token header. Token string should not contain invalid characters.",
        )
    })?;

    let mut parts = value.split_whitespace();
    match parts.next() {
        Some(keyword) if keyword.eq_ignore_ascii_case(TOKEN_KEYWORD) => {}
        _ => return Ok(None),
    }

    let key = parts.next().ok_or_else(|| {
        ApiError::invalid_token("Invalid token header. No credentials provided.")
    })?;

    if parts.next().is_some() {
        return Err(ApiError::invalid_token(
            "Invalid token header. Token string should not contain spaces.",
        ));
    }

    Ok(Some(key.to_string()))
}

/// Middleware that rejects requests without a valid token.
pub async fn require_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = token_from_headers(request.headers())?.ok_or(ApiError::NotAuthenticated)?;

    let user = state
        .db
        .find_user_by_token(&key)
        .await?
        .ok_or_else(|| ApiError::invalid_token("Invalid token."))?;

    trace!(user_id = user.id, "Request authenticated");
    request.extensions_mut().insert(AuthContext { user, token: key });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn generated_tokens_are_43_url_safe_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn generated_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn token_header_parses_key() {
        let key = token_from_headers(&headers_with("Token abc123")).unwrap();
        assert_eq!(key.as_deref(), Some("abc123"));
    }

    #[test]
    fn token_keyword_is_case_insensitive() {
        let key = token_from_headers(&headers_with("token abc123")).unwrap();
        assert_eq!(key.as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_header_is_not_provided() {
        assert!(token_from_headers(&HeaderMap::new()).unwrap().is_none());
    }

    #[test]
    fn other_scheme_is_not_provided() {
        assert!(token_from_headers(&headers_with("Bearer abc123"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn keyword_without_key_is_invalid() {
        let err = token_from_headers(&headers_with("Token")).unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken(ref m) if m.contains("No credentials")));
    }

    #[test]
    fn key_with_spaces_is_invalid() {
        let err = token_from_headers(&headers_with("Token abc 123")).unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken(ref m) if m.contains("spaces")));
    }

    #[tokio::test]
    async fn password_hash_verifies() {
        let hash = hash_password("qwerty", 4).await.unwrap();
        assert_ne!(hash, "qwerty");
        assert!(verify_password("qwerty", &hash).await.unwrap());
        assert!(!verify_password("wrongpwd", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn password_beyond_bcrypt_limit_never_verifies() {
        let stored = "a".repeat(MAX_PASSWORD_BYTES);
        let hash = hash_password(&stored, 4).await.unwrap();
        assert!(verify_password(&stored, &hash).await.unwrap());

        // Same first 72 bytes, so plain bcrypt would accept it.
        let longer = format!("{stored}WRONG");
        assert!(!verify_password(&longer, &hash).await.unwrap());
    }

    #[tokio::test]
    async fn overlong_password_is_not_hashed() {
        let err = hash_password(&"a".repeat(MAX_PASSWORD_BYTES + 1), 4)
            .await
            .unwrap_err();
        let ApiError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert_eq!(errors.get("password").unwrap(), [password_too_long_message()]);
    }

    #[tokio::test]
    async fn malformed_hash_does_not_verify() {
        assert!(!verify_password("qwerty", "not-a-hash").await.unwrap());
    }

    #[tokio::test]
    async fn authenticate_checks_username_and_password() {
        let db = Database::in_memory().await.unwrap();
        let hash = hash_password("qwerty", 4).await.unwrap();
        let user = db.create_user("Johny", "johny@mail.ua", &hash).await.unwrap();

        let found = authenticate(&db, "Johny", "qwerty").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
        assert!(authenticate(&db, "Johny", "wrongpwd").await.unwrap().is_none());
        assert!(authenticate(&db, "Mary", "qwerty").await.unwrap().is_none());
    }
}
