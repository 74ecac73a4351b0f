//! Outgoing mail.
//!
//! Mail leaves the server through a [`Mailer`]. The production implementation,
//! [`HttpMailer`], hands each message to an HTTP mail API in a single request
//! with no retry; any failure is returned to the caller unchanged.
//!
//! [`send_event_registration_email`] builds the fixed-format confirmation sent
//! after a user registers for an event, and [`RegistrationNotifier`] bundles a
//! mailer with the sender address so it can be injected into the request
//! handlers as an optional hook.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use eventdesk_server::mailer::{HttpMailer, RegistrationNotifier};
//!
//! let mailer = HttpMailer::new("https://mail.example.com", Some("api-key".into()))?;
//! let notifier = RegistrationNotifier::new(Arc::new(mailer), "mail@example.com");
//! notifier.notify(&user, &event).await?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::models::{Event, User};

/// Timeout for a single mail API request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Subject line of the event registration confirmation.
pub const REGISTRATION_SUBJECT: &str = "Event registration";

/// Errors that can occur while handing a message to the mail API.
#[derive(Debug, Error)]
pub enum MailError {
    /// The request to the mail API timed out.
    #[error("mail request timed out after {0:?}")]
    Timeout(Duration),

    /// The mail API is unreachable.
    #[error("mail service unavailable: {0}")]
    Unavailable(String),

    /// The mail API answered with a non-success status.
    #[error("mail service rejected message with status {status}: {body}")]
    Rejected {
        /// HTTP status returned by the mail API.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Client configuration error, such as a TLS backend failure.
    #[error("mail client configuration error: {0}")]
    Configuration(String),
}

/// A single outgoing email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub to: Vec<String>,
}

/// Something that can deliver a [`MailMessage`].
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Delivers `message`. Implementations must not retry.
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// [`Mailer`] backed by an HTTP mail API.
///
/// Each message is POSTed as JSON to `{base_url}/send`, with the API key, if
/// any, as a bearer token.
#[derive(Clone)]
pub struct HttpMailer {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl fmt::Debug for HttpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMailer")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpMailer {
    /// Creates a new mail API client.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Configuration`] if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, MailError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MailError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let url = format!("{}/send", self.base_url);

        debug!(url = %url, recipients = message.to.len(), "Sending mail");

        let mut request = self.http_client.post(&url).json(message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                MailError::Timeout(REQUEST_TIMEOUT)
            } else if e.is_connect() {
                MailError::Unavailable(format!("connection failed: {e}"))
            } else {
                MailError::Unavailable(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Mail API rejected message");
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(subject = %message.subject, "Mail accepted by mail API");
        Ok(())
    }
}

/// Builds the confirmation sent to `user` after registering for `event`.
pub fn event_registration_message(user: &User, event: &Event, from: &str) -> MailMessage {
    MailMessage {
        subject: REGISTRATION_SUBJECT.to_string(),
        body: format!(
            "Hi {},\n\nYou've successfully registered on {}",
            user.username, event.title
        ),
        from: from.to_string(),
        to: vec![user.email.clone()],
    }
}

/// Sends the event registration confirmation to `user`.
///
/// Delivery failures are returned, not swallowed.
pub async fn send_event_registration_email(
    mailer: &dyn Mailer,
    from: &str,
    user: &User,
    event: &Event,
) -> Result<(), MailError> {
    let message = event_registration_message(user, event, from);
    mailer.send(&message).await
}

/// Hook that emails users after they register for an event.
#[derive(Clone)]
pub struct RegistrationNotifier {
    mailer: Arc<dyn Mailer>,
    from: String,
}

impl fmt::Debug for RegistrationNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationNotifier")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl RegistrationNotifier {
    pub fn new(mailer: Arc<dyn Mailer>, from: impl Into<String>) -> Self {
        Self {
            mailer,
            from: from.into(),
        }
    }

    pub async fn notify(&self, user: &User, event: &Event) -> Result<(), MailError> {
        send_event_registration_email(self.mailer.as_ref(), &self.from, user, event).await
    }
}
