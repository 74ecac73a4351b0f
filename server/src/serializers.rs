//! Translation between stored entities and wire JSON.
//!
//! Incoming bodies are parsed into a JSON object with [`parse_body`] and then
//! validated field by field. Validation collects every failing field before
//! returning, so clients see the complete [`FieldErrors`] map in one response.
//! Constraints that only the store can check (uniqueness, existence of a
//! referenced user) are reported through each serializer's `store_error`,
//! which turns a [`DbError`] into the same field-level shape.
//!
//! | Serializer | Writable | Read-only | Write-only |
//! |------------|----------|-----------|------------|
//! | [`UserSerializer`] | `username`, `email`, `password` | `id` | `password` |
//! | [`EventSerializer`] | `title`, `description`, `date`, `location`, `organizer` | | |
//! | [`RegistrationSerializer`] | | `user`, `event` | |

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::{password_too_long_message, MAX_PASSWORD_BYTES};
use crate::db::DbError;
use crate::error::{ApiError, FieldErrors, NON_FIELD_ERRORS};
use crate::models::{Event, EventDraft, EventRegistration, NewUser, User};

const REQUIRED: &str = "This field is required.";
const NOT_NULL: &str = "This field may not be null.";
const NOT_BLANK: &str = "This field may not be blank.";
const NOT_A_STRING: &str = "Not a valid string.";

const USERNAME_MAX_LENGTH: usize = 150;
const EMAIL_MAX_LENGTH: usize = 254;
const TITLE_MAX_LENGTH: usize = 200;
const LOCATION_MAX_LENGTH: usize = 200;

/// JSON object holding a request's fields.
pub type Data = Map<String, Value>;

/// Parses a request body into a JSON object.
///
/// An empty body is an empty object. Anything other than an object is a
/// `non_field_errors` validation failure.
pub fn parse_body(body: &[u8]) -> Result<Data, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Data::new());
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::MalformedBody(format!("JSON parse error - {e}")))?;

    match value {
        Value::Object(data) => Ok(data),
        other => Err(FieldErrors::single(
            NON_FIELD_ERRORS,
            format!(
                "Invalid data. Expected a dictionary, but got {}.",
                json_type_name(&other)
            ),
        )
        .into()),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Constraints for a text field.
#[derive(Debug, Clone, Copy)]
struct CharField {
    name: &'static str,
    max_length: Option<usize>,
    allow_blank: bool,
    trim: bool,
}

impl CharField {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            max_length: None,
            allow_blank: false,
            trim: true,
        }
    }

    const fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    const fn allow_blank(mut self) -> Self {
        self.allow_blank = true;
        self
    }

    const fn keep_whitespace(mut self) -> Self {
        self.trim = false;
        self
    }

    /// Validates a present value. Numbers are accepted and stringified.
    fn validate(&self, value: &Value, errors: &mut FieldErrors) -> Option<String> {
        let raw = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Null => {
                errors.add(self.name, NOT_NULL);
                return None;
            }
            _ => {
                errors.add(self.name, NOT_A_STRING);
                return None;
            }
        };

        let value = if self.trim {
            raw.trim().to_string()
        } else {
            raw
        };

        if !self.allow_blank && value.trim().is_empty() {
            errors.add(self.name, NOT_BLANK);
            return None;
        }

        if let Some(max) = self.max_length {
            if value.chars().count() > max {
                errors.add(
                    self.name,
                    format!("Ensure this field has no more than {max} characters."),
                );
                return None;
            }
        }

        Some(value)
    }

    /// Validates a field that must be present.
    fn required(&self, data: &Data, errors: &mut FieldErrors) -> Option<String> {
        match data.get(self.name) {
            Some(value) => self.validate(value, errors),
            None => {
                errors.add(self.name, REQUIRED);
                None
            }
        }
    }

    /// Validates a field for a partial update: absent means unchanged.
    fn optional(&self, data: &Data, errors: &mut FieldErrors) -> Option<Option<String>> {
        data.get(self.name).map(|value| self.validate(value, errors))
    }
}

fn is_valid_username(username: &str) -> bool {
    username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '@' | '.' | '+' | '-'))
}

fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// Parses an ISO 8601 timestamp. Values without an offset are UTC, and a bare
/// date means midnight UTC.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Renders a timestamp the way it is accepted: RFC 3339 with a `Z` suffix.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn validate_date(value: &Value, errors: &mut FieldErrors) -> Option<DateTime<Utc>> {
    const FIELD: &str = "date";
    match value {
        Value::Null => {
            errors.add(FIELD, NOT_NULL);
            None
        }
        Value::String(s) => {
            let parsed = parse_datetime(s);
            if parsed.is_none() {
                errors.add(
                    FIELD,
                    "Datetime has wrong format. Use one of these formats instead: \
                     YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z].",
                );
            }
            parsed
        }
        _ => {
            errors.add(
                FIELD,
                "Datetime has wrong format. Use one of these formats instead: \
                 YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z].",
            );
            None
        }
    }
}

/// Validates a primary-key reference. Existence is checked by the store.
fn validate_pk(name: &'static str, value: &Value, errors: &mut FieldErrors) -> Option<i64> {
    let pk = match value {
        Value::Null => {
            errors.add(name, NOT_NULL);
            return None;
        }
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        other => {
            errors.add(
                name,
                format!(
                    "Incorrect type. Expected pk value, received {}.",
                    json_type_name(other)
                ),
            );
            return None;
        }
    };

    if pk.is_none() {
        errors.add(
            name,
            format!(
                "Incorrect type. Expected pk value, received {}.",
                json_type_name(value)
            ),
        );
    }
    pk
}

// ============================================================================
// Users
// ============================================================================

/// Wire form of a [`User`]. The password is write-only and never rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRepr {
    pub id: i64,
    pub username: String,
    pub email: String,
}

pub struct UserSerializer;

impl UserSerializer {
    const USERNAME: CharField = CharField::new("username").max_length(USERNAME_MAX_LENGTH);
    const EMAIL: CharField = CharField::new("email").max_length(EMAIL_MAX_LENGTH);
    const PASSWORD: CharField = CharField::new("password").keep_whitespace();

    /// Validates a registration payload.
    pub fn validate(data: &Data) -> Result<NewUser, FieldErrors> {
        let mut errors = FieldErrors::new();

        let username = Self::USERNAME.required(data, &mut errors);
        if let Some(ref username) = username {
            if !is_valid_username(username) {
                errors.add(
                    "username",
                    "Enter a valid username. This value may contain only letters, \
                     numbers, and @/./+/-/_ characters.",
                );
            }
        }

        let email = Self::EMAIL.required(data, &mut errors);
        if let Some(ref email) = email {
            if !is_valid_email(email) {
                errors.add("email", "Enter a valid email address.");
            }
        }

        // Measured in bytes: bcrypt ignores anything past its input limit.
        let password = Self::PASSWORD
            .required(data, &mut errors)
            .filter(|password| {
                let fits = password.len() <= MAX_PASSWORD_BYTES;
                if !fits {
                    errors.add("password", password_too_long_message());
                }
                fits
            });

        errors.into_result()?;
        match (username, email, password) {
            (Some(username), Some(email), Some(password)) => Ok(NewUser {
                username,
                email,
                password,
            }),
            _ => Err(FieldErrors::single(NON_FIELD_ERRORS, "Invalid data.")),
        }
    }

    pub fn render(user: &User) -> UserRepr {
        UserRepr {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }

    /// Maps store constraint failures onto field errors.
    pub fn store_error(err: DbError) -> ApiError {
        match err {
            DbError::UniqueViolation(_) => {
                FieldErrors::single("username", "A user with that username already exists.").into()
            }
            other => other.into(),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Wire form of an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRepr {
    pub title: String,
    pub description: String,
    pub date: String,
    pub location: String,
    pub organizer: i64,
}

pub struct EventSerializer;

impl EventSerializer {
    const TITLE: CharField = CharField::new("title").max_length(TITLE_MAX_LENGTH);
    const DESCRIPTION: CharField = CharField::new("description").allow_blank();
    const LOCATION: CharField = CharField::new("location").max_length(LOCATION_MAX_LENGTH);

    /// Validates a full payload. Every field is required.
    pub fn validate(data: &Data) -> Result<EventDraft, FieldErrors> {
        let mut errors = FieldErrors::new();

        let title = Self::TITLE.required(data, &mut errors);
        let description = Self::DESCRIPTION.required(data, &mut errors);
        let date = match data.get("date") {
            Some(value) => validate_date(value, &mut errors),
            None => {
                errors.add("date", REQUIRED);
                None
            }
        };
        let location = Self::LOCATION.required(data, &mut errors);
        let organizer_id = match data.get("organizer") {
            Some(value) => validate_pk("organizer", value, &mut errors),
            None => {
                errors.add("organizer", REQUIRED);
                None
            }
        };

        errors.into_result()?;
        match (title, description, date, location, organizer_id) {
            (Some(title), Some(description), Some(date), Some(location), Some(organizer_id)) => {
                Ok(EventDraft {
                    title,
                    description,
                    date,
                    location,
                    organizer_id,
                })
            }
            _ => Err(FieldErrors::single(NON_FIELD_ERRORS, "Invalid data.")),
        }
    }

    /// Validates a partial payload against the current state of `event`.
    ///
    /// Fields absent from `data` keep their current values.
    pub fn validate_partial(data: &Data, event: &Event) -> Result<EventDraft, FieldErrors> {
        let mut errors = FieldErrors::new();
        let mut draft = EventDraft::from_event(event);

        if let Some(Some(title)) = Self::TITLE.optional(data, &mut errors) {
            draft.title = title;
        }
        if let Some(Some(description)) = Self::DESCRIPTION.optional(data, &mut errors) {
            draft.description = description;
        }
        if let Some(value) = data.get("date") {
            if let Some(date) = validate_date(value, &mut errors) {
                draft.date = date;
            }
        }
        if let Some(Some(location)) = Self::LOCATION.optional(data, &mut errors) {
            draft.location = location;
        }
        if let Some(value) = data.get("organizer") {
            if let Some(organizer_id) = validate_pk("organizer", value, &mut errors) {
                draft.organizer_id = organizer_id;
            }
        }

        errors.into_result()?;
        Ok(draft)
    }

    pub fn render(event: &Event) -> EventRepr {
        EventRepr {
            title: event.title.clone(),
            description: event.description.clone(),
            date: format_datetime(&event.date),
            location: event.location.clone(),
            organizer: event.organizer_id,
        }
    }

    pub fn render_list(events: &[Event]) -> Vec<EventRepr> {
        events.iter().map(Self::render).collect()
    }

    /// Maps store constraint failures for `draft` onto field errors.
    pub fn store_error(err: DbError, draft: &EventDraft) -> ApiError {
        match err {
            DbError::UniqueViolation(_) => {
                FieldErrors::single("title", "event with this title already exists.").into()
            }
            DbError::MissingReference => FieldErrors::single(
                "organizer",
                format!(
                    "Invalid pk \"{}\" - object does not exist.",
                    draft.organizer_id
                ),
            )
            .into(),
            other => other.into(),
        }
    }
}

// ============================================================================
// Registrations
// ============================================================================

/// Wire form of an [`EventRegistration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRepr {
    pub user: i64,
    pub event: i64,
}

/// Both fields are read-only: the handler supplies the caller and the path's
/// event, and any `user` or `event` keys in the body are ignored.
pub struct RegistrationSerializer;

impl RegistrationSerializer {
    pub fn render(registration: &EventRegistration) -> RegistrationRepr {
        RegistrationRepr {
            user: registration.user_id,
            event: registration.event_id,
        }
    }

    /// Maps store constraint failures onto API errors.
    pub fn store_error(err: DbError) -> ApiError {
        match err {
            DbError::DuplicateRegistration => FieldErrors::single(
                NON_FIELD_ERRORS,
                "The fields user, event must make a unique set.",
            )
            .into(),
            // The event vanished between lookup and insert.
            DbError::MissingReference => ApiError::NotFound,
            other => other.into(),
        }
    }
}
