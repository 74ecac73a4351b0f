//! Access policy for event mutation.
//!
//! Every update and delete handler asks [`can_mutate_event`] before touching
//! the store, so tightening who may edit an event is a configuration change.

use std::fmt;
use std::str::FromStr;

use crate::models::{Event, User};

/// Who is allowed to update or delete an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventMutationPolicy {
    /// Any authenticated user may mutate any event.
    #[default]
    AnyAuthenticated,

    /// Only the event's organizer may mutate it.
    OrganizerOnly,
}

impl FromStr for EventMutationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any-authenticated" => Ok(Self::AnyAuthenticated),
            "organizer-only" => Ok(Self::OrganizerOnly),
            other => Err(format!(
                "expected 'any-authenticated' or 'organizer-only', got '{other}'"
            )),
        }
    }
}

impl fmt::Display for EventMutationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyAuthenticated => f.write_str("any-authenticated"),
            Self::OrganizerOnly => f.write_str("organizer-only"),
        }
    }
}

/// Returns `true` if `user` may update or delete `event` under `policy`.
pub fn can_mutate_event(policy: EventMutationPolicy, user: &User, event: &Event) -> bool {
    match policy {
        EventMutationPolicy::AnyAuthenticated => true,
        EventMutationPolicy::OrganizerOnly => event.organizer_id == user.id,
    }
}
