use std::fmt;

use serde::{Deserialize, Serialize};

/// The identity a write is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Unique identifier of the acting user.
    pub id: String,
    /// Display name, if the identity provider supplied one.
    pub username: Option<String>,
}

impl Actor {
    /// Creates an actor with the given id and no display name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Identity attached to an inbound request by the authentication layer.
///
/// Only [`Identity::User`] with `authenticated == true` is recognized as an
/// actor; everything else is treated as anonymous for attribution purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Identity {
    /// No credentials presented.
    Anonymous,
    /// A user account, possibly not (yet) authenticated.
    User { actor: Actor, authenticated: bool },
    /// A machine credential (API key, service token). Not an actor.
    Service { name: String },
}

impl Identity {
    /// Convenience constructor for an authenticated user.
    #[must_use]
    pub fn authenticated(actor: Actor) -> Self {
        Self::User {
            actor,
            authenticated: true,
        }
    }

    /// Returns the actor if this is an authenticated user.
    #[must_use]
    pub fn authenticated_actor(&self) -> Option<&Actor> {
        match self {
            Self::User {
                actor,
                authenticated: true,
            } => Some(actor),
            _ => None,
        }
    }
}
