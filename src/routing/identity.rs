//! Two-tier identity model
//!
//! A request is either Internal (a currently valid authenticated session) or
//! External (anonymous, identified only by the username it supplied). The
//! decision depends on session validity alone; username content is never
//! inspected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix carried by every internal identifier
pub const INTERNAL_PREFIX: &str = "internal_";

/// Prefix carried by every external identifier
pub const EXTERNAL_PREFIX: &str = "external_";

/// Account identifier of an authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Username supplied by an anonymous user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Who a request belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Identity {
    Internal(AccountId),
    External(Username),
}

impl Identity {
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Prefixed identifier, see [`compute_id`]
    pub fn id(&self) -> String {
        compute_id(self)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Authenticated session as handed over by the OAuth layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub account_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.account_id.is_empty() && self.expires_at > now
    }
}

/// Credentials attached to an incoming request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestCredentials {
    /// Session established by the OAuth layer, if any
    pub session: Option<Session>,
    /// Username the request supplied (used only for anonymous requests)
    pub username: String,
}

impl RequestCredentials {
    pub fn anonymous(username: impl Into<String>) -> Self {
        Self {
            session: None,
            username: username.into(),
        }
    }

    pub fn authenticated(session: Session, username: impl Into<String>) -> Self {
        Self {
            session: Some(session),
            username: username.into(),
        }
    }
}

/// Classify a request. Internal iff a session exists and is valid at `now`.
pub fn detect(credentials: &RequestCredentials, now: DateTime<Utc>) -> Identity {
    match &credentials.session {
        Some(session) if session.is_valid_at(now) => {
            Identity::Internal(AccountId::new(session.account_id.clone()))
        }
        _ => Identity::External(Username::new(credentials.username.clone())),
    }
}

/// Identifier with an unambiguous scope prefix
pub fn compute_id(identity: &Identity) -> String {
    match identity {
        Identity::Internal(account) => format!("{}{}", INTERNAL_PREFIX, account.as_str()),
        Identity::External(user) => format!("{}{}", EXTERNAL_PREFIX, user.as_str()),
    }
}
