//! Credential record and session cookie types

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single leasable credential.
///
/// Timestamps are unix milliseconds. `last_released_at` is `None` until the
/// first release; `Option`'s ordering puts `None` before any `Some`, which is
/// what least-recently-used selection relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    /// Pool partition, e.g. the platform name. Allocation never crosses it.
    pub category: String,
    /// Display label for logs and the admin API
    #[serde(default)]
    pub username: String,
    /// Eligible for allocation. False until authenticated, and after a ban.
    #[serde(default)]
    pub active: bool,
    /// Held by a consumer
    #[serde(default)]
    pub leased: bool,
    #[serde(default)]
    pub last_released_at: Option<u64>,
    /// Unbroken run of failed uses since the last success or re-authentication
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Reason given with the most recent failed use
    #[serde(default)]
    pub ban_reason: Option<String>,
    #[serde(default)]
    pub authenticated_at: Option<u64>,
    /// Browser session cookies, as exported from the login session
    #[serde(default)]
    pub session: Vec<SessionCookie>,
}

impl Credential {
    /// A freshly registered credential: inactive, never used, no session yet.
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            username: String::new(),
            active: false,
            leased: false,
            last_released_at: None,
            consecutive_failures: 0,
            ban_reason: None,
            authenticated_at: None,
            session: Vec::new(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_session(mut self, session: Vec<SessionCookie>) -> Self {
        self.session = session;
        self
    }
}

/// One browser cookie.
///
/// Only `name` and `value` matter to the broker; any other attributes
/// (domain, path, expiry, ...) are carried through untouched so the stored
/// document round-trips.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            attributes: serde_json::Map::new(),
        }
    }
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
