//! Hand-off transform for session material
//!
//! Consumers want a ready-to-send `Cookie` header value and the CSRF token,
//! not the raw exported cookie array. The transform is pure; the leasing
//! engine applies it at allocation time.

use crate::credential::SessionCookie;

/// Name of the cookie whose value doubles as the CSRF token.
const CSRF_COOKIE: &str = "csrftoken";

/// Consumer-ready form of a credential's session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHeader {
    /// `name=value` pairs joined with `"; "`
    pub cookie: String,
    /// Value of the `csrftoken` cookie, empty if absent
    pub csrf_token: String,
}

/// Convert exported cookies into a header string and CSRF token.
///
/// Cookies with an empty name or value are skipped. Surrounding double
/// quotes are stripped from values (some exporters keep them).
pub fn to_header(cookies: &[SessionCookie]) -> SessionHeader {
    let mut parts = Vec::with_capacity(cookies.len());
    let mut csrf_token = String::new();

    for cookie in cookies {
        if cookie.name.is_empty() || cookie.value.is_empty() {
            continue;
        }
        let value = cookie.value.trim_matches('"');
        if cookie.name == CSRF_COOKIE {
            csrf_token = value.to_string();
        }
        parts.push(format!("{}={}", cookie.name, value));
    }

    SessionHeader {
        cookie: parts.join("; "),
        csrf_token,
    }
}
