//! Durable store for leasable browser-session credentials
//!
//! Holds one record per credential, partitioned by category. Every mutation
//! is an atomic read-modify-write against a single category partition; the
//! store never hands out references to its records, only clones.
//!
//! Credential lifecycle as seen by the store:
//! 1. Admin registers a credential → `active = false`
//! 2. External login completes → `active = true`, failures reset
//! 3. Leasing engine flips `leased` on and off through `modify_category`/`modify`
//! 4. Release tracker withdraws it (`active = false`) after repeated failures

pub mod cookies;
pub mod credential;
pub mod error;
pub mod store;

pub use cookies::{SessionHeader, to_header};
pub use credential::{Credential, SessionCookie, now_millis};
pub use error::{Error, Result};
pub use store::CredentialStore;
