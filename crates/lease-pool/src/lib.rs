//! Leasing engine for browser-session credentials
//!
//! Hands each credential to at most one consumer at a time, picks the least
//! recently released credential of a category, and withdraws credentials
//! that keep failing. The credential store is the single source of truth;
//! the pool keeps no copy of credential state between calls.
//!
//! Credential lifecycle:
//! 1. Admin registers a credential → inactive
//! 2. External login completes, admin activates it → `Available`
//! 3. `Pool::acquire` picks the least recently released → `Leased`
//! 4. Consumer reports back through `Pool::release` → `Available`
//! 5. Fifth consecutive failed release → `Banned` until re-activated
//!
//! `Scheduler` runs one worker per category and turns "nothing available"
//! into an unlimited, fixed-interval wait that preserves submission order.

pub mod error;
pub mod health;
pub mod lease;
pub mod pool;
pub mod report;
pub mod scheduler;

pub use error::{Error, Result};
pub use health::{Outcome, ReleaseAck};
pub use lease::Lease;
pub use pool::{CategoryCounts, CredentialState, DEFAULT_BAN_THRESHOLD, Pool};
pub use report::spawn_gauge_task;
pub use scheduler::{DEFAULT_RETRY_INTERVAL, Dispatcher, Job, RetryPolicy, Scheduler};
