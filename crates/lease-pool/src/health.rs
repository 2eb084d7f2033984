//! Release accounting and automatic bans
//!
//! Consumers report back once per lease. A success clears the failure run; a
//! failure extends it, and reaching the ban threshold withdraws the
//! credential (`active = false`) until someone re-authenticates it.
//!
//! Releases are idempotent: a report for a credential that is not leased is
//! acknowledged without touching it, so a consumer that reports twice cannot
//! double-count a failure.

use session_store::{Credential, now_millis};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pool::Pool;

/// How a lease ended, as reported by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { reason: Option<String> },
}

impl Outcome {
    /// Build from the wire form: a success flag plus an optional reason.
    pub fn from_report(success: bool, reason: Option<String>) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure { reason }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure { .. } => "failure",
        }
    }
}

/// Acknowledgement of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAck {
    pub credential_id: String,
    /// Failure run after this release
    pub consecutive_failures: u32,
    /// This release withdrew the credential
    pub banned: bool,
    /// The credential was not leased; nothing changed
    pub already_released: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    AlreadyReleased,
    Released,
    Banned,
}

/// Apply a release to a credential record.
pub(crate) fn apply_release(
    credential: &mut Credential,
    outcome: &Outcome,
    now: u64,
    ban_threshold: u32,
) -> Transition {
    if !credential.leased {
        return Transition::AlreadyReleased;
    }
    credential.leased = false;
    credential.last_released_at = Some(now);

    match outcome {
        Outcome::Success => {
            credential.consecutive_failures = 0;
            credential.ban_reason = None;
            Transition::Released
        }
        Outcome::Failure { reason } => {
            credential.consecutive_failures = credential.consecutive_failures.saturating_add(1);
            if let Some(reason) = reason {
                credential.ban_reason = Some(reason.clone());
            }
            if credential.active && credential.consecutive_failures >= ban_threshold {
                credential.active = false;
                Transition::Banned
            } else {
                Transition::Released
            }
        }
    }
}

impl Pool {
    /// Return a leased credential and record how its use went.
    ///
    /// Fails with `UnknownCredential` if `id` does not exist. Releasing a
    /// credential that is not leased is acknowledged as a no-op.
    pub async fn release(&self, id: &str, outcome: Outcome) -> Result<ReleaseAck> {
        let now = now_millis();
        let ban_threshold = self.ban_threshold;

        let applied = self
            .store
            .modify(id, |c| {
                let transition = apply_release(c, &outcome, now, ban_threshold);
                (transition, c.consecutive_failures, c.category.clone())
            })
            .await?;

        let Some((transition, consecutive_failures, category)) = applied else {
            warn!(credential_id = id, "release for unknown credential");
            metrics::counter!("releases_unknown_total").increment(1);
            return Err(Error::UnknownCredential(id.to_string()));
        };

        match transition {
            Transition::AlreadyReleased => {
                debug!(credential_id = id, category, "credential already released, ignoring");
            }
            Transition::Released => match &outcome {
                Outcome::Success => {
                    info!(credential_id = id, category, "credential released");
                }
                Outcome::Failure { reason } => {
                    warn!(
                        credential_id = id,
                        category,
                        consecutive_failures,
                        reason = reason.as_deref().unwrap_or("unknown"),
                        "credential released with failure"
                    );
                }
            },
            Transition::Banned => {
                let reason = match &outcome {
                    Outcome::Failure { reason } => reason.as_deref().unwrap_or("unknown"),
                    Outcome::Success => "unknown",
                };
                warn!(
                    credential_id = id,
                    category,
                    consecutive_failures,
                    reason,
                    "credential banned after consecutive failures"
                );
                metrics::counter!("credentials_banned_total", "category" => category.clone())
                    .increment(1);
            }
        }

        if transition != Transition::AlreadyReleased {
            metrics::counter!(
                "credentials_released_total",
                "category" => category,
                "outcome" => outcome.label()
            )
            .increment(1);
        }

        Ok(ReleaseAck {
            credential_id: id.to_string(),
            consecutive_failures,
            banned: transition == Transition::Banned,
            already_released: transition == Transition::AlreadyReleased,
        })
    }
}
