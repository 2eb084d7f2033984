//! Least-recently-used credential leasing
//!
//! Selection and marking happen inside one `modify_category` call, i.e. under
//! the category's store lock. Two concurrent `acquire` calls for the same
//! category are serialized by that lock, so they can never both observe the
//! same credential as unleased.

use common::Secret;
use session_store::{Credential, now_millis, to_header};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::pool::Pool;

/// A credential handed to one consumer, with its session in consumer-ready form.
#[derive(Debug, Clone)]
pub struct Lease {
    pub credential_id: String,
    pub category: String,
    pub username: String,
    /// `Cookie` header value
    pub cookie: Secret<String>,
    pub csrf_token: Secret<String>,
    /// Unix millis at which the lease was granted
    pub leased_at: u64,
    /// Previous release time; `None` if the credential had never been used
    pub last_released_at: Option<u64>,
}

impl Lease {
    fn from_credential(credential: &Credential, leased_at: u64) -> Self {
        let header = to_header(&credential.session);
        Self {
            credential_id: credential.id.clone(),
            category: credential.category.clone(),
            username: credential.username.clone(),
            cookie: header.cookie.into(),
            csrf_token: header.csrf_token.into(),
            leased_at,
            last_released_at: credential.last_released_at,
        }
    }
}

/// Whether a credential may be handed out.
pub fn is_eligible(credential: &Credential, ban_threshold: u32) -> bool {
    credential.active && !credential.leased && credential.consecutive_failures < ban_threshold
}

/// Pick the eligible credential released longest ago.
///
/// Never-released credentials come first; ties break on id so the choice is
/// deterministic.
pub fn select_lru(records: &mut [Credential], ban_threshold: u32) -> Option<&mut Credential> {
    records
        .iter_mut()
        .filter(|c| is_eligible(c, ban_threshold))
        .min_by(|a, b| lru_key(a).cmp(&lru_key(b)))
}

fn lru_key(credential: &Credential) -> (Option<u64>, &str) {
    (credential.last_released_at, credential.id.as_str())
}

/// Flip a credential to leased, refusing one that already is.
pub(crate) fn mark_leased(credential: &mut Credential) -> Result<()> {
    if credential.leased {
        return Err(Error::AllocationConflict(credential.id.clone()));
    }
    credential.leased = true;
    Ok(())
}

impl Pool {
    /// Lease the least recently released eligible credential of `category`.
    ///
    /// Returns `Ok(None)` when nothing is eligible; that is the normal
    /// "wait and try again" signal, not an error. Exactly one credential
    /// changes state per successful call.
    pub async fn acquire(&self, category: &str) -> Result<Option<Lease>> {
        let ban_threshold = self.ban_threshold;
        let leased_at = now_millis();

        let selected = self
            .store
            .modify_category(category, |records| -> Result<Option<Lease>> {
                let Some(credential) = select_lru(records, ban_threshold) else {
                    return Ok(None);
                };
                mark_leased(credential)?;
                Ok(Some(Lease::from_credential(credential, leased_at)))
            })
            .await?;

        let lease = match selected {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                error!(category, error = %e, "allocation conflict, locking discipline violated");
                metrics::counter!("lease_conflicts_total", "category" => category.to_string())
                    .increment(1);
                return Err(e);
            }
            None => None,
        };

        match &lease {
            Some(lease) => {
                info!(
                    category,
                    credential_id = lease.credential_id,
                    username = lease.username,
                    previously_used = lease.last_released_at.is_some(),
                    "credential leased"
                );
                metrics::counter!("leases_acquired_total", "category" => category.to_string())
                    .increment(1);
            }
            None => {
                debug!(category, "no eligible credential");
                metrics::counter!("lease_unavailable_total", "category" => category.to_string())
                    .increment(1);
            }
        }
        Ok(lease)
    }
}
