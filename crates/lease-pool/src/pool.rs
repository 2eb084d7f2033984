//! Pool handle, credential administration and health summary
//!
//! `Pool` wraps the credential store. Leasing lives in `lease.rs`, release
//! accounting in `health.rs`; this module holds the operations the admin API
//! drives (register, activate, deactivate, remove) and the status summary.

use std::sync::Arc;

use session_store::{Credential, CredentialStore, SessionCookie, now_millis};
use tracing::info;

use crate::error::{Error, Result};

/// Consecutive failed uses after which a credential is withdrawn.
pub const DEFAULT_BAN_THRESHOLD: u32 = 5;

/// Derived status of a credential, for reporting.
///
/// Transitions:
/// - Inactive → Available (activate)
/// - Available → Leased (acquire)
/// - Leased → Available (release)
/// - Leased → Banned (release with failure reaching the threshold)
/// - Banned → Available (activate, which resets the failure count)
/// - any → Inactive (deactivate)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Available,
    Leased,
    Banned,
    Inactive,
}

impl CredentialState {
    pub fn of(credential: &Credential, ban_threshold: u32) -> Self {
        if credential.leased {
            CredentialState::Leased
        } else if credential.consecutive_failures >= ban_threshold {
            CredentialState::Banned
        } else if !credential.active {
            CredentialState::Inactive
        } else {
            CredentialState::Available
        }
    }

    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            CredentialState::Available => "available",
            CredentialState::Leased => "leased",
            CredentialState::Banned => "banned",
            CredentialState::Inactive => "inactive",
        }
    }
}

/// Per-category credential counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub category: String,
    pub available: usize,
    pub leased: usize,
    pub banned: usize,
    pub inactive: usize,
}

impl CategoryCounts {
    fn record(&mut self, state: CredentialState) {
        match state {
            CredentialState::Available => self.available += 1,
            CredentialState::Leased => self.leased += 1,
            CredentialState::Banned => self.banned += 1,
            CredentialState::Inactive => self.inactive += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.available + self.leased + self.banned + self.inactive
    }
}

/// Credential pool backed by a `CredentialStore`.
///
/// Cheap to share behind an `Arc`; all state lives in the store.
pub struct Pool {
    pub(crate) store: Arc<CredentialStore>,
    pub(crate) ban_threshold: u32,
}

impl Pool {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            ban_threshold: DEFAULT_BAN_THRESHOLD,
        }
    }

    /// Override the ban threshold. Values below 1 are raised to 1.
    pub fn with_ban_threshold(mut self, threshold: u32) -> Self {
        self.ban_threshold = threshold.max(1);
        self
    }

    pub fn ban_threshold(&self) -> u32 {
        self.ban_threshold
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Register a new, inactive credential.
    pub async fn register(
        &self,
        id: &str,
        category: &str,
        username: &str,
        session: Vec<SessionCookie>,
    ) -> Result<Credential> {
        let credential = Credential::new(id, category)
            .with_username(username)
            .with_session(session);
        self.store.insert(credential.clone()).await?;
        info!(credential_id = id, category, username, "credential registered");
        Ok(credential)
    }

    /// External re-authentication: make the credential eligible again.
    ///
    /// Resets the failure count, otherwise a previously banned credential
    /// would be banned again on its next failed use. `session` replaces the
    /// stored session material when given.
    pub async fn activate(
        &self,
        id: &str,
        session: Option<Vec<SessionCookie>>,
    ) -> Result<Credential> {
        let now = now_millis();
        let updated = self
            .store
            .modify(id, |c| {
                if let Some(session) = session {
                    c.session = session;
                }
                c.active = true;
                c.consecutive_failures = 0;
                c.ban_reason = None;
                c.authenticated_at = Some(now);
                c.clone()
            })
            .await?
            .ok_or_else(|| Error::UnknownCredential(id.to_string()))?;

        info!(credential_id = id, category = updated.category, "credential activated");
        Ok(updated)
    }

    /// Manually withdraw a credential from allocation.
    pub async fn deactivate(&self, id: &str, reason: Option<String>) -> Result<Credential> {
        let updated = self
            .store
            .modify(id, |c| {
                c.active = false;
                if reason.is_some() {
                    c.ban_reason = reason;
                }
                c.clone()
            })
            .await?
            .ok_or_else(|| Error::UnknownCredential(id.to_string()))?;

        info!(credential_id = id, category = updated.category, "credential deactivated");
        Ok(updated)
    }

    /// Delete a credential from the store.
    pub async fn remove(&self, id: &str) -> Result<Credential> {
        let removed = self
            .store
            .remove(id)
            .await?
            .ok_or_else(|| Error::UnknownCredential(id.to_string()))?;
        info!(credential_id = id, category = removed.category, "credential removed");
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Option<Credential> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Vec<Credential> {
        self.store.list().await
    }

    /// Count credentials by state, per category, sorted by category.
    pub async fn counts(&self) -> Vec<CategoryCounts> {
        let mut out: Vec<CategoryCounts> = Vec::new();
        for credential in self.store.list().await {
            let state = CredentialState::of(&credential, self.ban_threshold);
            match out.last_mut() {
                Some(last) if last.category == credential.category => last.record(state),
                _ => {
                    let mut counts = CategoryCounts {
                        category: credential.category.clone(),
                        ..Default::default()
                    };
                    counts.record(state);
                    out.push(counts);
                }
            }
        }
        out
    }

    /// Pool health summary for the health endpoint.
    ///
    /// Status mapping: every credential usable (available or leased) →
    /// healthy, some usable → degraded, none usable or empty → unhealthy.
    pub async fn health(&self) -> serde_json::Value {
        let counts = self.counts().await;

        let total: usize = counts.iter().map(CategoryCounts::total).sum();
        let usable: usize = counts.iter().map(|c| c.available + c.leased).sum();
        let status = if total > 0 && usable == total {
            "healthy"
        } else if usable > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        let categories: Vec<serde_json::Value> = counts
            .iter()
            .map(|c| {
                serde_json::json!({
                    "category": c.category,
                    "available": c.available,
                    "leased": c.leased,
                    "banned": c.banned,
                    "inactive": c.inactive,
                })
            })
            .collect();

        serde_json::json!({
            "status": status,
            "credentials_total": total,
            "credentials_usable": usable,
            "categories": categories,
        })
    }
}
