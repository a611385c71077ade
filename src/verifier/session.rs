use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::trust::TrustAnchor;
use crate::core::{
    dcql_query::DcqlQuery, error::VerificationError,
    presentation_definition::PresentationDefinition,
};

/// A verification request, created PENDING and completed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub id: Uuid,
    /// Expected in the key-binding proof of every presentation.
    pub nonce: String,
    pub query: CredentialQuery,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepted_issuer_dids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trust_anchors: Vec<TrustAnchor>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl VerificationRequest {
    pub fn state(&self) -> State {
        match &self.outcome {
            None => State::Pending,
            Some(Outcome::Success { .. }) => State::Success,
            Some(Outcome::Failure { .. }) => State::Failed,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether a presentation or rejection may still be recorded.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.state() == State::Pending && !self.is_expired(now)
    }

    /// The state as observed at `now`.
    pub fn status(&self, now: DateTime<Utc>) -> Status {
        match &self.outcome {
            Some(outcome) => Status::Complete(outcome.clone()),
            None if self.is_expired(now) => Status::Expired,
            None => Status::Pending,
        }
    }
}

/// What the presented credentials are matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialQuery {
    PresentationDefinition(PresentationDefinition),
    DcqlQuery(DcqlQuery),
}

/// Stored state of a verification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Pending,
    Success,
    Failed,
}

/// Effective state of a verification request, as reported to pollers.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// Waiting for the wallet.
    Pending,
    /// Still pending but past its expiry; nothing more will be accepted.
    Expired,
    /// The wallet responded and the outcome is recorded.
    Complete(Outcome),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// The presentation verified. `credentials` holds the decoded claims.
    Success { credentials: Json },
    /// The presentation did not verify, or the wallet rejected the request.
    Failure { error: VerificationError },
}

/// Result of [SessionStore::complete].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The request was pending and now holds the outcome.
    Applied,
    /// The request was already completed; nothing was written.
    AlreadyClosed,
    /// The request expired before the outcome could be recorded; nothing was
    /// written.
    Expired,
}

/// Storage interface for verification requests.
#[async_trait]
pub trait SessionStore: Debug + Send + Sync {
    /// Store a new verification request.
    async fn save(&self, request: VerificationRequest) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<VerificationRequest>>;

    /// Record the outcome of a request that is still pending at `now`.
    ///
    /// Must be atomic: of two concurrent completions of the same request only
    /// one may be [Transition::Applied]. A request past its expiry is left
    /// untouched and reported as [Transition::Expired].
    async fn complete(
        &self,
        id: Uuid,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Transition>;

    /// Remove every request that expired before `cutoff`, returning how many.
    async fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// A local in-memory store. Not for production use!
///
/// # Warning
/// This in-memory store should only be used for test purposes, it will not work for a distributed
/// deployment.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    store: Arc<Mutex<BTreeMap<Uuid, VerificationRequest>>>,
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, request: VerificationRequest) -> Result<()> {
        self.store.lock().await.insert(request.id, request);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<VerificationRequest>> {
        Ok(self.store.lock().await.get(&id).cloned())
    }

    async fn complete(
        &self,
        id: Uuid,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let mut store = self.store.lock().await;
        let Some(request) = store.get_mut(&id) else {
            bail!("verification request not found")
        };
        if request.outcome.is_some() {
            return Ok(Transition::AlreadyClosed);
        }
        if request.is_expired(now) {
            return Ok(Transition::Expired);
        }
        request.outcome = Some(outcome);
        Ok(Transition::Applied)
    }

    async fn delete_expired_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut store = self.store.lock().await;
        let before = store.len();
        store.retain(|_, request| request.expires_at >= cutoff);
        Ok(before - store.len())
    }
}
