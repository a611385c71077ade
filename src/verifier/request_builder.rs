use std::time::Duration;

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::Utc;
use rand::RngCore;
use tracing::info;
use uuid::Uuid;

use crate::core::{
    dcql_query::DcqlQuery,
    error::{FieldError, RequestValidationError},
    presentation_definition::PresentationDefinition,
};

use super::{
    session::{CredentialQuery, VerificationRequest},
    trust::TrustAnchor,
    Verifier,
};

/// Number of random bytes in a request nonce.
const NONCE_LENGTH: usize = 32;

#[derive(Debug, Clone)]
#[must_use]
pub struct RequestBuilder<'a> {
    presentation_definition: Option<PresentationDefinition>,
    dcql_query: Option<DcqlQuery>,
    accepted_issuer_dids: Vec<String>,
    trust_anchors: Vec<TrustAnchor>,
    ttl: Duration,
    verifier: &'a Verifier,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(verifier: &'a Verifier) -> Self {
        Self {
            presentation_definition: None,
            dcql_query: None,
            accepted_issuer_dids: Vec::new(),
            trust_anchors: Vec::new(),
            ttl: verifier.config().request_ttl,
            verifier,
        }
    }

    /// Request credentials with a presentation definition.
    pub fn with_presentation_definition(mut self, definition: PresentationDefinition) -> Self {
        self.presentation_definition = Some(definition);
        self
    }

    /// Request credentials with a DCQL query.
    pub fn with_dcql_query(mut self, dcql_query: DcqlQuery) -> Self {
        self.dcql_query = Some(dcql_query);
        self
    }

    /// Accept credentials of this issuer without consulting any trust anchor.
    pub fn with_accepted_issuer(mut self, did: impl Into<String>) -> Self {
        self.accepted_issuer_dids.push(did.into());
        self
    }

    /// Accept issuers vouched for by this trust anchor.
    pub fn with_trust_anchor(mut self, anchor: TrustAnchor) -> Self {
        self.trust_anchors.push(anchor);
        self
    }

    /// Override the configured request lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Validate the request, then store it as pending.
    ///
    /// Every problem with the request is reported at once through
    /// [RequestValidationError]; store failures surface as other errors.
    ///
    /// ## Returns
    /// The stored request. Its `id` is used for polling and for submitting the
    /// response, its `nonce` must be passed on to the wallet.
    pub async fn build(self) -> Result<VerificationRequest> {
        let query = self.validate()?;

        if self.accepted_issuer_dids.is_empty() && self.trust_anchors.is_empty() {
            info!("verification request accepts credentials of any issuer");
        }

        let ttl = chrono::Duration::from_std(self.ttl).context("request ttl is out of range")?;
        let created_at = Utc::now();
        let request = VerificationRequest {
            id: Uuid::new_v4(),
            nonce: generate_nonce(),
            query,
            accepted_issuer_dids: self.accepted_issuer_dids,
            trust_anchors: self.trust_anchors,
            created_at,
            expires_at: created_at + ttl,
            outcome: None,
        };

        self.verifier
            .session_store
            .save(request.clone())
            .await
            .context("failed to store the verification request")?;

        info!(id = %request.id, expires_at = %request.expires_at, "verification request created");
        Ok(request)
    }

    fn validate(&self) -> Result<CredentialQuery, RequestValidationError> {
        let mut errors = Vec::new();
        let mut field = |field: &str, message: &str| {
            errors.push(FieldError {
                field: field.to_owned(),
                message: message.to_owned(),
            })
        };

        if self.ttl.is_zero() {
            field("ttl", "must be positive");
        }
        for (i, did) in self.accepted_issuer_dids.iter().enumerate() {
            if did.trim().is_empty() {
                field(&format!("accepted_issuer_dids[{i}]"), "must not be blank");
            }
        }
        for (i, anchor) in self.trust_anchors.iter().enumerate() {
            if anchor.did.trim().is_empty() {
                field(&format!("trust_anchors[{i}].did"), "must not be blank");
            }
        }

        let query = match (&self.presentation_definition, &self.dcql_query) {
            (Some(definition), None) => {
                errors.extend(definition.validate());
                Some(CredentialQuery::PresentationDefinition(definition.clone()))
            }
            (None, Some(dcql_query)) => {
                errors.extend(dcql_query.validate());
                Some(CredentialQuery::DcqlQuery(dcql_query.clone()))
            }
            (Some(_), Some(_)) => {
                errors.push(FieldError {
                    field: "dcql_query".into(),
                    message: "cannot be combined with a presentation definition".into(),
                });
                None
            }
            (None, None) => {
                errors.push(FieldError {
                    field: "presentation_definition".into(),
                    message: "a presentation definition or a DCQL query is required".into(),
                });
                None
            }
        };

        match query {
            Some(query) if errors.is_empty() => Ok(query),
            _ => Err(RequestValidationError { errors }),
        }
    }
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}
