//! Issuer authorization against an allow-list and trust anchors.
//!
//! A trust anchor publishes trust statements in a registry. A trust statement
//! is itself an SD-JWT, issued by the anchor, stating that its subject can
//! issue credentials of a given type:
//!
//! ```json
//! { "iss": "<anchor did>", "sub": "<issuer did>", "canIssue": "<vct>" }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;
use url::Url;

use super::{resolver::TrustStatementFetcher, sd_jwt::SdJwtVerifier};
use crate::core::error::{ErrorCode, VerificationError};

/// An entity whose trust statements authorize issuers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustAnchor {
    pub did: String,
    /// Where the anchor's trust statements are published. Anchors without a
    /// registry cannot authorize anyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_registry_uri: Option<Url>,
}

impl TrustAnchor {
    pub fn new(did: impl Into<String>, trust_registry_uri: Option<Url>) -> Self {
        Self {
            did: did.into(),
            trust_registry_uri,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrustResolver {
    fetcher: Arc<dyn TrustStatementFetcher>,
}

impl TrustResolver {
    pub fn new(fetcher: Arc<dyn TrustStatementFetcher>) -> Self {
        Self { fetcher }
    }

    /// Decide whether `issuer` may issue credentials of type `vct`.
    ///
    /// With no accepted issuers and no anchors every issuer is accepted. An
    /// issuer on the allow-list is accepted without consulting any anchor.
    /// Otherwise the anchors are consulted in order and the first verified
    /// trust statement for the issuer and type wins.
    pub async fn authorize(
        &self,
        verifier: &SdJwtVerifier,
        issuer: &str,
        vct: &str,
        accepted_issuers: &[String],
        trust_anchors: &[TrustAnchor],
        now: i64,
    ) -> Result<(), VerificationError> {
        if accepted_issuers.is_empty() && trust_anchors.is_empty() {
            debug!(issuer, "no issuer restrictions");
            return Ok(());
        }

        if accepted_issuers.iter().any(|accepted| accepted == issuer) {
            return Ok(());
        }

        let params = verifier.trust_statement_params(now);
        for anchor in trust_anchors {
            let Some(registry) = &anchor.trust_registry_uri else {
                debug!(anchor = %anchor.did, "trust anchor has no registry");
                continue;
            };

            let statements = match self.fetcher.fetch(registry, vct).await {
                Ok(statements) => statements,
                Err(e) => {
                    debug!(anchor = %anchor.did, "failed to fetch trust statements: {e:#}");
                    continue;
                }
            };

            for statement in &statements {
                let verified = match verifier.verify(statement, &params).await {
                    Ok(verified) => verified,
                    Err(e) => {
                        debug!(anchor = %anchor.did, "discarding trust statement: {e}");
                        continue;
                    }
                };

                let claim = |name: &str| verified.claims.get(name).and_then(Json::as_str);
                if verified.issuer == anchor.did
                    && claim("sub") == Some(issuer)
                    && claim("canIssue") == Some(vct)
                {
                    debug!(issuer, anchor = %anchor.did, vct, "issuer authorized by trust anchor");
                    return Ok(());
                }
            }
        }

        Err(VerificationError::new(
            ErrorCode::IssuerNotAccepted,
            format!("issuer '{issuer}' is not accepted for '{vct}'"),
        ))
    }
}
