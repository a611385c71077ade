use std::{collections::HashSet, sync::Arc};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};
use tracing::{info, warn};
use uuid::Uuid;

use cache::{CachingKeyResolver, CachingStatusListFetcher, CachingTrustStatementFetcher};
use request_builder::RequestBuilder;
use resolver::{
    HttpStatusListFetcher, HttpTrustStatementFetcher, PublicKeyResolver, StatusListFetcher,
    TrustStatementFetcher,
};
use sd_jwt::{SdJwtVerifier, TrustPolicy, VerificationParams};
use session::{CredentialQuery, Outcome, SessionStore, Status, Transition, VerificationRequest};
use status::StatusListResolver;
use trust::TrustResolver;

use crate::{
    config::VerifierConfig,
    core::{
        dcql_query::DcqlQuery,
        error::{ErrorCode, VerificationError},
        presentation_definition::PresentationDefinition,
        response::{
            parameters::{ErrorParams, PresentationSubmission, VpToken},
            AuthorizationResponse,
        },
        util::AsyncHttpClient,
    },
};

pub mod cache;
pub mod request_builder;
pub mod resolver;
pub mod sd_jwt;
pub mod session;
pub mod status;
pub mod trust;

/// An OpenID4VP verifier for SD-JWT credentials.
///
/// Owns the lifecycle of verification requests: a request is created pending,
/// completed exactly once with the outcome of the wallet's response, and is
/// closed once completed or expired.
#[derive(Debug, Clone)]
pub struct Verifier {
    config: VerifierConfig,
    session_store: Arc<dyn SessionStore>,
    sd_jwt: SdJwtVerifier,
    caches: Caches,
}

#[derive(Debug, Clone)]
struct Caches {
    keys: Arc<CachingKeyResolver>,
    trust_statements: Arc<CachingTrustStatementFetcher>,
    status_lists: Arc<CachingStatusListFetcher>,
}

impl Verifier {
    /// Build a new verifier.
    pub fn builder() -> VerifierBuilder {
        VerifierBuilder::default()
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// The SD-JWT verifier used for presentations, e.g. to verify credentials
    /// outside of a verification request.
    pub fn sd_jwt_verifier(&self) -> &SdJwtVerifier {
        &self.sd_jwt
    }

    /// Begin building a new verification request.
    pub fn build_verification_request(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(self)
    }

    /// Retrieve the current status of a verification request.
    ///
    /// This should be triggered by a request from the application frontend.
    pub async fn poll_status(&self, id: Uuid) -> Result<Status, VerificationError> {
        let request = self.find_request(id).await?;
        Ok(request.status(Utc::now()))
    }

    /// Handle an authorization response sent by the wallet.
    ///
    /// A presentation is verified; an error response records the wallet's
    /// rejection. Errors of the verification are recorded on the request before
    /// they are returned.
    pub async fn process_response(
        &self,
        id: Uuid,
        response: AuthorizationResponse,
    ) -> Result<Outcome, VerificationError> {
        match response {
            AuthorizationResponse::Presentation {
                vp_token,
                presentation_submission,
                ..
            } => self
                .verify_presentation(id, &vp_token, presentation_submission.as_ref())
                .await
                .map(|credentials| Outcome::Success { credentials }),
            AuthorizationResponse::Error { params, .. } => self.reject(id, &params).await,
        }
    }

    /// Verify the presentation of a pending request and record the outcome.
    ///
    /// ## Returns
    /// The decoded claims: the expanded claims of the credential with a
    /// presentation definition, or an object mapping each DCQL credential query
    /// id to the expanded claims of its presentations.
    pub async fn verify_presentation(
        &self,
        id: Uuid,
        vp_token: &VpToken,
        presentation_submission: Option<&PresentationSubmission>,
    ) -> Result<Json, VerificationError> {
        let now = Utc::now();
        let request = self.open_request(id, now).await?;

        let result = match &request.query {
            CredentialQuery::PresentationDefinition(definition) => {
                self.verify_definition(&request, definition, vp_token, presentation_submission, now)
                    .await
            }
            CredentialQuery::DcqlQuery(query) => {
                self.verify_dcql(&request, query, vp_token, now).await
            }
        };

        match result {
            Ok(credentials) => {
                self.record(
                    id,
                    Outcome::Success {
                        credentials: credentials.clone(),
                    },
                )
                .await?;
                Ok(credentials)
            }
            Err(error) => {
                self.record(
                    id,
                    Outcome::Failure {
                        error: error.clone(),
                    },
                )
                .await?;
                Err(error)
            }
        }
    }

    /// Record the wallet's refusal to present credentials.
    pub async fn reject(&self, id: Uuid, params: &ErrorParams) -> Result<Outcome, VerificationError> {
        self.open_request(id, Utc::now()).await?;

        let description = params
            .error_description
            .as_deref()
            .map_or_else(|| params.error.clone(), |d| format!("{}: {d}", params.error));
        let outcome = Outcome::Failure {
            error: VerificationError::new(ErrorCode::ClientRejected, description),
        };
        self.record(id, outcome.clone()).await?;
        Ok(outcome)
    }

    /// Delete every request that expired before `now` and evict expired cache
    /// entries.
    ///
    /// This should be triggered periodically by the application.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let deleted = self.session_store.delete_expired_before(now).await?;
        let evicted = self.caches.keys.evict_expired().await
            + self.caches.trust_statements.evict_expired().await
            + self.caches.status_lists.evict_expired().await;
        info!(deleted, evicted, "swept expired verification requests");
        Ok(deleted)
    }

    async fn find_request(&self, id: Uuid) -> Result<VerificationRequest, VerificationError> {
        self.session_store
            .find_by_id(id)
            .await
            .map_err(|e| VerificationError::server(format!("failed to load request: {e:#}")))?
            .ok_or_else(|| {
                VerificationError::new(
                    ErrorCode::AuthorizationRequestObjectNotFound,
                    format!("verification request {id} not found"),
                )
            })
    }

    async fn open_request(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<VerificationRequest, VerificationError> {
        let request = self.find_request(id).await?;
        if !request.is_open(now) {
            return Err(VerificationError::process_closed());
        }
        Ok(request)
    }

    async fn record(&self, id: Uuid, outcome: Outcome) -> Result<(), VerificationError> {
        let transition = self
            .session_store
            .complete(id, outcome, Utc::now())
            .await
            .map_err(|e| VerificationError::server(format!("failed to record outcome: {e:#}")))?;

        match transition {
            Transition::Applied => {
                info!(%id, "verification request completed");
                Ok(())
            }
            Transition::AlreadyClosed => {
                warn!(%id, "verification request was completed concurrently, discarding outcome");
                Err(VerificationError::process_closed())
            }
            Transition::Expired => {
                warn!(%id, "verification request expired during verification, discarding outcome");
                Err(VerificationError::process_closed())
            }
        }
    }

    async fn verify_definition(
        &self,
        request: &VerificationRequest,
        definition: &PresentationDefinition,
        vp_token: &VpToken,
        presentation_submission: Option<&PresentationSubmission>,
        now: DateTime<Utc>,
    ) -> Result<Json, VerificationError> {
        let Some(submission) = presentation_submission else {
            return Err(VerificationError::new(
                ErrorCode::InvalidPresentationSubmission,
                "presentation_submission is required",
            ));
        };
        let submission = submission.parse()?;
        let credential = submission.extract(definition, vp_token.as_json())?;

        let declares_formats = definition.format().is_some_and(|f| !f.is_empty())
            || definition
                .input_descriptors()
                .iter()
                .any(|d| !d.format().is_empty());

        let mut params = self.params(request, now);
        match definition.accepted_algorithms(credential.descriptor_id, credential.format) {
            Some(algorithms) => {
                params.sd_jwt_algorithms = algorithms.alg_values.clone();
                if !algorithms.kb_jwt_alg_values.is_empty() {
                    params.kb_jwt_algorithms = algorithms.kb_jwt_alg_values.clone();
                }
            }
            None if declares_formats => {
                return Err(VerificationError::new(
                    ErrorCode::UnsupportedFormat,
                    format!("format '{}' was not requested", credential.format),
                ))
            }
            None => {}
        }

        let verified = self.sd_jwt.verify(credential.token, &params).await?;
        let claims = Json::Object(verified.claims);
        definition.validate_claims(&claims)?;
        Ok(claims)
    }

    async fn verify_dcql(
        &self,
        request: &VerificationRequest,
        query: &DcqlQuery,
        vp_token: &VpToken,
        now: DateTime<Utc>,
    ) -> Result<Json, VerificationError> {
        let mut answered = HashSet::new();
        let mut credentials = Map::new();

        for (id, presentations) in vp_token.dcql_presentations()? {
            let Some(credential_query) = query.credential(id) else {
                return Err(VerificationError::new(
                    ErrorCode::InvalidPresentationSubmission,
                    format!("vp_token answers unknown credential query '{id}'"),
                ));
            };
            if !credential_query.format().is_sd_jwt() {
                return Err(VerificationError::new(
                    ErrorCode::UnsupportedFormat,
                    format!("format '{}' is not supported", credential_query.format()),
                ));
            }
            if presentations.len() > 1 && !credential_query.multiple() {
                return Err(VerificationError::new(
                    ErrorCode::InvalidPresentationSubmission,
                    format!("credential query '{id}' accepts a single presentation"),
                ));
            }

            let mut params = self.params(request, now);
            params.require_key_binding = credential_query.require_cryptographic_holder_binding();

            let mut verified = Vec::with_capacity(presentations.len());
            for presentation in presentations {
                let claims = Json::Object(self.sd_jwt.verify(presentation, &params).await?.claims);
                credential_query.validate_claims(&claims)?;
                verified.push(claims);
            }

            answered.insert(id);
            credentials.insert(id.to_owned(), Json::Array(verified));
        }

        query.check_answered(&answered)?;
        Ok(Json::Object(credentials))
    }

    fn params(&self, request: &VerificationRequest, now: DateTime<Utc>) -> VerificationParams {
        VerificationParams {
            sd_jwt_algorithms: self.config.default_sd_jwt_algorithms.clone(),
            kb_jwt_algorithms: self.config.default_kb_jwt_algorithms.clone(),
            nonce: Some(request.nonce.clone()),
            audience: self.config.client_id.clone(),
            trust: TrustPolicy::Enforce {
                accepted_issuers: request.accepted_issuer_dids.clone(),
                trust_anchors: request.trust_anchors.clone(),
            },
            require_key_binding: false,
            now: now.timestamp(),
        }
    }
}

/// Builder struct for [Verifier].
#[derive(Debug, Clone, Default)]
pub struct VerifierBuilder {
    config: Option<VerifierConfig>,
    session_store: Option<Arc<dyn SessionStore>>,
    key_resolver: Option<Arc<dyn PublicKeyResolver>>,
    trust_statement_fetcher: Option<Arc<dyn TrustStatementFetcher>>,
    status_list_fetcher: Option<Arc<dyn StatusListFetcher>>,
    http_client: Option<Arc<dyn AsyncHttpClient>>,
}

impl VerifierBuilder {
    /// Build the verifier.
    ///
    /// Every collaborator is wrapped in a cache whose lifetime is taken from
    /// the configuration.
    pub fn build(self) -> Result<Verifier> {
        let Self {
            config,
            session_store,
            key_resolver,
            trust_statement_fetcher,
            status_list_fetcher,
            http_client,
        } = self;

        let Some(config) = config else {
            bail!("config is required, see `with_config`")
        };

        if config.client_id.trim().is_empty() {
            bail!("config.client_id must not be blank")
        }

        let Some(session_store) = session_store else {
            bail!("session store is required, see `with_session_store`")
        };

        let Some(key_resolver) = key_resolver else {
            bail!("key resolver is required, see `with_key_resolver`")
        };

        let trust_statement_fetcher: Arc<dyn TrustStatementFetcher> =
            match (trust_statement_fetcher, &http_client) {
                (Some(fetcher), _) => fetcher,
                (None, Some(client)) => Arc::new(HttpTrustStatementFetcher::new(client.clone())),
                (None, None) => bail!(
                    "trust statement fetcher is required, see `with_trust_statement_fetcher` or `with_http_client`"
                ),
            };

        let status_list_fetcher: Arc<dyn StatusListFetcher> =
            match (status_list_fetcher, &http_client) {
                (Some(fetcher), _) => fetcher,
                (None, Some(client)) => Arc::new(HttpStatusListFetcher::new(
                    client.clone(),
                    config.status_list_max_size,
                )),
                (None, None) => bail!(
                    "status list fetcher is required, see `with_status_list_fetcher` or `with_http_client`"
                ),
            };

        let caches = Caches {
            keys: Arc::new(CachingKeyResolver::new(
                key_resolver,
                config.issuer_key_cache_ttl,
            )),
            trust_statements: Arc::new(CachingTrustStatementFetcher::new(
                trust_statement_fetcher,
                config.trust_statement_cache_ttl,
            )),
            status_lists: Arc::new(CachingStatusListFetcher::new(
                status_list_fetcher,
                config.status_list_cache_ttl,
            )),
        };

        let sd_jwt = SdJwtVerifier::new(
            config.clone(),
            caches.keys.clone(),
            TrustResolver::new(caches.trust_statements.clone()),
            StatusListResolver::new(
                caches.status_lists.clone(),
                caches.keys.clone(),
                config.status_list_max_decompressed_size,
            ),
        );

        Ok(Verifier {
            config,
            session_store,
            sd_jwt,
            caches,
        })
    }

    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the [SessionStore] that the [Verifier] will use to keep verification
    /// requests across transactions.
    pub fn with_session_store(mut self, session_store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(session_store);
        self
    }

    /// Set the resolver for the keys of credential, trust statement and status
    /// list issuers.
    pub fn with_key_resolver(mut self, key_resolver: Arc<dyn PublicKeyResolver>) -> Self {
        self.key_resolver = Some(key_resolver);
        self
    }

    pub fn with_trust_statement_fetcher(
        mut self,
        fetcher: Arc<dyn TrustStatementFetcher>,
    ) -> Self {
        self.trust_statement_fetcher = Some(fetcher);
        self
    }

    pub fn with_status_list_fetcher(mut self, fetcher: Arc<dyn StatusListFetcher>) -> Self {
        self.status_list_fetcher = Some(fetcher);
        self
    }

    /// Fetch trust statements and status lists over HTTP with this client,
    /// unless a dedicated fetcher is set.
    pub fn with_http_client(mut self, client: Arc<dyn AsyncHttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }
}
