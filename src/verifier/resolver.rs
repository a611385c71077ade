//! Collaborators the verifier relies on for outbound lookups.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use http::{header::ACCEPT, Method, Request, StatusCode};
use ssi::JWK;
use tracing::debug;
use url::Url;

use crate::core::util::AsyncHttpClient;

/// Loads the public key an issuer signs with.
#[async_trait]
pub trait PublicKeyResolver: Debug + Send + Sync {
    /// Resolve the key identified by `kid` for `issuer`, usually a DID.
    async fn resolve(&self, issuer: &str, kid: &str) -> Result<JWK>;
}

/// Fetches the trust statements a trust registry publishes for a credential type.
#[async_trait]
pub trait TrustStatementFetcher: Debug + Send + Sync {
    /// Compact SD-JWT trust statements for `vct`. No statements is not an error.
    async fn fetch(&self, registry: &Url, vct: &str) -> Result<Vec<String>>;
}

/// Fetches status list tokens.
#[async_trait]
pub trait StatusListFetcher: Debug + Send + Sync {
    /// The raw status list token published at `uri`.
    async fn fetch(&self, uri: &Url) -> Result<Vec<u8>>;
}

/// A key resolver backed by a fixed set of keys.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    keys: HashMap<String, HashMap<String, JWK>>,
}

impl StaticKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, issuer: impl Into<String>, kid: impl Into<String>, jwk: JWK) -> Self {
        self.keys
            .entry(issuer.into())
            .or_default()
            .insert(kid.into(), jwk);
        self
    }
}

#[async_trait]
impl PublicKeyResolver for StaticKeyResolver {
    async fn resolve(&self, issuer: &str, kid: &str) -> Result<JWK> {
        let Some(keys) = self.keys.get(issuer) else {
            bail!("no keys known for issuer '{issuer}'")
        };
        keys.get(kid)
            .cloned()
            .with_context(|| format!("issuer '{issuer}' has no key '{kid}'"))
    }
}

/// Fetches trust statements with `GET <registry>?vct=<vct>`.
///
/// The registry answers with a JSON array of compact SD-JWTs; `404 Not Found`
/// means it holds none for the type.
#[derive(Debug, Clone)]
pub struct HttpTrustStatementFetcher {
    client: Arc<dyn AsyncHttpClient>,
}

impl HttpTrustStatementFetcher {
    pub fn new(client: Arc<dyn AsyncHttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TrustStatementFetcher for HttpTrustStatementFetcher {
    async fn fetch(&self, registry: &Url, vct: &str) -> Result<Vec<String>> {
        let mut url = registry.clone();
        url.query_pairs_mut().append_pair("vct", vct);

        let request = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .header(ACCEPT, "application/json")
            .body(Vec::new())
            .context("failed to build trust statement request")?;

        let response = self
            .client
            .execute(request)
            .await
            .context("trust statement request failed")?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(%registry, vct, "no trust statements published");
                Ok(Vec::new())
            }
            status if status.is_success() => serde_json::from_slice(response.body())
                .context("trust registry response is not a list of statements"),
            status => bail!("trust registry responded with {status}"),
        }
    }
}

/// Fetches status list tokens with `GET <uri>`.
#[derive(Debug, Clone)]
pub struct HttpStatusListFetcher {
    client: Arc<dyn AsyncHttpClient>,
    max_size: usize,
}

impl HttpStatusListFetcher {
    /// `max_size` bounds the accepted token size in bytes.
    pub fn new(client: Arc<dyn AsyncHttpClient>, max_size: usize) -> Self {
        Self { client, max_size }
    }
}

#[async_trait]
impl StatusListFetcher for HttpStatusListFetcher {
    async fn fetch(&self, uri: &Url) -> Result<Vec<u8>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri.as_str())
            .header(ACCEPT, "application/statuslist+jwt")
            .body(Vec::new())
            .context("failed to build status list request")?;

        let response = self
            .client
            .execute_bounded(request, self.max_size)
            .await
            .context("status list request failed")?;

        if !response.status().is_success() {
            bail!("status list endpoint responded with {}", response.status())
        }
        Ok(response.into_body())
    }
}
