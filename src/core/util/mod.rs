use std::fmt::Debug;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use http::{Request, Response};

/// Generic HTTP client.
///
/// A trait is used here so that deployments can bring their own HTTP stack and
/// tests can serve canned responses.
#[async_trait]
pub trait AsyncHttpClient: Debug + Send + Sync {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>>;

    /// Execute a request whose response body must not exceed `max_body_size`
    /// bytes.
    ///
    /// The default implementation checks the body once it has been read.
    /// Clients that can stop reading early should override it.
    async fn execute_bounded(
        &self,
        request: Request<Vec<u8>>,
        max_body_size: usize,
    ) -> Result<Response<Vec<u8>>> {
        let response = self.execute(request).await?;
        if response.body().len() > max_body_size {
            bail!(
                "response body of {} bytes exceeds the limit of {max_body_size} bytes",
                response.body().len()
            )
        }
        Ok(response)
    }
}

/// Default cap on response bodies.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct ReqwestClient {
    client: reqwest::Client,
    max_body_size: usize,
}

impl AsRef<reqwest::Client> for ReqwestClient {
    fn as_ref(&self) -> &reqwest::Client {
        &self.client
    }
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        Self::with_max_body_size(DEFAULT_MAX_BODY_SIZE)
    }

    /// A client refusing response bodies larger than `max_body_size` bytes.
    ///
    /// The limit is checked against `Content-Length` before reading and again
    /// while the body is streamed.
    pub fn with_max_body_size(max_body_size: usize) -> Result<Self> {
        reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .context("unable to build http_client")
            .map(|client| Self {
                client,
                max_body_size,
            })
    }
}

#[async_trait]
impl AsyncHttpClient for ReqwestClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        self.execute_bounded(request, self.max_body_size).await
    }

    /// The body is read in chunks and abandoned as soon as it exceeds the
    /// smaller of `max_body_size` and the client's own limit.
    async fn execute_bounded(
        &self,
        request: Request<Vec<u8>>,
        max_body_size: usize,
    ) -> Result<Response<Vec<u8>>> {
        let max_body_size = max_body_size.min(self.max_body_size);
        let mut response = self
            .client
            .execute(request.try_into().context("unable to convert request")?)
            .await
            .context("http request failed")?;

        if let Some(length) = response.content_length() {
            if length > max_body_size as u64 {
                bail!(
                    "response body of {length} bytes exceeds the limit of {} bytes",
                    max_body_size
                )
            }
        }

        let mut builder = Response::builder()
            .status(response.status())
            .version(response.version());

        builder
            .headers_mut()
            .context("unable to set headers")?
            .extend(response.headers().clone());

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .context("failed to read response body")?
        {
            if body.len() + chunk.len() > max_body_size {
                bail!(
                    "response body exceeds the limit of {} bytes",
                    max_body_size
                )
            }
            body.extend_from_slice(&chunk);
        }

        builder.body(body).context("unable to construct response")
    }
}
