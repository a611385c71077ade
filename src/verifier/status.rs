//! Token status list resolution.
//!
//! See: <https://datatracker.ietf.org/doc/draft-ietf-oauth-status-list/>

use std::{io::Read, sync::Arc};

use base64::prelude::*;
use flate2::read::ZlibDecoder;
use serde_json::{Map, Value as Json};
use tracing::debug;
use url::Url;

use super::resolver::{PublicKeyResolver, StatusListFetcher};
use crate::core::{
    error::{ErrorCode, VerificationError},
    sd_jwt::UnverifiedJwt,
};

/// `typ` header of a status list token.
pub const STATUS_LIST_JWT_TYPE: &str = "statuslist+jwt";

const STATUS: &str = "status";
const STATUS_LIST: &str = "status_list";

/// Status of a referenced credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Valid,
    Revoked,
    Suspended,
}

impl TryFrom<u8> for CredentialStatus {
    type Error = VerificationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Valid),
            1 => Ok(Self::Revoked),
            2 => Ok(Self::Suspended),
            other => Err(unresolvable(format!("unexpected status value {other}"))),
        }
    }
}

/// A decoded status list: `bits` per entry over the decompressed `lst` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatusListToken {
    bits: u8,
    buffer: Vec<u8>,
}

impl TokenStatusListToken {
    /// Decode the `lst` claim, a base64url encoded zlib stream.
    ///
    /// Decompression stops as soon as the output exceeds `max_size`.
    pub fn new(bits: u8, lst: &str, max_size: usize) -> Result<Self, VerificationError> {
        let compressed = BASE64_URL_SAFE_NO_PAD
            .decode(lst.trim_end_matches('='))
            .map_err(|_| invalid("lst is not valid base64url"))?;

        let mut buffer = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .take(max_size as u64 + 1)
            .read_to_end(&mut buffer)
            .map_err(|e| invalid(format!("lst could not be decompressed: {e}")))?;
        if buffer.len() > max_size {
            return Err(invalid(format!(
                "decompressed status list exceeds {max_size} bytes, possible compression bomb"
            )));
        }

        Self::from_bytes(bits, buffer)
    }

    pub fn from_bytes(bits: u8, buffer: Vec<u8>) -> Result<Self, VerificationError> {
        if !matches!(bits, 1 | 2 | 4 | 8) {
            return Err(invalid(format!("bits must be 1, 2, 4 or 8, found {bits}")));
        }
        Ok(Self { bits, buffer })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of entries in the list.
    pub fn len(&self) -> usize {
        self.buffer.len() * 8 / self.bits as usize
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The raw status value at `idx`.
    ///
    /// Entries are packed starting at the least significant bit of each byte.
    pub fn get_status(&self, idx: usize) -> Result<u8, VerificationError> {
        let bits = self.bits as usize;
        let offset = idx
            .checked_mul(bits)
            .filter(|offset| offset / 8 < self.buffer.len())
            .ok_or_else(|| unresolvable(format!("index {idx} is out of range")))?;

        let byte = self.buffer[offset / 8];
        let mask = ((1u16 << bits) - 1) as u8;
        Ok((byte >> (offset % 8)) & mask)
    }
}

/// Where the status of a credential is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusListReference {
    TokenStatusList { idx: usize, uri: Url },
    BitstringStatusList(Map<String, Json>),
}

impl StatusListReference {
    /// Find the status references of a credential.
    ///
    /// Unknown mechanisms in the `status` claim are ignored.
    pub fn from_claims(claims: &Map<String, Json>) -> Result<Vec<Self>, VerificationError> {
        let Some(status) = claims.get(STATUS) else {
            return Ok(Vec::new());
        };
        let Json::Object(status) = status else {
            return Err(invalid("status claim is not an object"));
        };

        let mut references = Vec::new();
        for (mechanism, reference) in status {
            match (mechanism.as_str(), reference) {
                (STATUS_LIST, Json::Object(reference)) => {
                    let idx = reference
                        .get("idx")
                        .and_then(Json::as_u64)
                        .and_then(|idx| usize::try_from(idx).ok())
                        .ok_or_else(|| invalid("status_list.idx is not an index"))?;
                    let uri = reference
                        .get("uri")
                        .and_then(Json::as_str)
                        .and_then(|uri| uri.parse().ok())
                        .ok_or_else(|| invalid("status_list.uri is not a url"))?;
                    references.push(Self::TokenStatusList { idx, uri });
                }
                (STATUS_LIST, _) => return Err(invalid("status_list is not an object")),
                (_, Json::Object(reference))
                    if reference.contains_key("statusListCredential") =>
                {
                    references.push(Self::BitstringStatusList(reference.clone()));
                }
                (other, _) => debug!(mechanism = other, "ignoring unknown status mechanism"),
            }
        }
        Ok(references)
    }
}

/// Resolves the status of credentials through their status list references.
#[derive(Debug, Clone)]
pub struct StatusListResolver {
    fetcher: Arc<dyn StatusListFetcher>,
    keys: Arc<dyn PublicKeyResolver>,
    max_decompressed_size: usize,
}

impl StatusListResolver {
    pub fn new(
        fetcher: Arc<dyn StatusListFetcher>,
        keys: Arc<dyn PublicKeyResolver>,
        max_decompressed_size: usize,
    ) -> Self {
        Self {
            fetcher,
            keys,
            max_decompressed_size,
        }
    }

    /// Check every status reference of a credential issued by `issuer`.
    ///
    /// The first reference that is not valid decides the error.
    pub async fn check(
        &self,
        issuer: &str,
        claims: &Map<String, Json>,
        now: i64,
    ) -> Result<(), VerificationError> {
        for reference in StatusListReference::from_claims(claims)? {
            match self.resolve_status(issuer, &reference, now).await? {
                CredentialStatus::Valid => {}
                CredentialStatus::Revoked => {
                    return Err(VerificationError::new(
                        ErrorCode::CredentialRevoked,
                        "credential has been revoked",
                    ))
                }
                CredentialStatus::Suspended => {
                    return Err(VerificationError::new(
                        ErrorCode::CredentialSuspended,
                        "credential is suspended",
                    ))
                }
            }
        }
        Ok(())
    }

    pub async fn resolve_status(
        &self,
        issuer: &str,
        reference: &StatusListReference,
        now: i64,
    ) -> Result<CredentialStatus, VerificationError> {
        match reference {
            StatusListReference::TokenStatusList { idx, uri } => {
                let list = self.load(issuer, uri, now).await?;
                CredentialStatus::try_from(list.get_status(*idx)?)
            }
            StatusListReference::BitstringStatusList(_) => {
                Err(unresolvable("bitstring status lists are not supported"))
            }
        }
    }

    async fn load(
        &self,
        issuer: &str,
        uri: &Url,
        now: i64,
    ) -> Result<TokenStatusListToken, VerificationError> {
        let raw = self
            .fetcher
            .fetch(uri)
            .await
            .map_err(|e| unresolvable(format!("status list {uri} could not be fetched: {e:#}")))?;
        let jwt = String::from_utf8(raw)
            .map_err(|_| invalid("status list token is not text"))?
            .trim()
            .to_owned();

        let token = UnverifiedJwt::decode(&jwt)
            .map_err(|e| invalid(format!("status list token is not a JWT: {e:#}")))?;
        if token.header_str("typ") != Some(STATUS_LIST_JWT_TYPE) {
            return Err(invalid(format!("status list token must have typ '{STATUS_LIST_JWT_TYPE}'")));
        }
        let kid = token
            .header_str("kid")
            .filter(|kid| !kid.trim().is_empty())
            .ok_or_else(|| invalid("status list token has no kid"))?;
        if token.claim_str("iss") != Some(issuer) {
            return Err(invalid("status list token was not issued by the credential issuer"));
        }
        if token.claim_timestamp("exp").is_some_and(|exp| exp <= now) {
            return Err(invalid("status list token has expired"));
        }

        let jwk = self
            .keys
            .resolve(issuer, kid)
            .await
            .map_err(|e| unresolvable(format!("status list key could not be resolved: {e:#}")))?;
        let _: Json = ssi::claims::jwt::decode_verify(&jwt, &jwk)
            .map_err(|e| invalid(format!("status list token signature is invalid: {e}")))?;

        let status_list = token
            .claims
            .get(STATUS_LIST)
            .and_then(Json::as_object)
            .ok_or_else(|| invalid("status list token has no status_list claim"))?;
        let bits = status_list
            .get("bits")
            .and_then(Json::as_u64)
            .and_then(|bits| u8::try_from(bits).ok())
            .ok_or_else(|| invalid("status_list.bits is missing"))?;
        let lst = status_list
            .get("lst")
            .and_then(Json::as_str)
            .ok_or_else(|| invalid("status_list.lst is missing"))?;

        TokenStatusListToken::new(bits, lst, self.max_decompressed_size)
    }
}

fn invalid(description: impl Into<String>) -> VerificationError {
    VerificationError::new(ErrorCode::InvalidTokenStatusList, description)
}

fn unresolvable(description: impl Into<String>) -> VerificationError {
    VerificationError::new(ErrorCode::UnresolvableStatusList, description)
}
