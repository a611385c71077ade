//! SD-JWT compact serialization.
//!
//! An SD-JWT presentation is `<issuer-signed JWT>~<disclosure>~...~<disclosure>~[<KB-JWT>]`.
//! This module only splits and decodes the parts; no trust decisions are made here.

use base64::prelude::*;
use serde_json::Value as Json;

use crate::{
    core::error::VerificationError,
    utils::{decode_json_segment, sha256_base64url},
};

pub const SD_JWT_SEPARATOR: char = '~';

/// Claim holding the digests of the selectively disclosable properties of an object.
pub const SD_DIGESTS: &str = "_sd";

/// Claim naming the hash algorithm used for disclosure digests.
pub const SD_ALG: &str = "_sd_alg";

/// Key used in `{"...": "<digest>"}` array element placeholders.
pub const ARRAY_DIGEST: &str = "...";

/// The only digest algorithm supported.
pub const SHA_256: &str = "sha-256";

/// Claim names that are never allowed as disclosure names.
pub const RESERVED_CLAIM_NAMES: [&str; 2] = [SD_DIGESTS, ARRAY_DIGEST];

/// Registered claims that must be part of the signed payload and can therefore
/// not be selectively disclosed.
pub const PROTECTED_CLAIM_NAMES: [&str; 7] = ["iss", "nbf", "exp", "cnf", "vct", "status", "iat"];

/// A raw SD-JWT split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdJwt {
    raw: String,
    issuer_signed: String,
    disclosures: Vec<String>,
    key_binding: Option<String>,
}

impl SdJwt {
    /// Split a compact SD-JWT.
    ///
    /// The token must contain at least one separator, every disclosure must be
    /// non-empty and the issuer-signed part must have the three JWS segments.
    pub fn parse(raw: &str) -> Result<Self, VerificationError> {
        let parts: Vec<&str> = raw.split(SD_JWT_SEPARATOR).collect();
        if parts.len() < 2 {
            return Err(VerificationError::malformed(
                "sd-jwt must contain at least one '~' separator",
            ));
        }

        let issuer_signed = parts[0];
        if !is_compact_jws(issuer_signed) {
            return Err(VerificationError::malformed(
                "issuer-signed part is not a compact JWS",
            ));
        }

        // Anything after the last separator is a key-binding JWT. A disclosure
        // there means the terminating `~` is missing.
        let last = parts[parts.len() - 1];
        if !last.is_empty() && !is_compact_jws(last) {
            return Err(VerificationError::malformed(
                "sd-jwt must end with '~' or a key-binding JWT",
            ));
        }
        let key_binding = (!last.is_empty()).then(|| last.to_owned());

        let disclosures = &parts[1..parts.len() - 1];
        if disclosures.iter().any(|d| d.is_empty()) {
            return Err(VerificationError::malformed("sd-jwt contains an empty disclosure"));
        }

        Ok(Self {
            raw: raw.to_owned(),
            issuer_signed: issuer_signed.to_owned(),
            disclosures: disclosures.iter().map(|d| d.to_string()).collect(),
            key_binding,
        })
    }

    pub fn issuer_signed(&self) -> &str {
        &self.issuer_signed
    }

    pub fn disclosures(&self) -> &[String] {
        &self.disclosures
    }

    pub fn key_binding(&self) -> Option<&str> {
        self.key_binding.as_deref()
    }

    /// Everything up to and including the `~` that terminates the disclosures.
    ///
    /// This is the input of the key-binding `sd_hash`.
    pub fn presentation_prefix(&self) -> &str {
        match &self.key_binding {
            Some(kb) => &self.raw[..self.raw.len() - kb.len()],
            None => &self.raw,
        }
    }

    /// `sd_hash` value expected in the key-binding JWT.
    pub fn sd_hash(&self) -> String {
        sha256_base64url(self.presentation_prefix().as_bytes())
    }
}

fn is_compact_jws(part: &str) -> bool {
    part.split('.').count() == 3 && part.split('.').all(|segment| !segment.is_empty())
}

/// The decoded contents of a disclosure.
#[derive(Debug, Clone, PartialEq)]
pub enum DisclosureKind {
    /// `[salt, name, value]`: a property of an object.
    Property { name: String, value: Json },
    /// `[salt, value]`: an element of an array.
    ArrayElement(Json),
}

/// A decoded disclosure together with its encoded form and digest.
#[derive(Debug, Clone, PartialEq)]
pub struct Disclosure {
    pub encoded: String,
    pub digest: String,
    pub salt: String,
    pub kind: DisclosureKind,
}

impl Disclosure {
    pub fn parse(encoded: &str) -> Result<Self, VerificationError> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| VerificationError::malformed("disclosure is not valid base64url"))?;
        let Json::Array(mut array) = serde_json::from_slice(&bytes)
            .map_err(|_| VerificationError::malformed("disclosure is not valid json"))?
        else {
            return Err(VerificationError::malformed("disclosure is not a json array"));
        };

        let kind = match array.len() {
            3 => {
                let value = array.pop().unwrap_or(Json::Null);
                let Some(Json::String(name)) = array.pop() else {
                    return Err(VerificationError::malformed("disclosure name is not a string"));
                };
                DisclosureKind::Property { name, value }
            }
            2 => DisclosureKind::ArrayElement(array.pop().unwrap_or(Json::Null)),
            n => {
                return Err(VerificationError::malformed(format!(
                    "disclosure must have 2 or 3 elements, found {n}"
                )))
            }
        };

        let Some(Json::String(salt)) = array.pop() else {
            return Err(VerificationError::malformed("disclosure salt is not a string"));
        };

        Ok(Self {
            encoded: encoded.to_owned(),
            digest: sha256_base64url(encoded.as_bytes()),
            salt,
            kind,
        })
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            DisclosureKind::Property { name, .. } => Some(name),
            DisclosureKind::ArrayElement(_) => None,
        }
    }

    pub fn value(&self) -> &Json {
        match &self.kind {
            DisclosureKind::Property { value, .. } => value,
            DisclosureKind::ArrayElement(value) => value,
        }
    }
}

/// Header and payload of a compact JWS, decoded without verifying the signature.
#[derive(Debug, Clone)]
pub struct UnverifiedJwt {
    pub header: serde_json::Map<String, Json>,
    pub claims: serde_json::Map<String, Json>,
}

impl UnverifiedJwt {
    pub fn decode(jwt: &str) -> anyhow::Result<Self> {
        let (header, payload, _signature) = ssi::claims::jws::split_jws(jwt)?;
        Ok(Self {
            header: decode_json_segment(header)?,
            claims: decode_json_segment(payload)?,
        })
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header.get(name).and_then(Json::as_str)
    }

    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Json::as_str)
    }

    /// A NumericDate claim, in seconds since the epoch.
    pub fn claim_timestamp(&self, name: &str) -> Option<i64> {
        self.claims.get(name).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().map(|f| f as i64))
        })
    }
}
