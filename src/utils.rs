use std::ops::Deref;

use anyhow::{bail, Context, Error};
use base64::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "Vec<T>", into = "Vec<T>")]
pub struct NonEmptyVec<T: Clone>(Vec<T>);

impl<T: Clone> NonEmptyVec<T> {
    pub fn new(t: T) -> Self {
        Self(vec![t])
    }

    pub fn maybe_new(v: Vec<T>) -> Option<Self> {
        Self::try_from(v).ok()
    }

    pub fn push(&mut self, t: T) {
        self.0.push(t)
    }
}

impl<T: Clone> TryFrom<Vec<T>> for NonEmptyVec<T> {
    type Error = Error;

    fn try_from(v: Vec<T>) -> Result<NonEmptyVec<T>, Error> {
        if v.is_empty() {
            bail!("cannot create a NonEmptyVec from an empty Vec")
        }
        Ok(NonEmptyVec(v))
    }
}

impl<T: Clone> From<NonEmptyVec<T>> for Vec<T> {
    fn from(NonEmptyVec(v): NonEmptyVec<T>) -> Vec<T> {
        v
    }
}

impl<T: Clone> AsRef<[T]> for NonEmptyVec<T> {
    fn as_ref(&self) -> &[T] {
        &self.0
    }
}

impl<T: Clone> Deref for NonEmptyVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

/// Base64url (no padding) encoded SHA-256 digest of `input`.
///
/// This is the digest used for disclosures and for the key-binding `sd_hash`.
pub fn sha256_base64url(input: &[u8]) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(input))
}

/// Decode a base64url JSON segment, e.g. a JWT header or payload.
pub fn decode_json_segment<T: DeserializeOwned>(segment: &str) -> anyhow::Result<T> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(segment)
        .context("segment was not valid base64url")?;
    serde_json::from_slice(&bytes).context("segment was not valid json")
}
