//! Verification of SD-JWT presentations.
//!
//! See: <https://datatracker.ietf.org/doc/draft-ietf-oauth-selective-disclosure-jwt/>

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    pin::Pin,
    sync::Arc,
};

use serde_json::{Map, Value as Json};
use ssi::JWK;
use tracing::debug;

use super::{
    resolver::PublicKeyResolver,
    status::StatusListResolver,
    trust::{TrustAnchor, TrustResolver},
};
use crate::{
    config::VerifierConfig,
    core::{
        error::{ErrorCode, VerificationError},
        sd_jwt::*,
    },
};

/// `typ` header of a key-binding JWT.
pub const KB_JWT_TYPE: &str = "kb+jwt";

pub type VerifyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<VerifiedSdJwt, VerificationError>> + Send + 'a>>;

/// How the issuer of a credential must be authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Used for trust statements themselves.
    Skip,
    /// With both lists empty every issuer is accepted.
    Enforce {
        accepted_issuers: Vec<String>,
        trust_anchors: Vec<TrustAnchor>,
    },
}

/// Per-call verification inputs.
#[derive(Debug, Clone)]
pub struct VerificationParams {
    /// Accepted `alg` values of the issuer-signed JWT.
    pub sd_jwt_algorithms: Vec<String>,
    /// Accepted `alg` values of the key-binding JWT.
    pub kb_jwt_algorithms: Vec<String>,
    /// Nonce the key-binding JWT must carry.
    pub nonce: Option<String>,
    /// Audience the key-binding JWT must be addressed to.
    pub audience: String,
    pub trust: TrustPolicy,
    /// Reject presentations without a key-binding JWT.
    pub require_key_binding: bool,
    /// Current time, in seconds since the epoch.
    pub now: i64,
}

/// A successfully verified SD-JWT.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedSdJwt {
    pub issuer: String,
    pub vct: String,
    /// The payload with every disclosure expanded in place.
    pub claims: Map<String, Json>,
    pub disclosures: Vec<Disclosure>,
    pub key_bound: bool,
}

#[derive(Debug, Clone)]
pub struct SdJwtVerifier {
    config: VerifierConfig,
    keys: Arc<dyn PublicKeyResolver>,
    trust: TrustResolver,
    status: StatusListResolver,
}

impl SdJwtVerifier {
    pub fn new(
        config: VerifierConfig,
        keys: Arc<dyn PublicKeyResolver>,
        trust: TrustResolver,
        status: StatusListResolver,
    ) -> Self {
        Self {
            config,
            keys,
            trust,
            status,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify a compact SD-JWT presentation.
    ///
    /// Checks run in a fixed order and the first failure is returned: structure,
    /// header, issuer trust, signature, validity period, key binding, disclosure
    /// integrity, and finally the credential status on the expanded claims.
    pub fn verify<'a>(&'a self, raw: &'a str, params: &'a VerificationParams) -> VerifyFuture<'a> {
        Box::pin(async move {
            let sd_jwt = SdJwt::parse(raw)?;

            let jwt = UnverifiedJwt::decode(sd_jwt.issuer_signed())
                .map_err(|e| VerificationError::malformed(format!("invalid sd-jwt: {e:#}")))?;
            let kid = self.check_header(&jwt, params)?;

            let issuer = jwt
                .claim_str("iss")
                .ok_or_else(|| VerificationError::malformed("sd-jwt has no iss claim"))?;
            let vct = jwt
                .claim_str("vct")
                .ok_or_else(|| VerificationError::malformed("sd-jwt has no vct claim"))?;

            if let TrustPolicy::Enforce {
                accepted_issuers,
                trust_anchors,
            } = &params.trust
            {
                self.trust
                    .authorize(self, issuer, vct, accepted_issuers, trust_anchors, params.now)
                    .await?;
            }

            let jwk = self.keys.resolve(issuer, kid).await.map_err(|e| {
                VerificationError::new(
                    ErrorCode::PublicKeyOfIssuerUnresolvable,
                    format!("key '{kid}' of '{issuer}' could not be resolved: {e:#}"),
                )
            })?;
            let _: Json = ssi::claims::jwt::decode_verify(sd_jwt.issuer_signed(), &jwk)
                .map_err(|e| VerificationError::malformed(format!("invalid signature: {e}")))?;

            check_validity_period(&jwt, params.now)?;

            let key_bound = self.check_key_binding(&sd_jwt, &jwt, params)?;

            let disclosures = check_disclosures(&sd_jwt, &jwt.claims)?;
            let claims = expand_claims(&jwt.claims, &disclosures)?;

            self.status.check(issuer, &claims, params.now).await?;

            debug!(issuer, vct, disclosures = disclosures.len(), "sd-jwt verified");
            Ok(VerifiedSdJwt {
                issuer: issuer.to_owned(),
                vct: vct.to_owned(),
                claims,
                disclosures,
                key_bound,
            })
        })
    }

    /// Parameters trust statements are verified with.
    pub fn trust_statement_params(&self, now: i64) -> VerificationParams {
        VerificationParams {
            sd_jwt_algorithms: self.config.default_sd_jwt_algorithms.clone(),
            kb_jwt_algorithms: self.config.default_kb_jwt_algorithms.clone(),
            nonce: None,
            audience: self.config.client_id.clone(),
            trust: TrustPolicy::Skip,
            require_key_binding: false,
            now,
        }
    }

    fn check_header<'j>(
        &self,
        jwt: &'j UnverifiedJwt,
        params: &VerificationParams,
    ) -> Result<&'j str, VerificationError> {
        match jwt.header_str("alg") {
            Some(alg) if params.sd_jwt_algorithms.iter().any(|a| a == alg) => {}
            alg => {
                return Err(VerificationError::new(
                    ErrorCode::InvalidFormat,
                    format!("sd-jwt algorithm {alg:?} is not accepted"),
                ))
            }
        }

        match jwt.header_str("typ") {
            Some(typ) if self.config.accepted_sd_jwt_types.iter().any(|t| t == typ) => {}
            typ => {
                return Err(VerificationError::new(
                    ErrorCode::InvalidFormat,
                    format!("sd-jwt type {typ:?} is not accepted"),
                ))
            }
        }

        jwt.header_str("kid")
            .filter(|kid| !kid.trim().is_empty())
            .ok_or_else(|| VerificationError::malformed("sd-jwt header has no kid"))
    }

    /// Returns whether the presentation is key bound.
    fn check_key_binding(
        &self,
        sd_jwt: &SdJwt,
        jwt: &UnverifiedJwt,
        params: &VerificationParams,
    ) -> Result<bool, VerificationError> {
        let cnf = jwt.claims.get("cnf");

        let Some(kb) = sd_jwt.key_binding() else {
            if cnf.is_some() {
                return Err(VerificationError::binding(
                    "credential has a confirmation key but no key-binding proof was presented",
                ));
            }
            if params.require_key_binding {
                return Err(VerificationError::binding("a key-binding proof is required"));
            }
            return Ok(false);
        };

        let holder_key = cnf
            .and_then(|cnf| cnf.get("jwk"))
            .ok_or_else(|| VerificationError::binding("credential has no cnf.jwk"))?;
        let holder_key: JWK = serde_json::from_value(holder_key.clone())
            .map_err(|e| VerificationError::binding(format!("cnf.jwk is not a valid key: {e}")))?;

        let kb_jwt = UnverifiedJwt::decode(kb)
            .map_err(|e| VerificationError::binding(format!("invalid key-binding jwt: {e:#}")))?;

        if kb_jwt.header_str("typ") != Some(KB_JWT_TYPE) {
            return Err(VerificationError::binding(format!(
                "key-binding jwt must have typ '{KB_JWT_TYPE}'"
            )));
        }
        match kb_jwt.header_str("alg") {
            Some(alg) if params.kb_jwt_algorithms.iter().any(|a| a == alg) => {}
            alg => {
                return Err(VerificationError::binding(format!(
                    "key-binding algorithm {alg:?} is not accepted"
                )))
            }
        }
        let _: Json = ssi::claims::jwt::decode_verify(kb, &holder_key).map_err(|e| {
            VerificationError::binding(format!("invalid key-binding signature: {e}"))
        })?;

        match (kb_jwt.claim_str("nonce"), params.nonce.as_deref()) {
            (Some(nonce), Some(expected)) if nonce == expected => {}
            _ => {
                return Err(VerificationError::new(
                    ErrorCode::MissingNonce,
                    "key-binding nonce does not match the request",
                ))
            }
        }

        if kb_jwt.claim_str("sd_hash") != Some(sd_jwt.sd_hash().as_str()) {
            return Err(VerificationError::binding(
                "sd_hash does not match the presentation",
            ));
        }

        let audiences: Vec<Option<&str>> = match kb_jwt.claims.get("aud") {
            Some(Json::String(aud)) => vec![Some(aud)],
            Some(Json::Array(auds)) => auds.iter().map(Json::as_str).collect(),
            _ => Vec::new(),
        };
        match audiences.as_slice() {
            [Some(aud)] if !aud.trim().is_empty() && *aud == params.audience => {}
            _ => {
                return Err(VerificationError::binding(format!(
                    "key-binding audience must be exactly '{}'",
                    params.audience
                )))
            }
        }

        let window = self.config.key_binding_proof_time_window.as_secs();
        match kb_jwt.claim_timestamp("iat") {
            Some(iat) if params.now.abs_diff(iat) <= window => {}
            iat => {
                return Err(VerificationError::binding(format!(
                    "key-binding iat {iat:?} is outside of the accepted window"
                )))
            }
        }

        Ok(true)
    }
}

fn check_validity_period(jwt: &UnverifiedJwt, now: i64) -> Result<(), VerificationError> {
    if let Some(exp) = jwt.claim_timestamp("exp") {
        if exp < now {
            return Err(VerificationError::new(
                ErrorCode::JwtExpired,
                format!("sd-jwt expired at {exp}"),
            ));
        }
    }
    if let Some(nbf) = jwt.claim_timestamp("nbf") {
        if nbf > now {
            return Err(VerificationError::new(
                ErrorCode::JwtPremature,
                format!("sd-jwt is not valid before {nbf}"),
            ));
        }
    }
    Ok(())
}

/// Parse the disclosures and check that each is referenced exactly once.
fn check_disclosures(
    sd_jwt: &SdJwt,
    claims: &Map<String, Json>,
) -> Result<Vec<Disclosure>, VerificationError> {
    match claims.get(SD_ALG) {
        None => {}
        Some(Json::String(alg)) if alg == SHA_256 => {}
        Some(alg) => {
            return Err(VerificationError::malformed(format!(
                "unsupported disclosure digest algorithm {alg}"
            )))
        }
    }

    let mut disclosures: Vec<Disclosure> = Vec::with_capacity(sd_jwt.disclosures().len());
    let mut digests = HashSet::new();
    for encoded in sd_jwt.disclosures() {
        let disclosure = Disclosure::parse(encoded)?;

        if let Some(name) = disclosure.name() {
            if RESERVED_CLAIM_NAMES.contains(&name) {
                return Err(VerificationError::malformed(format!(
                    "disclosure uses the reserved claim name '{name}'"
                )));
            }
            if PROTECTED_CLAIM_NAMES.contains(&name) {
                return Err(VerificationError::malformed(format!(
                    "claim '{name}' must not be selectively disclosed"
                )));
            }
        }

        if !digests.insert(disclosure.digest.clone())
            || disclosures
                .iter()
                .any(|d| d.salt == disclosure.salt && d.kind == disclosure.kind)
        {
            return Err(VerificationError::malformed("duplicate disclosure"));
        }

        disclosures.push(disclosure);
    }

    let mut references = HashMap::new();
    for value in claims.values() {
        count_digests(value, &mut references);
    }
    if let Some(Json::Array(sd)) = claims.get(SD_DIGESTS) {
        for digest in sd.iter().filter_map(Json::as_str) {
            *references.entry(digest).or_default() += 1;
        }
    }
    for disclosure in &disclosures {
        count_digests(disclosure.value(), &mut references);
    }

    for disclosure in &disclosures {
        match references.get(disclosure.digest.as_str()) {
            Some(1) => {}
            Some(_) => {
                return Err(VerificationError::malformed(format!(
                    "disclosure {} is referenced more than once",
                    disclosure.digest
                )))
            }
            None => {
                return Err(VerificationError::malformed(format!(
                    "disclosure {} is not referenced by the sd-jwt",
                    disclosure.digest
                )))
            }
        }
    }

    Ok(disclosures)
}

fn count_digests<'a>(value: &'a Json, references: &mut HashMap<&'a str, usize>) {
    match value {
        Json::Object(map) => {
            if let Some(Json::Array(sd)) = map.get(SD_DIGESTS) {
                for digest in sd.iter().filter_map(Json::as_str) {
                    *references.entry(digest).or_default() += 1;
                }
            }
            if let Some(digest) = array_digest(value) {
                *references.entry(digest).or_default() += 1;
            }
            for (name, value) in map {
                if name != SD_DIGESTS {
                    count_digests(value, references);
                }
            }
        }
        Json::Array(items) => {
            for item in items {
                count_digests(item, references);
            }
        }
        _ => {}
    }
}

/// The digest of a `{"...": "<digest>"}` array element placeholder.
fn array_digest(value: &Json) -> Option<&str> {
    match value {
        Json::Object(map) if map.len() == 1 => map.get(ARRAY_DIGEST).and_then(Json::as_str),
        _ => None,
    }
}

/// Replace every digest reference with the disclosed value.
///
/// Undisclosed properties and array elements are dropped, so are the `_sd`
/// and `_sd_alg` claims.
fn expand_claims(
    claims: &Map<String, Json>,
    disclosures: &[Disclosure],
) -> Result<Map<String, Json>, VerificationError> {
    let by_digest: HashMap<&str, &Disclosure> = disclosures
        .iter()
        .map(|d| (d.digest.as_str(), d))
        .collect();

    let mut expanded = expand_object(claims, &by_digest)?;
    expanded.remove(SD_ALG);
    Ok(expanded)
}

fn expand_object(
    map: &Map<String, Json>,
    disclosures: &HashMap<&str, &Disclosure>,
) -> Result<Map<String, Json>, VerificationError> {
    let mut expanded = Map::new();
    for (name, value) in map {
        if name != SD_DIGESTS {
            expanded.insert(name.clone(), expand(value, disclosures)?);
        }
    }

    let Some(digests) = map.get(SD_DIGESTS) else {
        return Ok(expanded);
    };
    let Json::Array(digests) = digests else {
        return Err(VerificationError::malformed("_sd must be an array"));
    };

    for digest in digests {
        let digest = digest
            .as_str()
            .ok_or_else(|| VerificationError::malformed("_sd must only contain digests"))?;
        let Some(disclosure) = disclosures.get(digest) else {
            continue;
        };
        let DisclosureKind::Property { name, value } = &disclosure.kind else {
            return Err(VerificationError::malformed(
                "array element disclosure is referenced as a property",
            ));
        };
        if expanded.contains_key(name) {
            return Err(VerificationError::malformed(format!(
                "disclosure of '{name}' would overwrite an existing claim"
            )));
        }
        expanded.insert(name.clone(), expand(value, disclosures)?);
    }

    Ok(expanded)
}

fn expand(value: &Json, disclosures: &HashMap<&str, &Disclosure>) -> Result<Json, VerificationError> {
    match value {
        Json::Object(map) => expand_object(map, disclosures).map(Json::Object),
        Json::Array(items) => {
            let mut expanded = Vec::with_capacity(items.len());
            for item in items {
                let Some(digest) = array_digest(item) else {
                    expanded.push(expand(item, disclosures)?);
                    continue;
                };
                match disclosures.get(digest).map(|d| &d.kind) {
                    Some(DisclosureKind::ArrayElement(value)) => {
                        expanded.push(expand(value, disclosures)?)
                    }
                    Some(DisclosureKind::Property { .. }) => {
                        return Err(VerificationError::malformed(
                            "property disclosure is referenced as an array element",
                        ))
                    }
                    None => {}
                }
            }
            Ok(Json::Array(expanded))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use base64::prelude::*;
    use serde_json::json;

    use crate::utils::sha256_base64url;

    fn disclosure(value: Json) -> (String, String) {
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(value.to_string());
        let digest = sha256_base64url(encoded.as_bytes());
        (encoded, digest)
    }

    fn sd_jwt(disclosures: &[&str]) -> SdJwt {
        let mut raw = "a.b.c~".to_string();
        for d in disclosures {
            raw.push_str(d);
            raw.push('~');
        }
        SdJwt::parse(&raw).unwrap()
    }

    fn claims(value: Json) -> Map<String, Json> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn expands_nested_and_array_disclosures() {
        let (country, country_digest) = disclosure(json!(["s1", "country", "DE"]));
        let (address, address_digest) =
            disclosure(json!(["s2", "address", {"_sd": [country_digest]}]));
        let (nationality, nationality_digest) = disclosure(json!(["s3", "FR"]));

        let payload = claims(json!({
            "iss": "did:example:issuer",
            "_sd_alg": "sha-256",
            "_sd": [address_digest, "decoy"],
            "nationalities": ["DE", {"...": nationality_digest}, {"...": "undisclosed"}]
        }));
        let sd_jwt = sd_jwt(&[&country, &address, &nationality]);

        let disclosures = check_disclosures(&sd_jwt, &payload).unwrap();
        let expanded = expand_claims(&payload, &disclosures).unwrap();
        assert_eq!(
            Json::Object(expanded),
            json!({
                "iss": "did:example:issuer",
                "address": {"country": "DE"},
                "nationalities": ["DE", "FR"]
            })
        );
    }

    #[test]
    fn rejects_reserved_and_protected_names() {
        for name in ["_sd", "...", "iss", "exp", "nbf", "cnf", "vct", "status", "iat"] {
            let (encoded, digest) = disclosure(json!(["salt", name, "value"]));
            let payload = claims(json!({"_sd": [digest]}));
            let err = check_disclosures(&sd_jwt(&[&encoded]), &payload).unwrap_err();
            assert!(err.is(ErrorCode::MalformedCredential), "{name}");
        }
    }

    #[test]
    fn rejects_duplicate_disclosures() {
        let (encoded, digest) = disclosure(json!(["salt", "name", "value"]));
        let payload = claims(json!({"_sd": [digest]}));
        assert!(check_disclosures(&sd_jwt(&[&encoded, &encoded]), &payload).is_err());

        let respaced = BASE64_URL_SAFE_NO_PAD.encode(r#"["salt", "name",  "value"]"#);
        let payload = claims(json!({"_sd": [digest, sha256_base64url(respaced.as_bytes())]}));
        assert!(check_disclosures(&sd_jwt(&[&encoded, &respaced]), &payload).is_err());
    }

    #[test]
    fn rejects_unreferenced_or_repeated_digests() {
        let (encoded, digest) = disclosure(json!(["salt", "name", "value"]));

        let payload = claims(json!({"_sd": ["other"]}));
        assert!(check_disclosures(&sd_jwt(&[&encoded]), &payload).is_err());

        let payload = claims(json!({"_sd": [digest], "nested": {"_sd": [digest]}}));
        assert!(check_disclosures(&sd_jwt(&[&encoded]), &payload).is_err());
    }

    #[test]
    fn rejects_unsupported_digest_algorithm() {
        let payload = claims(json!({"_sd_alg": "sha-512", "_sd": []}));
        assert!(check_disclosures(&sd_jwt(&[]), &payload)
            .unwrap_err()
            .is(ErrorCode::MalformedCredential));
    }

    #[test]
    fn rejects_overwriting_claims() {
        let (encoded, digest) = disclosure(json!(["salt", "given_name", "Erika"]));
        let payload = claims(json!({"given_name": "Max", "_sd": [digest]}));
        let disclosures = check_disclosures(&sd_jwt(&[&encoded]), &payload).unwrap();
        assert!(expand_claims(&payload, &disclosures)
            .unwrap_err()
            .is(ErrorCode::MalformedCredential));
    }

    #[test]
    fn rejects_mismatched_disclosure_kinds() {
        let (encoded, digest) = disclosure(json!(["salt", "FR"]));
        let payload = claims(json!({"_sd": [digest]}));
        let disclosures = check_disclosures(&sd_jwt(&[&encoded]), &payload).unwrap();
        assert!(expand_claims(&payload, &disclosures).is_err());
    }

    #[test]
    fn checks_validity_period() {
        let jwt = UnverifiedJwt {
            header: Map::new(),
            claims: claims(json!({"nbf": 100, "exp": 200})),
        };
        check_validity_period(&jwt, 150).unwrap();
        assert!(check_validity_period(&jwt, 201)
            .unwrap_err()
            .is(ErrorCode::JwtExpired));
        assert!(check_validity_period(&jwt, 99)
            .unwrap_err()
            .is(ErrorCode::JwtPremature));
    }
}
