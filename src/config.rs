use std::time::Duration;

use serde::Deserialize;

use crate::core::credential_format::ClaimFormatDesignation;

/// Verifier-wide settings.
///
/// Every field has a default, so a partial document deserializes. Durations
/// are given in seconds.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierConfig {
    /// Expected audience of key-binding proofs.
    pub client_id: String,
    /// Accepted `typ` header values of issuer-signed SD-JWTs.
    pub accepted_sd_jwt_types: Vec<String>,
    /// Issuer algorithms used when the request does not restrict them.
    pub default_sd_jwt_algorithms: Vec<String>,
    /// Key-binding algorithms used when the request does not restrict them.
    pub default_kb_jwt_algorithms: Vec<String>,
    /// Accepted distance between a key-binding proof's `iat` and now.
    #[serde(with = "seconds")]
    pub key_binding_proof_time_window: Duration,
    /// Maximum size of a fetched status list token.
    pub status_list_max_size: usize,
    /// Maximum size of a decompressed status list.
    pub status_list_max_decompressed_size: usize,
    /// Lifetime of a verification request.
    #[serde(with = "seconds")]
    pub request_ttl: Duration,
    #[serde(with = "seconds")]
    pub issuer_key_cache_ttl: Duration,
    #[serde(with = "seconds")]
    pub trust_statement_cache_ttl: Duration,
    #[serde(with = "seconds")]
    pub status_list_cache_ttl: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            accepted_sd_jwt_types: vec![
                ClaimFormatDesignation::VcSdJwt.to_string(),
                ClaimFormatDesignation::DcSdJwt.to_string(),
            ],
            default_sd_jwt_algorithms: vec!["ES256".into()],
            default_kb_jwt_algorithms: vec!["ES256".into()],
            key_binding_proof_time_window: Duration::from_secs(120),
            status_list_max_size: 10 * 1024 * 1024,
            status_list_max_decompressed_size: 10 * 1024 * 1024,
            request_ttl: Duration::from_secs(900),
            issuer_key_cache_ttl: Duration::from_secs(3600),
            trust_statement_cache_ttl: Duration::from_secs(3600),
            status_list_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl VerifierConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn partial_config_uses_defaults() {
        let config: VerifierConfig = serde_json::from_value(json!({
            "client_id": "https://verifier.example.com",
            "key_binding_proof_time_window": 30
        }))
        .unwrap();

        assert_eq!(config.client_id, "https://verifier.example.com");
        assert_eq!(config.key_binding_proof_time_window, Duration::from_secs(30));
        assert_eq!(config.accepted_sd_jwt_types, ["vc+sd-jwt", "dc+sd-jwt"]);
        assert_eq!(config.status_list_max_size, 10 * 1024 * 1024);
        assert_eq!(config.request_ttl, Duration::from_secs(900));
    }
}
