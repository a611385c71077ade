use core::fmt;
use std::{borrow::Cow, collections::HashMap, str::FromStr};

use serde::{Deserialize, Serialize};

const FORMAT_VC_SD_JWT: &str = "vc+sd-jwt";
const FORMAT_DC_SD_JWT: &str = "dc+sd-jwt";
const FORMAT_JWT_VC_JSON: &str = "jwt_vc_json";
const FORMAT_LDP_VC: &str = "ldp_vc";
const FORMAT_MSO_MDOC: &str = "mso_mdoc";

/// A Json object of claim formats, mapping each accepted format to the
/// algorithms the verifier accepts for it.
pub type ClaimFormatMap = HashMap<ClaimFormatDesignation, ClaimFormatPayload>;

/// The credential type (`vct`) that may be requested in a presentation request.
pub type CredentialType = String;

/// Algorithms accepted for an SD-JWT based claim format.
///
/// The issuer-signed JWT must use one of `alg_values` and the key-binding JWT
/// one of `kb_jwt_alg_values`. Older requests use `alg`/`kb_jwt_alg`, which are
/// accepted as aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimFormatPayload {
    #[serde(
        rename = "sd-jwt_alg_values",
        alias = "alg",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub alg_values: Vec<String>,
    #[serde(
        rename = "kb-jwt_alg_values",
        alias = "kb_jwt_alg",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub kb_jwt_alg_values: Vec<String>,
}

impl ClaimFormatPayload {
    pub fn new(alg_values: Vec<String>, kb_jwt_alg_values: Vec<String>) -> Self {
        Self {
            alg_values,
            kb_jwt_alg_values,
        }
    }
}

/// The claim format designation is used in presentation definitions, input
/// descriptors, descriptor maps and DCQL queries to specify the format of a
/// credential.
///
/// Only the SD-JWT based designations can be verified by this crate; others are
/// parsed so that they can be reported as unsupported.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClaimFormatDesignation {
    /// SD-JWT based verifiable credential, legacy media type.
    VcSdJwt,

    /// SD-JWT based digital credential (`dc+sd-jwt`).
    DcSdJwt,

    JwtVcJson,

    LdpVc,

    /// ISO/IEC 18013-5 mobile document.
    MsoMDoc,

    /// Other claim format designations not covered by the above.
    Other(String),
}

impl ClaimFormatDesignation {
    pub fn from_name(name: Cow<str>) -> Self {
        match name.as_ref() {
            FORMAT_VC_SD_JWT => Self::VcSdJwt,
            FORMAT_DC_SD_JWT => Self::DcSdJwt,
            FORMAT_JWT_VC_JSON => Self::JwtVcJson,
            FORMAT_LDP_VC => Self::LdpVc,
            FORMAT_MSO_MDOC => Self::MsoMDoc,
            _ => Self::Other(name.into_owned()),
        }
    }

    /// Returns `true` for the formats this crate is able to verify.
    pub fn is_sd_jwt(&self) -> bool {
        matches!(self, Self::VcSdJwt | Self::DcSdJwt)
    }

    fn name(&self) -> &str {
        match self {
            Self::VcSdJwt => FORMAT_VC_SD_JWT,
            Self::DcSdJwt => FORMAT_DC_SD_JWT,
            Self::JwtVcJson => FORMAT_JWT_VC_JSON,
            Self::LdpVc => FORMAT_LDP_VC,
            Self::MsoMDoc => FORMAT_MSO_MDOC,
            Self::Other(other) => other,
        }
    }
}

impl From<&str> for ClaimFormatDesignation {
    fn from(s: &str) -> Self {
        Self::from_name(Cow::Borrowed(s))
    }
}

impl From<String> for ClaimFormatDesignation {
    fn from(value: String) -> Self {
        Self::from_name(Cow::Owned(value))
    }
}

impl FromStr for ClaimFormatDesignation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

impl From<ClaimFormatDesignation> for String {
    fn from(format: ClaimFormatDesignation) -> Self {
        format.name().to_owned()
    }
}

impl fmt::Display for ClaimFormatDesignation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

impl Serialize for ClaimFormatDesignation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.name().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ClaimFormatDesignation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_credential_format_serialization() {
        let value = json!({
            "vc+sd-jwt": {
                "sd-jwt_alg_values": ["ES256", "ES384"],
                "kb-jwt_alg_values": ["ES256"]
            },
            "dc+sd-jwt": {
                "alg": ["ES256"]
            },
            "com.example.custom_vc": {}
        });

        let claim_format_map: ClaimFormatMap =
            serde_json::from_value(value).expect("Failed to parse claim format map");

        let vc = &claim_format_map[&ClaimFormatDesignation::VcSdJwt];
        assert_eq!(vc.alg_values, vec!["ES256", "ES384"]);
        assert_eq!(vc.kb_jwt_alg_values, vec!["ES256"]);

        let dc = &claim_format_map[&ClaimFormatDesignation::DcSdJwt];
        assert_eq!(dc.alg_values, vec!["ES256"]);
        assert!(dc.kb_jwt_alg_values.is_empty());

        assert!(claim_format_map.contains_key(&ClaimFormatDesignation::Other(
            "com.example.custom_vc".to_string()
        )));
    }

    #[test]
    fn only_sd_jwt_formats_are_verifiable() {
        assert!(ClaimFormatDesignation::from("vc+sd-jwt").is_sd_jwt());
        assert!(ClaimFormatDesignation::from("dc+sd-jwt").is_sd_jwt());
        assert!(!ClaimFormatDesignation::from("mso_mdoc").is_sd_jwt());
        assert_eq!(ClaimFormatDesignation::DcSdJwt.to_string(), "dc+sd-jwt");
    }
}
