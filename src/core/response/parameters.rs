use crate::core::error::{ErrorCode, ErrorType, VerificationError};
use crate::core::presentation_submission::PresentationSubmission as PresentationSubmissionParsed;

use serde_json::{Map, Value as Json};

/// OpenID for Verifiable Presentations defines the `vp_token` parameter as a
/// JSON string, array or object holding the presented credentials.
///
/// With a presentation definition the layout is described by the accompanying
/// `presentation_submission`. With a DCQL query it is an object keyed by
/// credential query id, each value a presentation or an array of them.
///
/// See: [OpenID.VP#section-8.1](https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-8.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpToken(pub Json);

impl VpToken {
    pub const KEY: &'static str = "vp_token";

    /// Parse the parameter value.
    ///
    /// Form-encoded responses carry arrays and objects as JSON text; a string
    /// that does not parse as a JSON array or object is a single compact
    /// presentation.
    pub fn from_param(value: Json) -> Self {
        match value {
            Json::String(s) if s.starts_with('[') || s.starts_with('{') => {
                match serde_json::from_str::<Json>(&s) {
                    Ok(parsed) => Self(parsed),
                    Err(_) => Self(Json::String(s)),
                }
            }
            other => Self(other),
        }
    }

    pub fn as_json(&self) -> &Json {
        &self.0
    }

    /// Presentations grouped by DCQL credential query id.
    pub fn dcql_presentations(&self) -> Result<Vec<(&str, Vec<&str>)>, VerificationError> {
        let Json::Object(map) = &self.0 else {
            return Err(invalid_token("a DCQL vp_token must be an object"));
        };

        map.iter()
            .map(|(id, value)| {
                let presentations = match value {
                    Json::String(token) => vec![token.as_str()],
                    Json::Array(tokens) if !tokens.is_empty() => tokens
                        .iter()
                        .map(|t| {
                            t.as_str().ok_or_else(|| {
                                invalid_token(format!("presentation for '{id}' is not a string"))
                            })
                        })
                        .collect::<Result<_, _>>()?,
                    _ => {
                        return Err(invalid_token(format!(
                            "presentations for '{id}' must be a string or a non-empty array"
                        )))
                    }
                };
                Ok((id.as_str(), presentations))
            })
            .collect()
    }
}

/// The `presentation_submission` parameter as posted by the wallet.
///
/// Parsing is deferred to verification so that a malformed submission is
/// recorded on the verification request like any other invalid presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationSubmission(Json);

impl PresentationSubmission {
    pub const KEY: &'static str = "presentation_submission";

    pub fn from_param(raw: Json) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &Json {
        &self.0
    }

    /// Parse the parameter value, either a JSON object or its JSON text.
    pub fn parse(&self) -> Result<PresentationSubmissionParsed, VerificationError> {
        match &self.0 {
            Json::String(s) => serde_json::from_str(s),
            other => serde_json::from_value(other.clone()),
        }
        .map_err(|e| {
            VerificationError::new(
                ErrorCode::InvalidPresentationSubmission,
                format!("presentation_submission could not be parsed: {e}"),
            )
        })
    }
}

/// Error parameters of an authorization error response sent by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorParams {
    pub error: String,
    pub error_description: Option<String>,
}

impl ErrorParams {
    pub const ERROR: &'static str = "error";
    pub const ERROR_DESCRIPTION: &'static str = "error_description";

    pub(super) fn from_params(params: &Map<String, Json>) -> Result<Self, VerificationError> {
        let error = params
            .get(Self::ERROR)
            .and_then(Json::as_str)
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                VerificationError::new(
                    ErrorCode::AuthorizationRequestMissingErrorParam,
                    "response carries neither a vp_token nor an error",
                )
            })?;

        Ok(Self {
            error: error.to_owned(),
            error_description: params
                .get(Self::ERROR_DESCRIPTION)
                .and_then(Json::as_str)
                .map(ToOwned::to_owned),
        })
    }
}

fn invalid_token(description: impl Into<String>) -> VerificationError {
    VerificationError::new(ErrorCode::InvalidPresentationSubmission, description)
        .with_type(ErrorType::InvalidCredential)
}
