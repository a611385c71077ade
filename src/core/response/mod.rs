use serde_json::{Map, Value as Json};

use self::parameters::{ErrorParams, PresentationSubmission, VpToken};

use super::error::VerificationError;

pub mod parameters;

/// An authorization response posted by a wallet for a verification request.
///
/// A response with a `vp_token` presents credentials; any other response is a
/// rejection by the wallet and must carry an `error`.
#[derive(Debug, Clone)]
pub enum AuthorizationResponse {
    Presentation {
        vp_token: VpToken,
        presentation_submission: Option<PresentationSubmission>,
        state: Option<String>,
    },
    Error {
        params: ErrorParams,
        state: Option<String>,
    },
}

impl AuthorizationResponse {
    pub const STATE: &'static str = "state";

    /// Interpret the response parameters, e.g. the decoded form body.
    pub fn from_params(mut params: Map<String, Json>) -> Result<Self, VerificationError> {
        let state = params
            .get(Self::STATE)
            .and_then(Json::as_str)
            .map(ToOwned::to_owned);

        let Some(vp_token) = params.remove(VpToken::KEY) else {
            return Ok(Self::Error {
                params: ErrorParams::from_params(&params)?,
                state,
            });
        };

        let presentation_submission = params
            .remove(PresentationSubmission::KEY)
            .map(PresentationSubmission::from_param);

        Ok(Self::Presentation {
            vp_token: VpToken::from_param(vp_token),
            presentation_submission,
            state,
        })
    }

    pub fn state(&self) -> Option<&str> {
        match self {
            Self::Presentation { state, .. } | Self::Error { state, .. } => state.as_deref(),
        }
    }
}
