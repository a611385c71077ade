use std::fmt;

use serde::{Deserialize, Serialize};

/// Fine-grained response codes reported for a failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MalformedCredential,
    InvalidFormat,
    InvalidPresentationSubmission,
    InvalidTokenStatusList,
    JwtExpired,
    JwtPremature,
    CredentialExpired,
    IssuerNotAccepted,
    PublicKeyOfIssuerUnresolvable,
    HolderBindingMismatch,
    MissingNonce,
    CredentialRevoked,
    CredentialSuspended,
    UnresolvableStatusList,
    PresentationSubmissionConstraintViolated,
    CredentialMissingData,
    UnsupportedFormat,
    VerificationProcessClosed,
    AuthorizationRequestObjectNotFound,
    AuthorizationRequestMissingErrorParam,
    ClientRejected,
}

impl ErrorCode {
    /// The category a code is reported under unless overridden.
    pub fn error_type(self) -> ErrorType {
        match self {
            Self::InvalidPresentationSubmission | Self::AuthorizationRequestMissingErrorParam => {
                ErrorType::InvalidRequest
            }
            Self::VerificationProcessClosed => ErrorType::VerificationProcessClosed,
            Self::AuthorizationRequestObjectNotFound => {
                ErrorType::AuthorizationRequestObjectNotFound
            }
            Self::ClientRejected => ErrorType::ClientRejected,
            _ => ErrorType::InvalidCredential,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::MalformedCredential => "MALFORMED_CREDENTIAL",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::InvalidPresentationSubmission => "INVALID_PRESENTATION_SUBMISSION",
            Self::InvalidTokenStatusList => "INVALID_TOKEN_STATUS_LIST",
            Self::JwtExpired => "JWT_EXPIRED",
            Self::JwtPremature => "JWT_PREMATURE",
            Self::CredentialExpired => "CREDENTIAL_EXPIRED",
            Self::IssuerNotAccepted => "ISSUER_NOT_ACCEPTED",
            Self::PublicKeyOfIssuerUnresolvable => "PUBLIC_KEY_OF_ISSUER_UNRESOLVABLE",
            Self::HolderBindingMismatch => "HOLDER_BINDING_MISMATCH",
            Self::MissingNonce => "MISSING_NONCE",
            Self::CredentialRevoked => "CREDENTIAL_REVOKED",
            Self::CredentialSuspended => "CREDENTIAL_SUSPENDED",
            Self::UnresolvableStatusList => "UNRESOLVABLE_STATUS_LIST",
            Self::PresentationSubmissionConstraintViolated => {
                "PRESENTATION_SUBMISSION_CONSTRAINT_VIOLATED"
            }
            Self::CredentialMissingData => "CREDENTIAL_MISSING_DATA",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::VerificationProcessClosed => "VERIFICATION_PROCESS_CLOSED",
            Self::AuthorizationRequestObjectNotFound => "AUTHORIZATION_REQUEST_OBJECT_NOT_FOUND",
            Self::AuthorizationRequestMissingErrorParam => {
                "AUTHORIZATION_REQUEST_MISSING_ERROR_PARAM"
            }
            Self::ClientRejected => "CLIENT_REJECTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// Coarse error category, used by the transport layer to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    InvalidCredential,
    VerificationProcessClosed,
    AuthorizationRequestObjectNotFound,
    ClientRejected,
    ServerError,
}

/// Structured verification failure: category, response code and description.
///
/// This is what gets persisted on a FAILED verification request and what is
/// returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{}: {description}", .code.map_or("SERVER_ERROR", ErrorCode::as_str))]
pub struct VerificationError {
    pub error_type: ErrorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub description: String,
}

impl VerificationError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            error_type: code.error_type(),
            code: Some(code),
            description: description.into(),
        }
    }

    /// A verifier-side failure that is not attributable to the submission.
    pub fn server(description: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::ServerError,
            code: None,
            description: description.into(),
        }
    }

    pub fn process_closed() -> Self {
        Self::new(
            ErrorCode::VerificationProcessClosed,
            "verification process is already closed",
        )
    }

    /// Report the error under a different category than the code's default.
    pub fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = error_type;
        self
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == Some(code)
    }

    pub(crate) fn malformed(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedCredential, description)
    }

    pub(crate) fn binding(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::HolderBindingMismatch, description)
    }

    pub(crate) fn constraint(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::PresentationSubmissionConstraintViolated, description)
    }
}

/// A single invalid field of a verification request under construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All the field errors found while validating a verification request.
///
/// Unlike [VerificationError] these are collected rather than fail-fast, so a
/// caller can report every problem with the request at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid verification request: {}", summary(.errors))]
pub struct RequestValidationError {
    pub errors: Vec<FieldError>,
}

fn summary(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
