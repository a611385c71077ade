//! Verification engine for [OID4VP] presentations of SD-JWT credentials.
//!
//! [OID4VP]: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html>
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use openid4vp_verifier::config::VerifierConfig;
//! use openid4vp_verifier::core::response::AuthorizationResponse;
//! use openid4vp_verifier::verifier::{session::MemoryStore, Verifier};
//!
//! // Setup verifier.
//! let verifier = Verifier::builder()
//!     .with_config(VerifierConfig::new("https://verifier.example.com"))
//!     .with_session_store(Arc::new(MemoryStore::default()))
//!     .with_key_resolver(key_resolver)
//!     .with_status_list_fetcher(status_list_fetcher)
//!     .with_trust_statement_fetcher(trust_statement_fetcher)
//!     .build()?;
//!
//! // Issue a verification request.
//! let request = verifier
//!     .build_verification_request()
//!     .with_presentation_definition(presentation_definition)
//!     .with_accepted_issuer("did:web:issuer.example.com")
//!     .build()
//!     .await?;
//!
//! // Hand `request.id` and `request.nonce` to the wallet, then process its response.
//! let response = AuthorizationResponse::from_params(params)?;
//! let subject = verifier.process_response(request.id, response).await?;
//! ```
//!
//! # Verification
//!
//! 1. [`SdJwtVerifier`] checks the issuer-signed JWT, the disclosures and the
//!    key-binding proof, and expands the selectively disclosed claims.
//! 2. The issuer is authorized by a [`TrustResolver`], either through an
//!    allow-list or through trust statements signed by trust anchors.
//! 3. The [`StatusListResolver`] looks the credential up in its token status list.
//! 4. The expanded claims are matched against the presentation definition or
//!    the DCQL query of the request.
//! 5. The [`Verifier`] records the outcome on the verification request.
//!
//! [`SdJwtVerifier`]: crate::verifier::sd_jwt::SdJwtVerifier
//! [`TrustResolver`]: crate::verifier::trust::TrustResolver
//! [`StatusListResolver`]: crate::verifier::status::StatusListResolver
//! [`Verifier`]: crate::verifier::Verifier

pub mod config;
pub mod core;
pub mod utils;
pub mod verifier;
pub use serde_json_path::JsonPath;
