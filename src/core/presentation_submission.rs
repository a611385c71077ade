use super::{
    credential_format::*,
    error::{ErrorCode, ErrorType, VerificationError},
    presentation_definition::PresentationDefinition,
};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use serde_json_path::JsonPath;
use tracing::debug;

/// A DescriptorMapId is a unique identifier for a DescriptorMap.
pub type DescriptorMapId = String;

/// Presentation Submissions express how the credentials presented to a verifier
/// are laid out within the `vp_token`, in accordance with the requirements
/// specified in a [PresentationDefinition].
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-submission](https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-submission)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresentationSubmission {
    id: String,
    definition_id: DescriptorMapId,
    descriptor_map: Vec<DescriptorMap>,
}

impl PresentationSubmission {
    pub fn new(id: String, definition_id: DescriptorMapId, descriptor_map: Vec<DescriptorMap>) -> Self {
        Self {
            id,
            definition_id,
            descriptor_map,
        }
    }

    /// Return the id of the presentation submission.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Return the definition id of the presentation submission.
    pub fn definition_id(&self) -> &String {
        &self.definition_id
    }

    /// Return the descriptor map of the presentation submission.
    pub fn descriptor_map(&self) -> &Vec<DescriptorMap> {
        &self.descriptor_map
    }

    /// Locate the single SD-JWT credential of `vp_token` described by this submission.
    ///
    /// When `vp_token` is an array it must hold exactly one entry per descriptor.
    /// Every descriptor must reference an input descriptor of `definition`. Of
    /// the descriptors whose (innermost) format is an SD-JWT format exactly one
    /// is expected to resolve to a compact token.
    pub fn extract<'a>(
        &'a self,
        definition: &PresentationDefinition,
        vp_token: &'a Json,
    ) -> Result<SubmittedCredential<'a>, VerificationError> {
        if &self.definition_id != definition.id() {
            return Err(invalid_submission(format!(
                "submission answers definition '{}', expected '{}'",
                self.definition_id,
                definition.id()
            )));
        }

        if let Json::Array(tokens) = vp_token {
            if tokens.len() != self.descriptor_map.len() {
                return Err(invalid_submission(format!(
                    "vp_token holds {} credentials but the submission describes {}",
                    tokens.len(),
                    self.descriptor_map.len()
                )));
            }
        }

        let mut matches = Vec::new();
        for descriptor in &self.descriptor_map {
            if !definition
                .input_descriptors()
                .iter()
                .any(|d| d.id() == descriptor.id)
            {
                return Err(invalid_submission(format!(
                    "descriptor '{}' does not reference an input descriptor",
                    descriptor.id
                )));
            }

            let leaf = descriptor.leaf();
            if !leaf.format.is_sd_jwt() {
                debug!(descriptor = %descriptor.id, format = %leaf.format, "skipping unsupported format");
                continue;
            }

            matches.push(SubmittedCredential {
                descriptor_id: &descriptor.id,
                format: &leaf.format,
                token: descriptor.resolve(vp_token)?,
            });
        }

        let mut matches = matches.into_iter();
        match (matches.next(), matches.next()) {
            (Some(credential), None) => Ok(credential),
            (None, _) => Err(VerificationError::new(
                ErrorCode::UnsupportedFormat,
                "submission contains no SD-JWT credential",
            )
            .with_type(ErrorType::InvalidCredential)),
            (Some(_), Some(_)) => Err(invalid_submission(
                "submission contains more than one SD-JWT credential",
            )),
        }
    }
}

/// The credential selected from a `vp_token` by a presentation submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmittedCredential<'a> {
    pub descriptor_id: &'a str,
    pub format: &'a ClaimFormatDesignation,
    pub token: &'a str,
}

/// Descriptor Maps describe where a credential for an input descriptor is found.
///
/// `path` is evaluated against the `vp_token`; each `path_nested` level is
/// evaluated against the value selected by its parent.
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-submission](https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-submission)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DescriptorMap {
    pub id: DescriptorMapId,
    pub format: ClaimFormatDesignation,
    pub path: JsonPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_nested: Option<Box<DescriptorMap>>,
}

impl DescriptorMap {
    pub fn new(
        id: impl Into<DescriptorMapId>,
        format: impl Into<ClaimFormatDesignation>,
        path: JsonPath,
    ) -> Self {
        Self {
            id: id.into(),
            format: format.into(),
            path,
            path_nested: None,
        }
    }

    /// Set the nested path of the descriptor map.
    ///
    /// The `id` property MUST be the same for each level of nesting.
    pub fn set_path_nested(mut self, mut path_nested: DescriptorMap) -> Self {
        path_nested.id.clone_from(&self.id);
        self.path_nested = Some(Box::new(path_nested));
        self
    }

    /// The innermost descriptor; its format is the one of the credential itself.
    fn leaf(&self) -> &DescriptorMap {
        match &self.path_nested {
            Some(nested) => nested.leaf(),
            None => self,
        }
    }

    fn resolve<'a>(&self, value: &'a Json) -> Result<&'a str, VerificationError> {
        let selected = self.path.query(value).exactly_one().map_err(|_| {
            invalid_submission(format!(
                "path '{}' of descriptor '{}' does not select exactly one value",
                self.path, self.id
            ))
        })?;

        match (&self.path_nested, selected) {
            (Some(nested), value) => nested.resolve(value),
            (None, Json::String(token)) => Ok(token),
            (None, _) => Err(invalid_submission(format!(
                "descriptor '{}' does not select a compact credential",
                self.id
            ))),
        }
    }
}

fn invalid_submission(description: impl Into<String>) -> VerificationError {
    VerificationError::new(ErrorCode::InvalidPresentationSubmission, description)
        .with_type(ErrorType::InvalidCredential)
}
