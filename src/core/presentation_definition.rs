use super::credential_format::*;
use super::error::{FieldError, VerificationError};
use super::input_descriptor::*;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A presentation definition describes the information a verifier requires of a holder.
///
/// Presentation Definitions are composed of inputs, which describe the forms and details of the
/// proofs they require. A submitted SD-JWT must satisfy the field constraints of every
/// input descriptor.
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-definition](https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-definition)
#[derive(Clone, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresentationDefinition {
    id: String,
    input_descriptors: Vec<InputDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<ClaimFormatMap>,
}

impl PresentationDefinition {
    /// The Presentation Definition MUST contain an id property and at least one
    /// input descriptor.
    pub fn new(id: String, input_descriptor: InputDescriptor) -> Self {
        Self {
            id,
            input_descriptors: vec![input_descriptor],
            ..Default::default()
        }
    }

    /// Return the id of the presentation definition.
    pub fn id(&self) -> &String {
        &self.id
    }

    /// Add a new input descriptor to the presentation definition.
    pub fn add_input_descriptors(mut self, input_descriptor: InputDescriptor) -> Self {
        self.input_descriptors.push(input_descriptor);
        self
    }

    /// Return the input descriptors of the presentation definition.
    pub fn input_descriptors(&self) -> &Vec<InputDescriptor> {
        &self.input_descriptors
    }

    pub fn set_name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    pub fn set_purpose(mut self, purpose: String) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn purpose(&self) -> Option<&String> {
        self.purpose.as_ref()
    }

    /// Attach a format to the presentation definition.
    ///
    /// The properties inform the holder of the claim formats, and the algorithms
    /// for each of them, that the verifier can process.
    pub fn set_format(mut self, format: ClaimFormatMap) -> Self {
        self.format = Some(format);
        self
    }

    /// Add a new format to the presentation definition.
    pub fn add_format(mut self, format: ClaimFormatDesignation, value: ClaimFormatPayload) -> Self {
        self.format
            .get_or_insert_with(HashMap::new)
            .insert(format, value);
        self
    }

    /// Return the format of the presentation definition.
    pub fn format(&self) -> Option<&ClaimFormatMap> {
        self.format.as_ref()
    }

    /// Algorithms accepted for a credential of `format` submitted for `descriptor_id`.
    ///
    /// The input descriptor's format wins over the definition's. `None` means the
    /// request does not restrict the format and the verifier defaults apply.
    pub fn accepted_algorithms(
        &self,
        descriptor_id: &str,
        format: &ClaimFormatDesignation,
    ) -> Option<&ClaimFormatPayload> {
        self.input_descriptors
            .iter()
            .find(|d| d.id() == descriptor_id)
            .and_then(|d| d.format().get(format))
            .or_else(|| self.format.as_ref().and_then(|f| f.get(format)))
    }

    /// Check the expanded claims of a credential against every input descriptor.
    pub fn validate_claims(&self, claims: &Json) -> Result<(), VerificationError> {
        self.input_descriptors
            .iter()
            .try_for_each(|descriptor| descriptor.validate_claims(claims))
    }

    /// Collect every structural problem of the definition.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let mut field = |field: String, message: &str| {
            errors.push(FieldError {
                field,
                message: message.to_owned(),
            })
        };

        if self.id.trim().is_empty() {
            field("presentation_definition.id".into(), "must not be blank");
        }
        if self.input_descriptors.is_empty() {
            field(
                "presentation_definition.input_descriptors".into(),
                "at least one input descriptor is required",
            );
        }
        if let Some(format) = &self.format {
            for (name, message) in format_errors(format) {
                field(format!("presentation_definition.format.{name}"), message);
            }
        }

        for (i, descriptor) in self.input_descriptors.iter().enumerate() {
            if descriptor.id().trim().is_empty() {
                field(
                    format!("presentation_definition.input_descriptors[{i}].id"),
                    "must not be blank",
                );
            }
            for (name, message) in format_errors(descriptor.format()) {
                field(
                    format!("presentation_definition.input_descriptors[{i}].format.{name}"),
                    message,
                );
            }
            for (j, constraint) in descriptor.constraints().fields().iter().enumerate() {
                if constraint.path().iter().any(|p| p.trim().is_empty()) {
                    field(
                        format!(
                            "presentation_definition.input_descriptors[{i}].constraints.fields[{j}].path"
                        ),
                        "must not contain blank paths",
                    );
                }
            }
        }

        errors
    }
}

fn format_errors(format: &ClaimFormatMap) -> Vec<(String, &'static str)> {
    let mut errors = Vec::new();
    for (designation, payload) in format {
        if !designation.is_sd_jwt() {
            errors.push((designation.to_string(), "only SD-JWT formats are supported"));
        } else if payload.alg_values.is_empty() {
            errors.push((designation.to_string(), "at least one algorithm is required"));
        }
    }
    errors
}
