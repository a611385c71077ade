use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use serde_json_path::JsonPath as ParsedJsonPath;
use tracing::debug;

use super::{credential_format::*, error::VerificationError};
use crate::utils::NonEmptyVec;

/// A JSONPath is a string that represents a path to a specific value within a JSON object.
///
/// For syntax details, see [RFC 9535](https://www.rfc-editor.org/rfc/rfc9535).
pub type JsonPath = String;

/// Paths accepted as "the credential type claim" for a field filter.
const VCT_PATHS: [&str; 3] = ["$.vct", "$['vct']", "$[\"vct\"]"];

/// Input Descriptors describe the information a verifier requires of a holder.
///
/// All Input Descriptors MUST be satisfied by the submitted credential.
///
/// See: <https://identity.foundation/presentation-exchange/spec/v2.0.0/#input-descriptor-object>
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputDescriptor {
    id: String,
    #[serde(default)]
    constraints: Constraints,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(default, skip_serializing_if = "ClaimFormatMap::is_empty")]
    format: ClaimFormatMap,
}

impl InputDescriptor {
    /// Create a new instance of the input descriptor with the given id and constraints.
    pub fn new(id: String, constraints: Constraints) -> Self {
        Self {
            id,
            constraints,
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
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

    /// Set the format of the input descriptor.
    ///
    /// When present it takes precedence over the presentation definition's
    /// format for the credential submitted for this descriptor.
    pub fn set_format(mut self, format: ClaimFormatMap) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> &ClaimFormatMap {
        &self.format
    }

    /// Check every field constraint against the expanded claims of a credential.
    pub fn validate_claims(&self, claims: &Json) -> Result<(), VerificationError> {
        for field in self.constraints.fields() {
            field.validate_claims(claims).map_err(|e| {
                debug!(input_descriptor = self.id(), "field constraint violated: {e}");
                e
            })?;
        }
        Ok(())
    }
}

/// Constraints a holder must satisfy to fulfil an Input Descriptor.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fields: Vec<ConstraintsField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_disclosure: Option<ConstraintsLimitDisclosure>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_constraint(mut self, field: ConstraintsField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &Vec<ConstraintsField> {
        self.fields.as_ref()
    }

    pub fn set_limit_disclosure(mut self, limit_disclosure: ConstraintsLimitDisclosure) -> Self {
        self.limit_disclosure = Some(limit_disclosure);
        self
    }

    pub fn limit_disclosure(&self) -> Option<&ConstraintsLimitDisclosure> {
        self.limit_disclosure.as_ref()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintsLimitDisclosure {
    Required,
    Preferred,
}

/// A single required claim of an Input Descriptor.
///
/// `path` lists JSONPath expressions into the expanded credential claims; each of
/// them must select a value. A `filter` may only be used to pin the credential
/// type: a single `vct` path with a string `const`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintsField {
    path: NonEmptyVec<JsonPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional: Option<bool>,
}

impl From<NonEmptyVec<JsonPath>> for ConstraintsField {
    fn from(path: NonEmptyVec<JsonPath>) -> Self {
        Self {
            path,
            id: None,
            purpose: None,
            name: None,
            filter: None,
            optional: None,
        }
    }
}

impl ConstraintsField {
    pub fn new(path: JsonPath) -> ConstraintsField {
        ConstraintsField {
            path: NonEmptyVec::new(path),
            ..Default::default()
        }
    }

    pub fn add_path(mut self, path: JsonPath) -> Self {
        self.path.push(path);
        self
    }

    pub fn path(&self) -> &NonEmptyVec<JsonPath> {
        &self.path
    }

    pub fn set_id(mut self, id: String) -> Self {
        self.id = Some(id);
        self
    }

    pub fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }

    pub fn set_purpose(mut self, purpose: String) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn purpose(&self) -> Option<&String> {
        self.purpose.as_ref()
    }

    pub fn set_name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    pub fn set_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn set_optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }

    /// Check this field against the expanded claims of a credential.
    pub fn validate_claims(&self, claims: &Json) -> Result<(), VerificationError> {
        match &self.filter {
            Some(filter) => self.validate_type_filter(filter, claims),
            None => {
                if self.is_optional() {
                    return Ok(());
                }
                for path in self.path.iter() {
                    if select(path, claims)?.is_empty() {
                        return Err(VerificationError::constraint(format!(
                            "required field '{path}' is not present in the credential"
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    fn validate_type_filter(&self, filter: &Filter, claims: &Json) -> Result<(), VerificationError> {
        let [path] = &*self.path else {
            return Err(VerificationError::constraint(
                "a filtered field must declare exactly one path",
            ));
        };
        if !VCT_PATHS.contains(&path.as_str()) {
            return Err(VerificationError::constraint(format!(
                "filters are only supported on the credential type, found path '{path}'"
            )));
        }
        let expected = filter.string_const().ok_or_else(|| {
            VerificationError::constraint("filter must be a string type with a const value")
        })?;

        match select(path, claims)?.first() {
            Some(Json::String(vct)) if vct == expected => Ok(()),
            Some(other) => Err(VerificationError::constraint(format!(
                "credential type {other} does not match required '{expected}'"
            ))),
            None => Err(VerificationError::constraint(
                "credential type is not present in the credential",
            )),
        }
    }
}

/// A field filter. Only `{"type": "string", "const": "<vct>"}` is accepted;
/// anything else is kept so that it can be reported as a violation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    filter_type: Option<String>,
    #[serde(rename = "const", skip_serializing_if = "Option::is_none")]
    const_value: Option<Json>,
    #[serde(flatten)]
    other: Map<String, Json>,
}

impl Filter {
    pub fn const_string(value: impl Into<String>) -> Self {
        Self {
            filter_type: Some("string".into()),
            const_value: Some(Json::String(value.into())),
            other: Map::new(),
        }
    }

    fn string_const(&self) -> Option<&str> {
        if self.filter_type.as_deref() != Some("string") || !self.other.is_empty() {
            return None;
        }
        self.const_value.as_ref().and_then(Json::as_str)
    }
}

fn select<'a>(path: &str, claims: &'a Json) -> Result<Vec<&'a Json>, VerificationError> {
    let parsed = ParsedJsonPath::parse(path).map_err(|e| {
        VerificationError::constraint(format!("field path '{path}' is not a valid JSONPath: {e}"))
    })?;
    Ok(parsed.query(claims).all())
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::core::error::ErrorCode;

    fn claims() -> Json {
        json!({
            "vct": "https://example.com/identity",
            "first_name": "Erika",
            "address": { "country": "DE" }
        })
    }

    #[test]
    fn required_fields_must_be_present() {
        let field = ConstraintsField::new("$.first_name".into()).add_path("$.address.country".into());
        field.validate_claims(&claims()).unwrap();

        let err = ConstraintsField::new("$.last_name".into())
            .validate_claims(&claims())
            .unwrap_err();
        assert!(err.is(ErrorCode::PresentationSubmissionConstraintViolated));
    }

    #[test]
    fn every_declared_path_must_resolve() {
        let err = ConstraintsField::new("$.first_name".into())
            .add_path("$.last_name".into())
            .validate_claims(&claims())
            .unwrap_err();
        assert!(err.description.contains("$.last_name"));
    }

    #[test]
    fn optional_fields_may_be_missing() {
        ConstraintsField::new("$.last_name".into())
            .set_optional(true)
            .validate_claims(&claims())
            .unwrap();
    }

    #[test]
    fn type_filter_matches_vct() {
        let field = ConstraintsField::new("$.vct".into())
            .set_filter(Filter::const_string("https://example.com/identity"));
        field.validate_claims(&claims()).unwrap();

        let field =
            ConstraintsField::new("$.vct".into()).set_filter(Filter::const_string("other"));
        assert!(field
            .validate_claims(&claims())
            .unwrap_err()
            .is(ErrorCode::PresentationSubmissionConstraintViolated));
    }

    #[test]
    fn unsupported_filter_shapes_are_violations() {
        let pattern: Filter =
            serde_json::from_value(json!({"type": "string", "pattern": "^https"})).unwrap();
        let on_other_path: ConstraintsField = serde_json::from_value(json!({
            "path": ["$.first_name"],
            "filter": {"type": "string", "const": "Erika"}
        }))
        .unwrap();

        for field in [
            ConstraintsField::new("$.vct".into()).set_filter(pattern),
            on_other_path,
            ConstraintsField::new("$.vct".into())
                .add_path("$.type".into())
                .set_filter(Filter::const_string("https://example.com/identity")),
        ] {
            assert!(field
                .validate_claims(&claims())
                .unwrap_err()
                .is(ErrorCode::PresentationSubmissionConstraintViolated));
        }
    }

    #[test]
    fn invalid_paths_are_violations() {
        let err = ConstraintsField::new("first_name[".into())
            .validate_claims(&claims())
            .unwrap_err();
        assert!(err.is(ErrorCode::PresentationSubmissionConstraintViolated));
    }
}
