use std::collections::{HashMap, HashSet};

use crate::{
    core::{
        credential_format::ClaimFormatDesignation,
        error::{ErrorCode, FieldError, VerificationError},
    },
    utils::NonEmptyVec,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

const VCT_VALUES: &str = "vct_values";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlQuery {
    credentials: NonEmptyVec<DcqlCredentialQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential_sets: Option<NonEmptyVec<DcqlCredentialSetQuery>>,
}

impl DcqlQuery {
    pub fn new(credentials: NonEmptyVec<DcqlCredentialQuery>) -> Self {
        Self {
            credentials,
            credential_sets: None,
        }
    }

    pub fn set_credential_sets(
        &mut self,
        credential_sets: Option<NonEmptyVec<DcqlCredentialSetQuery>>,
    ) {
        self.credential_sets = credential_sets;
    }

    pub fn credential_sets(&self) -> Option<&NonEmptyVec<DcqlCredentialSetQuery>> {
        self.credential_sets.as_ref()
    }

    pub fn credentials(&self) -> &[DcqlCredentialQuery] {
        &self.credentials
    }

    pub fn credential(&self, id: &str) -> Option<&DcqlCredentialQuery> {
        self.credentials.iter().find(|c| c.id == id)
    }

    /// Check that the credential queries answered by a response satisfy the
    /// query as a whole.
    ///
    /// Without credential sets every credential query is required. Otherwise
    /// each required set needs at least one option whose queries were all
    /// answered.
    pub fn check_answered(&self, answered: &HashSet<&str>) -> Result<(), VerificationError> {
        let Some(sets) = &self.credential_sets else {
            return match self.credentials.iter().find(|c| !answered.contains(c.id())) {
                Some(missing) => Err(VerificationError::new(
                    ErrorCode::CredentialMissingData,
                    format!("no presentation for credential query '{}'", missing.id()),
                )),
                None => Ok(()),
            };
        };

        for (i, set) in sets.iter().enumerate() {
            if !set.is_required() {
                continue;
            }
            let satisfied = set
                .options()
                .iter()
                .any(|option| option.iter().all(|id| answered.contains(id.as_str())));
            if !satisfied {
                return Err(VerificationError::new(
                    ErrorCode::CredentialMissingData,
                    format!("required credential set {i} is not satisfied"),
                ));
            }
        }
        Ok(())
    }

    /// Collect every structural problem of the query.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let mut ids = HashSet::new();

        for (i, credential) in self.credentials.iter().enumerate() {
            let field = |name: &str| format!("dcql_query.credentials[{i}].{name}");

            if credential.id.is_empty()
                || !credential
                    .id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                errors.push(FieldError {
                    field: field("id"),
                    message: "must be a non-empty string of alphanumerics, '_' or '-'".into(),
                });
            } else if !ids.insert(credential.id.as_str()) {
                errors.push(FieldError {
                    field: field("id"),
                    message: format!("duplicate credential query id '{}'", credential.id),
                });
            }

            if !credential.format.is_sd_jwt() {
                errors.push(FieldError {
                    field: field("format"),
                    message: "only SD-JWT formats are supported".into(),
                });
            }

            if let Some(claim_sets) = &credential.claim_sets {
                let claim_ids: HashSet<&str> = credential
                    .claims
                    .iter()
                    .flat_map(|claims| claims.iter())
                    .filter_map(|c| c.id.as_deref())
                    .collect();
                if credential.claims.is_none() {
                    errors.push(FieldError {
                        field: field("claim_sets"),
                        message: "must not be present without claims".into(),
                    });
                } else if claim_sets
                    .iter()
                    .flatten()
                    .any(|id| !claim_ids.contains(id.as_str()))
                {
                    errors.push(FieldError {
                        field: field("claim_sets"),
                        message: "references an unknown claim id".into(),
                    });
                }
            }
        }

        if let Some(sets) = &self.credential_sets {
            for (i, set) in sets.iter().enumerate() {
                if set
                    .options()
                    .iter()
                    .flatten()
                    .any(|id| !ids.contains(id.as_str()))
                {
                    errors.push(FieldError {
                        field: format!("dcql_query.credential_sets[{i}].options"),
                        message: "references an unknown credential query id".into(),
                    });
                }
            }
        }

        errors
    }
}

/// A Credential Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.1>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialQuery {
    /// REQUIRED. A string identifying the Credential in the response.
    /// The value MUST be unique within a DCQL query.
    id: String,

    /// REQUIRED. A string that specifies the requested format for the Credential.
    format: ClaimFormatDesignation,

    /// Format-specific metadata constraints; `vct_values` for SD-JWT VC.
    #[serde(default)]
    meta: serde_json::Map<String, Json>,

    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<NonEmptyVec<DcqlCredentialClaimsQuery>>,

    /// Alternative combinations of claim ids; the first satisfiable one is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    claim_sets: Option<NonEmptyVec<Vec<String>>>,

    /// Defaults to `true` if not present.
    #[serde(skip_serializing_if = "Option::is_none")]
    require_cryptographic_holder_binding: Option<bool>,

    /// Defaults to `false` if not present.
    #[serde(skip_serializing_if = "Option::is_none")]
    multiple: Option<bool>,
}

impl DcqlCredentialQuery {
    pub fn new(id: String, format: ClaimFormatDesignation) -> Self {
        Self {
            id,
            format,
            meta: serde_json::Map::new(),
            claims: None,
            claim_sets: None,
            require_cryptographic_holder_binding: None,
            multiple: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> &ClaimFormatDesignation {
        &self.format
    }

    pub fn meta(&self) -> &serde_json::Map<String, Json> {
        &self.meta
    }

    pub fn set_meta(&mut self, meta: serde_json::Map<String, Json>) {
        self.meta = meta;
    }

    /// Restrict the accepted credential types.
    pub fn set_vct_values(&mut self, vct_values: Vec<String>) {
        self.meta.insert(VCT_VALUES.into(), vct_values.into());
    }

    /// Accepted credential types, if restricted.
    pub fn vct_values(&self) -> Option<Vec<&str>> {
        self.meta
            .get(VCT_VALUES)
            .and_then(Json::as_array)
            .map(|values| values.iter().filter_map(Json::as_str).collect())
    }

    pub fn claims(&self) -> Option<&NonEmptyVec<DcqlCredentialClaimsQuery>> {
        self.claims.as_ref()
    }

    pub fn set_claims(&mut self, claims: Option<NonEmptyVec<DcqlCredentialClaimsQuery>>) {
        self.claims = claims;
    }

    pub fn claim_sets(&self) -> Option<&NonEmptyVec<Vec<String>>> {
        self.claim_sets.as_ref()
    }

    pub fn set_claim_sets(&mut self, claim_sets: Option<NonEmptyVec<Vec<String>>>) {
        self.claim_sets = claim_sets;
    }

    /// Returns `true` if cryptographic holder binding is required.
    /// Defaults to `true` if not explicitly set.
    pub fn require_cryptographic_holder_binding(&self) -> bool {
        self.require_cryptographic_holder_binding.unwrap_or(true)
    }

    pub fn set_require_cryptographic_holder_binding(
        &mut self,
        require_cryptographic_holder_binding: Option<bool>,
    ) {
        self.require_cryptographic_holder_binding = require_cryptographic_holder_binding;
    }

    /// Returns `true` if multiple Credentials may be returned for this query.
    pub fn multiple(&self) -> bool {
        self.multiple.unwrap_or(false)
    }

    pub fn set_multiple(&mut self, multiple: Option<bool>) {
        self.multiple = multiple;
    }

    /// Check the expanded claims of a presented credential against this query.
    ///
    /// The credential type is checked first. Then either every claims query
    /// must match or, with `claim_sets`, the first set whose claims all match
    /// wins.
    pub fn validate_claims(&self, claims: &Json) -> Result<(), VerificationError> {
        if let Some(accepted) = self.vct_values() {
            let vct = claims.get("vct").and_then(Json::as_str);
            if !vct.is_some_and(|vct| accepted.contains(&vct)) {
                return Err(VerificationError::constraint(format!(
                    "credential type {vct:?} is not accepted by query '{}'",
                    self.id
                )));
            }
        }

        let Some(queries) = &self.claims else {
            return Ok(());
        };

        let Some(claim_sets) = &self.claim_sets else {
            return queries.iter().try_for_each(|q| q.validate_claims(claims));
        };

        let by_id: HashMap<&str, &DcqlCredentialClaimsQuery> = queries
            .iter()
            .filter_map(|q| q.id.as_deref().map(|id| (id, q)))
            .collect();

        let mut first_error = None;
        for set in claim_sets.iter() {
            let result = set.iter().try_for_each(|id| match by_id.get(id.as_str()) {
                Some(query) => query.validate_claims(claims),
                None => Err(VerificationError::constraint(format!(
                    "claim set references unknown claim '{id}'"
                ))),
            });
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(query = %self.id, "claim set {set:?} not satisfied: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| {
            VerificationError::new(ErrorCode::CredentialMissingData, "no claim set is satisfied")
        }))
    }
}

/// A Credential Set Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.2>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialSetQuery {
    /// Each value is a list of Credential Query identifiers representing one
    /// set of Credentials that satisfies the use case.
    options: NonEmptyVec<Vec<String>>,
    /// Defaults to `true` if not explicitly set.
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<bool>,
}

impl DcqlCredentialSetQuery {
    pub fn new(options: NonEmptyVec<Vec<String>>) -> Self {
        Self {
            options,
            required: None,
        }
    }

    pub fn options(&self) -> &NonEmptyVec<Vec<String>> {
        &self.options
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(true)
    }

    pub fn set_required(&mut self, required: Option<bool>) {
        self.required = required;
    }
}

/// A Claims Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.3>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialClaimsQuery {
    /// REQUIRED if `claim_sets` is present in the Credential Query.
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    /// A claims path pointer into the Credential.
    path: NonEmptyVec<DcqlCredentialClaimsQueryPath>,
    /// Expected values of the claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<NonEmptyVec<DcqlCredentialClaimsQueryValue>>,
}

impl DcqlCredentialClaimsQuery {
    pub fn new(path: NonEmptyVec<DcqlCredentialClaimsQueryPath>) -> Self {
        Self {
            id: None,
            path,
            values: None,
        }
    }

    pub fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub fn path(&self) -> &[DcqlCredentialClaimsQueryPath] {
        &self.path
    }

    pub fn values(&self) -> Option<&NonEmptyVec<DcqlCredentialClaimsQueryValue>> {
        self.values.as_ref()
    }

    pub fn set_values(&mut self, values: Option<NonEmptyVec<DcqlCredentialClaimsQueryValue>>) {
        self.values = values;
    }

    /// Process the claims path pointer against `claims`.
    ///
    /// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-7.2>
    pub fn select<'a>(&self, claims: &'a Json) -> Result<Vec<&'a Json>, VerificationError> {
        let mut selection = vec![claims];

        for component in self.path.iter() {
            selection = match component {
                DcqlCredentialClaimsQueryPath::Null => selection
                    .into_iter()
                    .map(|element| match element {
                        Json::Array(items) => Ok(items.iter()),
                        _ => Err(self.not_found("a wildcard is applied to a non-array")),
                    })
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .flatten()
                    .collect(),
                DcqlCredentialClaimsQueryPath::Integer(index) => selection
                    .into_iter()
                    .map(|element| match element {
                        Json::Array(items) => Ok(items.get(*index)),
                        _ => Err(self.not_found("an index is applied to a non-array")),
                    })
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .flatten()
                    .collect(),
                DcqlCredentialClaimsQueryPath::String(key) => selection
                    .into_iter()
                    .map(|element| match element {
                        Json::Object(map) => Ok(map.get(key)),
                        _ => Err(self.not_found("a key is applied to a non-object")),
                    })
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .flatten()
                    .collect(),
            };

            if selection.is_empty() {
                return Err(self.not_found("path not found"));
            }
        }

        Ok(selection)
    }

    /// Select the claim and check it against the expected values, if any.
    pub fn validate_claims(&self, claims: &Json) -> Result<(), VerificationError> {
        let selected = self.select(claims)?;

        if let Some(values) = &self.values {
            if let Some(unexpected) = selected
                .iter()
                .find(|value| !values.iter().any(|expected| expected.matches(value)))
            {
                return Err(VerificationError::constraint(format!(
                    "claim {:?} has unexpected value {unexpected}",
                    &*self.path
                )));
            }
        }

        Ok(())
    }

    fn not_found(&self, reason: &str) -> VerificationError {
        VerificationError::new(
            ErrorCode::CredentialMissingData,
            format!("claim {:?}: {reason}", &*self.path),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DcqlCredentialClaimsQueryValue {
    String(String),
    Integer(isize),
    Boolean(bool),
}

impl DcqlCredentialClaimsQueryValue {
    fn matches(&self, value: &Json) -> bool {
        match (self, value) {
            (Self::String(expected), Json::String(value)) => expected == value,
            (Self::Integer(expected), Json::Number(value)) => {
                value.as_i64() == Some(*expected as i64)
            }
            (Self::Boolean(expected), Json::Bool(value)) => expected == value,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DcqlCredentialClaimsQueryPath {
    String(String),
    Null,
    Integer(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn claims_query(value: Json) -> DcqlCredentialClaimsQuery {
        serde_json::from_value(value).unwrap()
    }

    fn degrees() -> Json {
        json!({"degrees": [{"type": "a"}, {"type": "b"}]})
    }

    #[test]
    fn de_serialize_dcql_query() {
        let dcql_query_json = json!({
          "credentials": [
            {
              "id": "pid",
              "format": "dc+sd-jwt",
              "meta": {
                "vct_values": ["https://example.com/pid"]
              },
              "claims": [
                { "path": ["address", "country"] },
              ]
            }
          ],
          "credential_sets": [
            {
              "options": [["pid"]]
            }
          ]
        });
        let mut credential = DcqlCredentialQuery::new("pid".into(), ClaimFormatDesignation::DcSdJwt);
        credential.set_vct_values(vec!["https://example.com/pid".into()]);
        credential.set_claims(Some(NonEmptyVec::new(DcqlCredentialClaimsQuery::new(
            vec![
                DcqlCredentialClaimsQueryPath::String("address".into()),
                DcqlCredentialClaimsQueryPath::String("country".into()),
            ]
            .try_into()
            .unwrap(),
        ))));
        let mut dcql_query_object = DcqlQuery::new(NonEmptyVec::new(credential));
        dcql_query_object.set_credential_sets(Some(NonEmptyVec::new(
            DcqlCredentialSetQuery::new(NonEmptyVec::new(vec!["pid".into()])),
        )));

        assert_eq!(
            dcql_query_json,
            serde_json::to_value(&dcql_query_object).unwrap()
        );
        assert_eq!(
            dcql_query_object,
            serde_json::from_value(dcql_query_json).unwrap()
        );
    }

    #[test]
    fn dcql_credential_query_defaults() {
        let cred = DcqlCredentialQuery::new("test".into(), ClaimFormatDesignation::DcSdJwt);
        assert!(cred.require_cryptographic_holder_binding());
        assert!(!cred.multiple());
        assert!(cred.meta().is_empty());
        assert!(cred.vct_values().is_none());

        let cred_set = DcqlCredentialSetQuery::new(NonEmptyVec::new(vec!["cred1".into()]));
        assert!(cred_set.is_required());
    }

    #[test]
    fn wildcard_selects_every_element() {
        let query = claims_query(json!({"path": ["degrees", null, "type"]}));
        assert_eq!(query.select(&degrees()).unwrap(), [&json!("a"), &json!("b")]);
    }

    #[test]
    fn index_selects_single_element() {
        let query = claims_query(json!({"path": ["degrees", 1, "type"]}));
        assert_eq!(query.select(&degrees()).unwrap(), [&json!("b")]);
    }

    #[test]
    fn out_of_range_index_is_not_found() {
        let query = claims_query(json!({"path": ["degrees", 2, "type"]}));
        let err = query.select(&degrees()).unwrap_err();
        assert!(err.is(ErrorCode::CredentialMissingData));
        assert!(err.description.contains("path not found"));
    }

    #[test]
    fn missing_keys_drop_branches() {
        let claims = json!({"degrees": [{"type": "a"}, {"name": "b"}]});
        let query = claims_query(json!({"path": ["degrees", null, "type"]}));
        assert_eq!(query.select(&claims).unwrap(), [&json!("a")]);
    }

    #[test]
    fn type_mismatches_are_errors() {
        for path in [json!(["degrees", "type"]), json!(["degrees", 0, 0]), json!([null])] {
            let query = claims_query(json!({ "path": path }));
            assert!(query.select(&degrees()).is_err(), "{path}");
        }
    }

    #[test]
    fn values_must_all_be_accepted() {
        let query = claims_query(json!({"path": ["degrees", null, "type"], "values": ["a", "b"]}));
        query.validate_claims(&degrees()).unwrap();

        let query = claims_query(json!({"path": ["degrees", null, "type"], "values": ["a"]}));
        assert!(query
            .validate_claims(&degrees())
            .unwrap_err()
            .is(ErrorCode::PresentationSubmissionConstraintViolated));

        let query = claims_query(json!({"path": ["age"], "values": [18, true]}));
        query.validate_claims(&json!({"age": 18})).unwrap();
    }

    #[test]
    fn vct_is_prefiltered() {
        let query: DcqlCredentialQuery = serde_json::from_value(json!({
            "id": "pid",
            "format": "dc+sd-jwt",
            "meta": {"vct_values": ["https://example.com/pid"]},
            "claims": [{"path": ["missing"]}]
        }))
        .unwrap();

        let err = query
            .validate_claims(&json!({"vct": "https://example.com/other"}))
            .unwrap_err();
        assert!(err.is(ErrorCode::PresentationSubmissionConstraintViolated));

        let err = query
            .validate_claims(&json!({"vct": "https://example.com/pid"}))
            .unwrap_err();
        assert!(err.is(ErrorCode::CredentialMissingData));
    }

    #[test]
    fn first_satisfiable_claim_set_wins() {
        let query: DcqlCredentialQuery = serde_json::from_value(json!({
            "id": "pid",
            "format": "dc+sd-jwt",
            "claims": [
                {"id": "a", "path": ["given_name"]},
                {"id": "b", "path": ["family_name"]},
                {"id": "c", "path": ["birthdate"]}
            ],
            "claim_sets": [["a", "b"], ["c"]]
        }))
        .unwrap();

        query.validate_claims(&json!({"birthdate": "1970-01-01"})).unwrap();
        query
            .validate_claims(&json!({"given_name": "Erika", "family_name": "Mustermann"}))
            .unwrap();
        assert!(query
            .validate_claims(&json!({"given_name": "Erika"}))
            .unwrap_err()
            .is(ErrorCode::CredentialMissingData));
    }

    #[test]
    fn credential_sets_need_one_answered_option() {
        let query: DcqlQuery = serde_json::from_value(json!({
            "credentials": [
                {"id": "pid", "format": "dc+sd-jwt"},
                {"id": "other_pid", "format": "dc+sd-jwt"},
                {"id": "loyalty", "format": "dc+sd-jwt"}
            ],
            "credential_sets": [
                {"options": [["pid"], ["other_pid"]]},
                {"options": [["loyalty"]], "required": false}
            ]
        }))
        .unwrap();

        query.check_answered(&HashSet::from(["other_pid"])).unwrap();
        assert!(query
            .check_answered(&HashSet::from(["loyalty"]))
            .unwrap_err()
            .is(ErrorCode::CredentialMissingData));
    }

    #[test]
    fn every_query_required_without_credential_sets() {
        let query: DcqlQuery = serde_json::from_value(json!({
            "credentials": [
                {"id": "pid", "format": "dc+sd-jwt"},
                {"id": "address", "format": "dc+sd-jwt"}
            ]
        }))
        .unwrap();

        query.check_answered(&HashSet::from(["pid", "address"])).unwrap();
        assert!(query
            .check_answered(&HashSet::from(["pid"]))
            .unwrap_err()
            .is(ErrorCode::CredentialMissingData));
    }

    #[test]
    fn validation_collects_all_errors() {
        let query: DcqlQuery = serde_json::from_value(json!({
            "credentials": [
                {"id": "pid", "format": "mso_mdoc"},
                {"id": "pid", "format": "dc+sd-jwt", "claim_sets": [["x"]]},
                {"id": "a b", "format": "dc+sd-jwt"}
            ],
            "credential_sets": [{"options": [["unknown"]]}]
        }))
        .unwrap();

        let fields: Vec<_> = query.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            [
                "dcql_query.credentials[0].format",
                "dcql_query.credentials[1].id",
                "dcql_query.credentials[1].claim_sets",
                "dcql_query.credentials[2].id",
                "dcql_query.credential_sets[0].options",
            ]
        );
    }
}
