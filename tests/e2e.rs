use std::time::Duration;

use openid4vp_verifier::{
    core::{
        dcql_query::DcqlQuery,
        error::{ErrorCode, ErrorType, RequestValidationError},
        presentation_definition::PresentationDefinition,
        response::AuthorizationResponse,
    },
    verifier::{
        session::{Outcome, Status, VerificationRequest},
        trust::TrustAnchor,
    },
};
use serde_json::{json, Map, Value as Json};
use sd_jwt_vc::*;
use uuid::Uuid;


fn presentation_definition() -> PresentationDefinition {
    serde_json::from_value(json!({
        "id": "identity-check",
        "input_descriptors": [
            {
                "id": "identity_credential",
                "format": {
                    "vc+sd-jwt": {
                        "sd-jwt_alg_values": ["ES256"],
                        "kb-jwt_alg_values": ["ES256"]
                    }
                },
                "constraints": {
                    "limit_disclosure": "required",
                    "fields": [
                        {
                            "path": ["$.vct"],
                            "filter": {"type": "string", "const": VCT}
                        },
                        {"path": ["$.first_name"]},
                        {"path": ["$.last_name"]},
                        {"path": ["$.birthdate"]}
                    ]
                }
            }
        ]
    }))
    .unwrap()
}

fn response(vp_token: Json, submission: Option<Json>) -> AuthorizationResponse {
    let mut params = Map::new();
    params.insert("vp_token".into(), vp_token);
    if let Some(submission) = submission {
        params.insert("presentation_submission".into(), submission);
    }
    AuthorizationResponse::from_params(params).unwrap()
}

fn submission(definition: &PresentationDefinition) -> Json {
    json!({
        "id": "submission",
        "definition_id": definition.id(),
        "descriptor_map": [
            {"id": "identity_credential", "format": "vc+sd-jwt", "path": "$"}
        ]
    })
}

async fn request(fixture: &Fixture) -> VerificationRequest {
    fixture
        .verifier
        .build_verification_request()
        .with_presentation_definition(presentation_definition())
        .with_accepted_issuer(ISSUER)
        .build()
        .await
        .unwrap()
}

fn identity(fixture: &Fixture) -> SdJwtBuilder {
    fixture
        .credential()
        .disclose("first_name", json!("Erika"))
        .disclose("last_name", json!("Mustermann"))
        .disclose("birthdate", json!("1963-08-12"))
        .conceal("nationality", json!("DE"))
}

#[tokio::test]
async fn sd_jwt_presentation_definition_direct_post() {
    let fixture = Fixture::new();
    let request = request(&fixture).await;

    let presentation = bind(
        &fixture.holder,
        &identity(&fixture).issue(&fixture.issuer),
        &request.nonce,
    );
    // Form-encoded responses carry the submission as JSON text.
    let submission_text = submission(&presentation_definition()).to_string();

    let outcome = fixture
        .verifier
        .process_response(
            request.id,
            response(json!(presentation), Some(json!(submission_text))),
        )
        .await
        .unwrap();

    let Outcome::Success { credentials } = &outcome else {
        panic!("unexpected outcome: {outcome:?}")
    };
    assert_eq!(credentials["first_name"], "Erika");
    assert_eq!(credentials["last_name"], "Mustermann");
    assert_eq!(credentials["birthdate"], "1963-08-12");
    assert!(credentials.get("nationality").is_none());
    assert!(credentials.get("_sd").is_none());
    assert!(credentials.get("_sd_alg").is_none());

    assert_eq!(
        fixture.verifier.poll_status(request.id).await.unwrap(),
        Status::Complete(outcome.clone())
    );

    // A second submission cannot change the recorded outcome.
    let replay = bind(
        &fixture.holder,
        &identity(&fixture).issue(&fixture.issuer),
        &request.nonce,
    );
    let err = fixture
        .verifier
        .process_response(
            request.id,
            response(json!(replay), Some(submission(&presentation_definition()))),
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::VerificationProcessClosed));
    assert_eq!(err.error_type, ErrorType::VerificationProcessClosed);
    assert_eq!(
        fixture.verifier.poll_status(request.id).await.unwrap(),
        Status::Complete(outcome)
    );
}

#[tokio::test]
async fn failures_are_recorded_before_they_are_returned() {
    let fixture = Fixture::new();
    let request = request(&fixture).await;

    let presentation = bind(
        &fixture.holder,
        &identity(&fixture).issue(&fixture.issuer),
        "another nonce",
    );
    let err = fixture
        .verifier
        .process_response(
            request.id,
            response(json!(presentation), Some(submission(&presentation_definition()))),
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::MissingNonce));

    assert_eq!(
        fixture.verifier.poll_status(request.id).await.unwrap(),
        Status::Complete(Outcome::Failure { error: err })
    );
}

#[tokio::test]
async fn missing_fields_violate_constraints() {
    let fixture = Fixture::new();
    let request = request(&fixture).await;

    let credential = fixture
        .credential()
        .disclose("first_name", json!("Erika"))
        .disclose("last_name", json!("Mustermann"))
        .conceal("birthdate", json!("1963-08-12"));
    let presentation = bind(
        &fixture.holder,
        &credential.issue(&fixture.issuer),
        &request.nonce,
    );

    let err = fixture
        .verifier
        .process_response(
            request.id,
            response(json!(presentation), Some(submission(&presentation_definition()))),
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::PresentationSubmissionConstraintViolated));
}

#[tokio::test]
async fn submission_is_required_with_presentation_definition() {
    let fixture = Fixture::new();
    let request = request(&fixture).await;

    let presentation = bind(
        &fixture.holder,
        &identity(&fixture).issue(&fixture.issuer),
        &request.nonce,
    );
    let err = fixture
        .verifier
        .process_response(request.id, response(json!(presentation), None))
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::InvalidPresentationSubmission));
}

#[tokio::test]
async fn malformed_submission_fails_the_request() {
    let fixture = Fixture::new();
    let request = request(&fixture).await;

    let presentation = bind(
        &fixture.holder,
        &identity(&fixture).issue(&fixture.issuer),
        &request.nonce,
    );
    let err = fixture
        .verifier
        .process_response(
            request.id,
            response(json!(presentation), Some(json!("{not json"))),
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::InvalidPresentationSubmission));

    assert_eq!(
        fixture.verifier.poll_status(request.id).await.unwrap(),
        Status::Complete(Outcome::Failure { error: err })
    );
}

#[tokio::test]
async fn unrequested_format_is_unsupported() {
    let fixture = Fixture::new();
    let request = request(&fixture).await;

    let presentation = bind(
        &fixture.holder,
        &identity(&fixture)
            .header("typ", json!("dc+sd-jwt"))
            .issue(&fixture.issuer),
        &request.nonce,
    );
    let submission = json!({
        "id": "submission",
        "definition_id": "identity-check",
        "descriptor_map": [
            {"id": "identity_credential", "format": "dc+sd-jwt", "path": "$"}
        ]
    });
    let err = fixture
        .verifier
        .process_response(request.id, response(json!(presentation), Some(submission)))
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::UnsupportedFormat));
}

#[tokio::test]
async fn wallet_rejection_is_recorded() {
    let fixture = Fixture::new();
    let request = request(&fixture).await;

    let params: Map<String, Json> = serde_json::from_value(json!({
        "error": "access_denied",
        "error_description": "the user declined"
    }))
    .unwrap();
    let outcome = fixture
        .verifier
        .process_response(request.id, AuthorizationResponse::from_params(params).unwrap())
        .await
        .unwrap();

    let Outcome::Failure { error } = &outcome else {
        panic!("unexpected outcome: {outcome:?}")
    };
    assert!(error.is(ErrorCode::ClientRejected));
    assert_eq!(error.error_type, ErrorType::ClientRejected);
    assert_eq!(error.description, "access_denied: the user declined");
    assert_eq!(
        fixture.verifier.poll_status(request.id).await.unwrap(),
        Status::Complete(outcome)
    );
}

#[tokio::test]
async fn response_without_token_or_error_changes_nothing() {
    let fixture = Fixture::new();
    let request = request(&fixture).await;

    let err = AuthorizationResponse::from_params(Map::new()).unwrap_err();
    assert!(err.is(ErrorCode::AuthorizationRequestMissingErrorParam));
    assert_eq!(
        fixture.verifier.poll_status(request.id).await.unwrap(),
        Status::Pending
    );
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let fixture = Fixture::new();
    let err = fixture
        .verifier
        .process_response(Uuid::new_v4(), response(json!("a.b.c~"), None))
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::AuthorizationRequestObjectNotFound));
    assert_eq!(err.error_type, ErrorType::AuthorizationRequestObjectNotFound);
}

#[tokio::test]
async fn expired_requests_are_closed_and_swept() {
    let fixture = Fixture::new();
    let request = fixture
        .verifier
        .build_verification_request()
        .with_presentation_definition(presentation_definition())
        .with_ttl(Duration::from_millis(1))
        .build()
        .await
        .unwrap();
    std::thread::sleep(Duration::from_millis(10));

    assert_eq!(
        fixture.verifier.poll_status(request.id).await.unwrap(),
        Status::Expired
    );

    let presentation = bind(
        &fixture.holder,
        &identity(&fixture).issue(&fixture.issuer),
        &request.nonce,
    );
    let err = fixture
        .verifier
        .process_response(
            request.id,
            response(json!(presentation), Some(submission(&presentation_definition()))),
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::VerificationProcessClosed));
    assert_eq!(
        fixture.verifier.poll_status(request.id).await.unwrap(),
        Status::Expired
    );

    assert_eq!(
        fixture
            .verifier
            .sweep_expired(chrono::Utc::now())
            .await
            .unwrap(),
        1
    );
    let err = fixture.verifier.poll_status(request.id).await.unwrap_err();
    assert!(err.is(ErrorCode::AuthorizationRequestObjectNotFound));
}

#[tokio::test]
async fn invalid_requests_report_every_field() {
    let fixture = Fixture::new();
    let definition: PresentationDefinition = serde_json::from_value(json!({
        "id": "",
        "input_descriptors": [
            {
                "id": "identity_credential",
                "format": {"jwt_vc_json": {}},
                "constraints": {}
            }
        ]
    }))
    .unwrap();

    let err = fixture
        .verifier
        .build_verification_request()
        .with_presentation_definition(definition)
        .with_trust_anchor(TrustAnchor::new(" ", None))
        .build()
        .await
        .unwrap_err();

    let err = err.downcast_ref::<RequestValidationError>().unwrap();
    let fields: Vec<&str> = err.errors.iter().map(|e| e.field.as_str()).collect();
    assert!(fields.contains(&"presentation_definition.id"), "{fields:?}");
    assert!(fields.contains(&"trust_anchors[0].did"), "{fields:?}");
    assert!(
        fields
            .iter()
            .any(|f| f.starts_with("presentation_definition.input_descriptors[0].format")),
        "{fields:?}"
    );

    let err = fixture
        .verifier
        .build_verification_request()
        .build()
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<RequestValidationError>().is_some());
}

fn dcql_query(query: Json) -> DcqlQuery {
    serde_json::from_value(query).unwrap()
}

async fn dcql_request(fixture: &Fixture, query: Json) -> VerificationRequest {
    fixture
        .verifier
        .build_verification_request()
        .with_dcql_query(dcql_query(query))
        .with_accepted_issuer(ISSUER)
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn sd_jwt_dcql_query() {
    let fixture = Fixture::new();
    let request = dcql_request(
        &fixture,
        json!({
            "credentials": [
                {
                    "id": "identity",
                    "format": "dc+sd-jwt",
                    "meta": {"vct_values": [VCT]},
                    "claims": [
                        {"path": ["first_name"]},
                        {"path": ["address", "country"], "values": ["DE", "AT"]},
                        {"path": ["degrees", null, "type"]}
                    ]
                }
            ]
        }),
    )
    .await;

    let credential = fixture
        .credential()
        .header("typ", json!("dc+sd-jwt"))
        .disclose("first_name", json!("Erika"))
        .disclose("address", json!({"street": "Heidestraße 17", "country": "DE"}))
        .disclose("degrees", json!([{"type": "BSc"}, {"type": "MSc"}]));
    let presentation = bind(
        &fixture.holder,
        &credential.issue(&fixture.issuer),
        &request.nonce,
    );

    let outcome = fixture
        .verifier
        .process_response(request.id, response(json!({"identity": presentation}), None))
        .await
        .unwrap();

    let Outcome::Success { credentials } = outcome else {
        panic!("unexpected outcome: {outcome:?}")
    };
    assert_eq!(credentials["identity"][0]["first_name"], "Erika");
    assert_eq!(credentials["identity"][0]["address"]["country"], "DE");
}

#[tokio::test]
async fn dcql_values_must_match() {
    let fixture = Fixture::new();
    let request = dcql_request(
        &fixture,
        json!({
            "credentials": [
                {
                    "id": "identity",
                    "format": "vc+sd-jwt",
                    "claims": [{"path": ["nationality"], "values": ["FR"]}]
                }
            ]
        }),
    )
    .await;

    let presentation = bind(
        &fixture.holder,
        &fixture
            .credential()
            .disclose("nationality", json!("DE"))
            .issue(&fixture.issuer),
        &request.nonce,
    );
    let err = fixture
        .verifier
        .process_response(request.id, response(json!({"identity": presentation}), None))
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::PresentationSubmissionConstraintViolated));
}

#[tokio::test]
async fn dcql_requires_holder_binding_by_default() {
    let fixture = Fixture::new();
    let request = dcql_request(
        &fixture,
        json!({"credentials": [{"id": "identity", "format": "vc+sd-jwt"}]}),
    )
    .await;

    let presentation = SdJwtBuilder::new(ISSUER, ISSUER_KID, VCT)
        .disclose("first_name", json!("Erika"))
        .issue(&fixture.issuer);
    let err = fixture
        .verifier
        .process_response(request.id, response(json!({"identity": presentation}), None))
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::HolderBindingMismatch));
}

#[tokio::test]
async fn dcql_missing_credential() {
    let fixture = Fixture::new();
    let request = dcql_request(
        &fixture,
        json!({
            "credentials": [
                {"id": "identity", "format": "vc+sd-jwt", "require_cryptographic_holder_binding": false},
                {"id": "diploma", "format": "vc+sd-jwt", "require_cryptographic_holder_binding": false}
            ]
        }),
    )
    .await;

    let presentation = SdJwtBuilder::new(ISSUER, ISSUER_KID, VCT)
        .disclose("first_name", json!("Erika"))
        .issue(&fixture.issuer);
    let err = fixture
        .verifier
        .process_response(request.id, response(json!({"identity": presentation}), None))
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::CredentialMissingData));
}

#[tokio::test]
async fn dcql_credential_sets_allow_alternatives() {
    let fixture = Fixture::new();
    let request = dcql_request(
        &fixture,
        json!({
            "credentials": [
                {"id": "identity", "format": "vc+sd-jwt", "require_cryptographic_holder_binding": false},
                {"id": "passport", "format": "vc+sd-jwt", "require_cryptographic_holder_binding": false}
            ],
            "credential_sets": [
                {"options": [["passport"], ["identity"]]}
            ]
        }),
    )
    .await;

    let presentation = SdJwtBuilder::new(ISSUER, ISSUER_KID, VCT)
        .disclose("first_name", json!("Erika"))
        .issue(&fixture.issuer);
    let outcome = fixture
        .verifier
        .process_response(request.id, response(json!({"identity": [presentation]}), None))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Success { .. }));
}
