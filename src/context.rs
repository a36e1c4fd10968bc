// Copyright (c), lang2fhir-agent contributors
// SPDX-License-Identifier: Apache-2.0

// Patient context resolution: decide whether a translated resource or a
// search directive needs a patient reference, find the patient, and
// inject the reference. Re-running on already-complete input is a no-op.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::emr::{EmrClient, PatientQuery};
use crate::profiles::{PatientScoping, PROFILES};
use crate::types::{
    ContextHints, EmrProvider, EmrSession, PatientReference, SearchDirective, TranslatedResource,
};
use crate::{AgentError, AgentResult};

/// Complete a translated resource: inject the patient reference its type
/// requires, or return it unchanged when none is needed.
pub async fn resolve_resource(
    mut resource: TranslatedResource,
    hints: &ContextHints,
    emr: &EmrClient,
    session: &EmrSession,
) -> AgentResult<TranslatedResource> {
    let scoping = scoping_for(&resource.resource_type)?;
    if scoping == PatientScoping::None {
        return Ok(resource);
    }
    if has_patient_reference(&resource.body, scoping) {
        return Ok(resource);
    }

    let patient = resolve_patient(hints, emr, session, &resource.resource_type).await?;
    info!(patient = %patient.id, resource_type = %resource.resource_type, "injecting patient reference");
    inject_reference(&mut resource.body, scoping, &patient, hints, session.provider);
    Ok(resource)
}

/// Scope a search directive to a patient when its resource type requires
/// one. Directives that already carry a patient parameter pass through.
pub async fn resolve_directive(
    mut directive: SearchDirective,
    hints: &ContextHints,
    emr: &EmrClient,
    session: &EmrSession,
) -> AgentResult<SearchDirective> {
    let scoping = scoping_for(&directive.resource_type)?;
    if scoping == PatientScoping::None {
        return Ok(directive);
    }
    if directive.has_param("patient") || directive.has_param("subject") {
        return Ok(directive);
    }

    let patient = resolve_patient(hints, emr, session, &directive.resource_type).await?;
    info!(patient = %patient.id, resource_type = %directive.resource_type, "scoping search to patient");
    directive
        .params
        .push(("patient".to_string(), patient.fhir_reference()));
    Ok(directive)
}

fn scoping_for(resource_type: &str) -> AgentResult<PatientScoping> {
    PROFILES
        .scoping(resource_type)
        .ok_or_else(|| AgentError::UnsupportedResourceType(resource_type.to_string()))
}

/// Hint precedence is deterministic: a reference carried from a previous
/// turn is used as-is; otherwise identifier and name go through the EMR's
/// patient lookup, identifier first.
async fn resolve_patient(
    hints: &ContextHints,
    emr: &EmrClient,
    session: &EmrSession,
    wanted_for: &str,
) -> AgentResult<PatientReference> {
    if let Some(patient) = &hints.patient {
        return Ok(patient.clone());
    }

    if hints.patient_identifier.is_none() && hints.patient_name.is_none() {
        return Err(AgentError::PatientNotResolved(format!(
            "{wanted_for} requires a patient and no identifying context was supplied"
        )));
    }

    let query = PatientQuery {
        identifier: hints.patient_identifier.clone(),
        name: hints.patient_name.clone(),
    };
    match emr.find_patient(&query, session).await? {
        Some(patient) => Ok(patient),
        None => Err(AgentError::PatientNotResolved(format!(
            "no patient matched the supplied context for {wanted_for}"
        ))),
    }
}

/// Whether the payload already carries the reference its scoping rule
/// would inject.
fn has_patient_reference(body: &Value, scoping: PatientScoping) -> bool {
    match scoping {
        PatientScoping::Subject => body.pointer("/subject/reference").is_some(),
        PatientScoping::Patient => {
            body.pointer("/patient/reference").is_some()
                || body.pointer("/subject/reference").is_some()
        }
        PatientScoping::Participant => body
            .get("participant")
            .and_then(Value::as_array)
            .map(|participants| {
                participants.iter().any(|p| {
                    p.pointer("/actor/reference")
                        .and_then(Value::as_str)
                        .is_some_and(|r| r.starts_with("Patient/"))
                })
            })
            .unwrap_or(false),
        PatientScoping::None => true,
    }
}

/// Write the resolved reference into the payload in the shape the resource
/// type uses.
fn inject_reference(
    body: &mut Value,
    scoping: PatientScoping,
    patient: &PatientReference,
    hints: &ContextHints,
    provider: EmrProvider,
) {
    match scoping {
        PatientScoping::Subject => {
            body["subject"] = reference_value(patient);
        }
        PatientScoping::Patient => {
            body["subject"] = reference_value(patient);
            body["patient"] = reference_value(patient);
        }
        PatientScoping::Participant => {
            // The translated participant list is unreliable; overwrite it
            // with correctly shaped entries.
            let mut participants = vec![json!({
                "actor": reference_value(patient),
                "status": "accepted",
            })];
            if let Some(practitioner) = &hints.practitioner_id {
                participants.push(json!({
                    "actor": { "reference": format!("Practitioner/{practitioner}") },
                    "status": "accepted",
                }));
            }
            body["participant"] = Value::Array(participants);
            body["status"] = json!("booked");

            // Canvas appointments must name a location.
            if provider == EmrProvider::Canvas {
                match &hints.location_id {
                    Some(location) => {
                        body["supportingInformation"] = json!([
                            { "reference": format!("Location/{location}") }
                        ]);
                    }
                    None => warn!("Canvas appointments need a location hint"),
                }
            }
        }
        PatientScoping::None => {}
    }
}

fn reference_value(patient: &PatientReference) -> Value {
    let mut reference = json!({ "reference": patient.fhir_reference() });
    if let Some(display) = &patient.display {
        reference["display"] = json!(display);
    }
    reference
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::TranslatedResource;
    use serde_json::json;

    fn hints_with_patient(id: &str) -> ContextHints {
        ContextHints {
            patient: Some(PatientReference::new(id)),
            ..Default::default()
        }
    }

    fn condition() -> TranslatedResource {
        TranslatedResource::from_value(json!({
            "resourceType": "Condition",
            "code": { "text": "severe asthma with acute exacerbation" },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_unscoped_resource_passes_through() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);
        let patient = TranslatedResource::from_value(json!({
            "resourceType": "Patient",
            "name": [{"family": "Scout"}],
        }))
        .unwrap();

        let resolved = resolve_resource(patient.clone(), &ContextHints::default(), &emr, &session)
            .await
            .unwrap();
        assert_eq!(resolved, patient);
    }

    #[tokio::test]
    async fn test_subject_injection_from_carried_reference() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);

        let resolved = resolve_resource(condition(), &hints_with_patient("pt-123"), &emr, &session)
            .await
            .unwrap();
        assert_eq!(
            resolved.body.pointer("/subject/reference").unwrap(),
            "Patient/pt-123"
        );
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);
        let hints = hints_with_patient("pt-123");

        let once = resolve_resource(condition(), &hints, &emr, &session)
            .await
            .unwrap();
        let twice = resolve_resource(once.clone(), &hints, &emr, &session)
            .await
            .unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_already_populated_reference_needs_no_hints() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);
        let populated = TranslatedResource::from_value(json!({
            "resourceType": "Condition",
            "subject": { "reference": "Patient/pt-9" },
        }))
        .unwrap();

        let resolved = resolve_resource(populated.clone(), &ContextHints::default(), &emr, &session)
            .await
            .unwrap();
        assert_eq!(resolved, populated);
    }

    #[tokio::test]
    async fn test_scoped_resource_without_context_fails() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);

        let result =
            resolve_resource(condition(), &ContextHints::default(), &emr, &session).await;
        assert!(matches!(result, Err(AgentError::PatientNotResolved(_))));
    }

    #[tokio::test]
    async fn test_unknown_resource_type_is_unsupported() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);
        let mystery = TranslatedResource::from_value(json!({
            "resourceType": "Medication",
        }))
        .unwrap();

        let result =
            resolve_resource(mystery, &hints_with_patient("pt-1"), &emr, &session).await;
        match result {
            Err(AgentError::UnsupportedResourceType(t)) => assert_eq!(t, "Medication"),
            other => panic!("expected UnsupportedResourceType, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_appointment_participants_on_canvas() {
        let emr = EmrClient::new();
        let session = EmrSession::canvas("tok", "acme");
        let hints = ContextHints {
            patient: Some(PatientReference::new("pt-123")),
            practitioner_id: Some("dr-9".to_string()),
            location_id: Some("loc-1".to_string()),
            ..Default::default()
        };
        let appointment = TranslatedResource::from_value(json!({
            "resourceType": "Appointment",
            "description": "Follow-up with Dr. Smith",
        }))
        .unwrap();

        let resolved = resolve_resource(appointment, &hints, &emr, &session)
            .await
            .unwrap();
        let participants = resolved.body["participant"].as_array().unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(
            participants[0].pointer("/actor/reference").unwrap(),
            "Patient/pt-123"
        );
        assert_eq!(
            participants[1].pointer("/actor/reference").unwrap(),
            "Practitioner/dr-9"
        );
        assert_eq!(resolved.body["status"], "booked");
        assert_eq!(
            resolved.body.pointer("/supportingInformation/0/reference").unwrap(),
            "Location/loc-1"
        );
    }

    #[tokio::test]
    async fn test_appointment_on_medplum_has_no_supporting_information() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);
        let hints = ContextHints {
            patient: Some(PatientReference::new("pt-123")),
            location_id: Some("loc-1".to_string()),
            ..Default::default()
        };
        let appointment = TranslatedResource::from_value(json!({
            "resourceType": "Appointment",
        }))
        .unwrap();

        let resolved = resolve_resource(appointment, &hints, &emr, &session)
            .await
            .unwrap();
        assert!(resolved.body.get("supportingInformation").is_none());
    }

    #[tokio::test]
    async fn test_encounter_gets_subject_and_patient() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);
        let encounter = TranslatedResource::from_value(json!({
            "resourceType": "Encounter",
            "status": "finished",
        }))
        .unwrap();

        let resolved = resolve_resource(encounter, &hints_with_patient("pt-5"), &emr, &session)
            .await
            .unwrap();
        assert_eq!(
            resolved.body.pointer("/subject/reference").unwrap(),
            "Patient/pt-5"
        );
        assert_eq!(
            resolved.body.pointer("/patient/reference").unwrap(),
            "Patient/pt-5"
        );
    }

    #[tokio::test]
    async fn test_scoped_directive_without_context_fails() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);
        let directive =
            SearchDirective::parse("Appointment", "date=ge2025-03-02&date=le2025-03-09").unwrap();

        let result =
            resolve_directive(directive, &ContextHints::default(), &emr, &session).await;
        assert!(matches!(result, Err(AgentError::PatientNotResolved(_))));
    }

    #[tokio::test]
    async fn test_scoped_directive_gets_patient_param() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);
        let directive = SearchDirective::parse("Appointment", "date=ge2025-03-02").unwrap();

        let resolved =
            resolve_directive(directive, &hints_with_patient("pt-123"), &emr, &session)
                .await
                .unwrap();
        assert_eq!(
            resolved.params.last().unwrap(),
            &("patient".to_string(), "Patient/pt-123".to_string())
        );

        // Re-running keeps a single patient parameter.
        let again = resolve_directive(resolved.clone(), &hints_with_patient("pt-123"), &emr, &session)
            .await
            .unwrap();
        assert_eq!(again, resolved);
    }

    #[tokio::test]
    async fn test_unscoped_directive_passes_through() {
        let emr = EmrClient::new();
        let session = EmrSession::medplum("tok", None);
        let directive = SearchDirective::parse("Patient", "name=smith").unwrap();

        let resolved = resolve_directive(
            directive.clone(),
            &ContextHints::default(),
            &emr,
            &session,
        )
        .await
        .unwrap();
        assert_eq!(resolved, directive);
    }
}
