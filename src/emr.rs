// Copyright (c), lang2fhir-agent contributors
// SPDX-License-Identifier: Apache-2.0

// EMR adapter: one create/search/find-patient contract over Medplum,
// Canvas, and plain FHIR endpoints. Provider differences are confined to
// the session constructors, the Accept header, and create-envelope
// handling.

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{
    EmrProvider, EmrSession, PatientReference, PersistedResource, SearchDirective,
};
use crate::{AgentError, AgentResult};

/// One server page per query; the adapter never follows bundle links.
const PAGE_SIZE: &str = "250";

/// Identifying attributes for a patient lookup. An identifier match takes
/// precedence over a name-only match.
#[derive(Debug, Clone, Default)]
pub struct PatientQuery {
    pub identifier: Option<String>,
    pub name: Option<String>,
}

/// Stateless adapter over the FHIR REST surface of all backend flavors.
/// Every call takes the session it runs under; nothing provider-specific
/// is kept on the client.
pub struct EmrClient {
    client: reqwest::Client,
}

impl EmrClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a resource via `POST {base}/{ResourceType}`. The payload's
    /// own `resourceType` must agree with the argument; the backend owns
    /// all further validation.
    pub async fn create(
        &self,
        resource_type: &str,
        payload: &Value,
        session: &EmrSession,
    ) -> AgentResult<PersistedResource> {
        let declared = payload.get("resourceType").and_then(Value::as_str);
        if declared != Some(resource_type) {
            return Err(AgentError::InvalidRequest(format!(
                "payload declares resourceType {declared:?}, expected {resource_type}"
            )));
        }

        let url = session.resource_url(resource_type);
        info!(resource_type, provider = ?session.provider, "EMR create");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", session.token))
            .header("Content-Type", "application/json")
            .header("Accept", accept_header(session.provider))
            .json(payload)
            .send()
            .await
            .map_err(|e| AgentError::BackendUnavailable(format!("create {resource_type}: {e}")))?;

        // Capture status and Location before consuming the body; Canvas
        // answers 201 with an empty body and the new id in Location.
        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::BackendUnavailable(format!("create {resource_type}: {e}")))?;

        if !status.is_success() {
            return Err(AgentError::BackendRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            let id = location.as_deref().and_then(|l| id_from_location(l, resource_type));
            let body = match &id {
                Some(id) => serde_json::json!({ "resourceType": resource_type, "id": id }),
                None => serde_json::json!({ "resourceType": resource_type }),
            };
            return Ok(PersistedResource {
                resource_type: resource_type.to_string(),
                id,
                body,
            });
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| AgentError::BackendRejected {
            status: status.as_u16(),
            body: format!("create succeeded but the response was not valid JSON: {e}"),
        })?;
        Ok(PersistedResource::from_body(body))
    }

    /// Run one server-side query and unwrap the searchset bundle. Exactly
    /// one page is fetched; an empty result is not an error.
    pub async fn search(
        &self,
        resource_type: &str,
        params: &[(String, String)],
        session: &EmrSession,
    ) -> AgentResult<Vec<PersistedResource>> {
        let url = session.resource_url(resource_type);
        info!(resource_type, provider = ?session.provider, params = params.len(), "EMR search");

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("_count", PAGE_SIZE)])
            .header("Authorization", format!("Bearer {}", session.token))
            .header("Accept", accept_header(session.provider))
            .send()
            .await
            .map_err(|e| AgentError::BackendUnavailable(format!("search {resource_type}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::BackendUnavailable(format!("search {resource_type}: {e}")))?;

        if !status.is_success() {
            return Err(AgentError::BackendRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let bundle: Value = serde_json::from_str(&text).map_err(|e| AgentError::BackendRejected {
            status: status.as_u16(),
            body: format!("search succeeded but the response was not valid JSON: {e}"),
        })?;
        Ok(bundle_entries(bundle))
    }

    /// Locate a patient from identifying attributes. An exact identifier
    /// match wins over a name-only match; ties are ambiguous and never
    /// silently resolved.
    pub async fn find_patient(
        &self,
        query: &PatientQuery,
        session: &EmrSession,
    ) -> AgentResult<Option<PatientReference>> {
        if let Some(identifier) = &query.identifier {
            let matches = self
                .search(
                    "Patient",
                    &[("identifier".to_string(), identifier.clone())],
                    session,
                )
                .await?;
            if let Some(patient) = select_patient(&matches)? {
                return Ok(Some(patient));
            }
            warn!(%identifier, "no patient with identifier, trying name");
        }

        if let Some(name) = &query.name {
            let matches = self
                .search("Patient", &[("name".to_string(), name.clone())], session)
                .await?;
            if let Some(patient) = select_patient(&matches)? {
                info!(patient = %patient.id, "patient resolved by name");
                return Ok(Some(patient));
            }
        }

        Ok(None)
    }
}

impl Default for EmrClient {
    fn default() -> Self {
        Self::new()
    }
}

/// The one header the providers disagree on: Canvas' fumage gateway wants
/// plain JSON, Medplum and stock FHIR servers speak fhir+json.
fn accept_header(provider: EmrProvider) -> &'static str {
    match provider {
        EmrProvider::Canvas => "application/json",
        EmrProvider::Medplum | EmrProvider::GenericFhir => "application/fhir+json",
    }
}

/// Unwrap a searchset bundle into the normalized resource shape. A bare
/// resource is passed through as a single entry.
pub fn bundle_entries(bundle: Value) -> Vec<PersistedResource> {
    match bundle.get("entry").and_then(Value::as_array) {
        Some(entries) => entries
            .iter()
            .filter_map(|entry| entry.get("resource"))
            .cloned()
            .map(PersistedResource::from_body)
            .collect(),
        None if bundle.get("resourceType").and_then(Value::as_str) == Some("Bundle") => Vec::new(),
        None => vec![PersistedResource::from_body(bundle)],
    }
}

/// Pull the new resource id out of a Location header, tolerating a
/// trailing `/_history/{vid}` segment.
fn id_from_location(location: &str, resource_type: &str) -> Option<String> {
    let mut segments: Vec<&str> = location
        .trim_end_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if let Some(pos) = segments.iter().position(|s| *s == "_history") {
        segments.truncate(pos);
    }
    match segments.as_slice() {
        [.., parent, id] if *parent == resource_type => Some((*id).to_string()),
        _ => None,
    }
}

fn select_patient(matches: &[PersistedResource]) -> AgentResult<Option<PatientReference>> {
    match matches {
        [] => Ok(None),
        [only] => Ok(Some(patient_reference(only))),
        many => Err(AgentError::AmbiguousPatient {
            candidates: many.iter().map(patient_reference).collect(),
        }),
    }
}

fn patient_reference(resource: &PersistedResource) -> PatientReference {
    PatientReference {
        id: resource.id.clone().unwrap_or_default(),
        display: display_name(&resource.body),
    }
}

/// Human-readable name from a Patient resource, preferring the first
/// name's `text` rendering.
fn display_name(body: &Value) -> Option<String> {
    let name = body.get("name")?.get(0)?;
    if let Some(text) = name.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let given = name
        .get("given")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let family = name.get("family").and_then(Value::as_str).unwrap_or_default();
    let full = format!("{given} {family}");
    let full = full.trim();
    if full.is_empty() {
        None
    } else {
        Some(full.to_string())
    }
}

/// Parameter names that take a resource reference, with the type a bare id
/// gets prefixed with.
const REFERENCE_PARAMS: &[(&str, &str)] = &[
    ("patient", "Patient"),
    ("subject", "Patient"),
    ("practitioner", "Practitioner"),
    ("actor", "Practitioner"),
    ("provider", "Practitioner"),
    ("schedule", "Schedule"),
    ("encounter", "Encounter"),
    ("organization", "Organization"),
    ("location", "Location"),
    ("slot", "Slot"),
    ("appointment", "Appointment"),
];

/// Rewrite translated search parameters into the form FHIR servers expect:
/// bare resource ids in reference parameters become `Type/id`, and Slot
/// status `available` becomes the FHIR-defined `free`.
pub fn normalize_directive(directive: &mut SearchDirective) {
    let slot = directive.resource_type == "Slot";
    for (name, value) in directive.params.iter_mut() {
        if slot && name.as_str() == "status" && value.as_str() == "available" {
            *value = "free".to_string();
            continue;
        }
        if value.contains('/') || !looks_like_id(value) {
            continue;
        }
        if let Some((_, target)) = REFERENCE_PARAMS
            .iter()
            .find(|(param, _)| *param == name.as_str())
        {
            *value = format!("{target}/{value}");
        }
    }
}

/// Bare resource ids are UUID-shaped on both Medplum and Canvas (Canvas
/// uses the 32-hex form without hyphens, which also parses).
fn looks_like_id(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}
