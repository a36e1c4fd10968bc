// Copyright (c), lang2fhir-agent contributors
// SPDX-License-Identifier: Apache-2.0

// Shared domain and wire types for the orchestration layer. FHIR payloads
// stay as serde_json::Value: this layer decides and routes, it does not
// model FHIR.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AgentError;

/// Supported EMR backend flavors. Adding a provider means adding a variant
/// here plus the session constructor and the adapter's provider match
/// sites, never a string tag check inside the orchestration logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmrProvider {
    Medplum,
    Canvas,
    /// Any other plain FHIR R4 endpoint.
    #[serde(rename = "fhir")]
    GenericFhir,
}

/// One backend EMR session: provider flavor, bearer token, resolved base
/// URL. Built fresh per orchestration call from caller-supplied
/// credentials; the core never reads the process environment and never
/// caches a session.
#[derive(Debug, Clone)]
pub struct EmrSession {
    pub provider: EmrProvider,
    pub token: String,
    base_url: String,
}

impl EmrSession {
    pub const MEDPLUM_DEFAULT_BASE: &'static str = "https://api.medplum.com";

    /// Medplum session. `base_url` overrides the hosted api.medplum.com
    /// for self-hosted deployments; the FHIR R4 root is appended either
    /// way.
    pub fn medplum(token: impl Into<String>, base_url: Option<&str>) -> Self {
        let base = base_url
            .unwrap_or(Self::MEDPLUM_DEFAULT_BASE)
            .trim_end_matches('/');
        Self {
            provider: EmrProvider::Medplum,
            token: token.into(),
            base_url: format!("{base}/fhir/R4"),
        }
    }

    /// Canvas session for a named instance, routed through the fumage
    /// FHIR gateway.
    pub fn canvas(token: impl Into<String>, instance: &str) -> Self {
        Self {
            provider: EmrProvider::Canvas,
            token: token.into(),
            base_url: format!("https://fumage-{instance}.canvasmedical.com"),
        }
    }

    /// Session against any other FHIR R4 endpoint, used verbatim.
    pub fn generic(token: impl Into<String>, base_url: &str) -> Self {
        Self {
            provider: EmrProvider::GenericFhir,
            token: token.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint for one resource type, e.g. `{base}/Condition`.
    pub fn resource_url(&self, resource_type: &str) -> String {
        format!("{}/{}", self.base_url, resource_type)
    }
}

/// Structured output of the lang2fhir create operation: one FHIR resource
/// plus the type it declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedResource {
    pub resource_type: String,
    pub body: Value,
}

impl TranslatedResource {
    /// Wrap a raw translated body. The service must have declared a
    /// `resourceType`; anything else is malformed translation output.
    pub fn from_value(body: Value) -> Result<Self, AgentError> {
        let resource_type = body
            .get("resourceType")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AgentError::Translation {
                status: None,
                message: "translated resource has no resourceType".to_string(),
            })?
            .to_string();
        Ok(Self {
            resource_type,
            body,
        })
    }
}

/// Output of the lang2fhir search operation: target resource type plus an
/// ordered list of query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDirective {
    pub resource_type: String,
    pub params: Vec<(String, String)>,
}

impl SearchDirective {
    /// Parse the service's `searchParams` query-string form ("a=b&c=d").
    /// The resource type is mandatory; parameters may repeat and keep
    /// their order.
    pub fn parse(resource_type: &str, raw_params: &str) -> Result<Self, AgentError> {
        if resource_type.is_empty() {
            return Err(AgentError::Translation {
                status: None,
                message: "search directive has no resourceType".to_string(),
            });
        }
        let params = raw_params
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (part.to_string(), String::new()),
            })
            .collect();
        Ok(Self {
            resource_type: resource_type.to_string(),
            params,
        })
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|(n, _)| n.as_str() == name)
    }

    /// Reassemble the parameters in order, mainly for logging and tests;
    /// outbound requests go through the HTTP client's own query encoding.
    pub fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// A resolved patient binding: the system-specific id plus a display name
/// when one is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientReference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl PatientReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display: None,
        }
    }

    pub fn with_display(id: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display: Some(display.into()),
        }
    }

    /// The literal FHIR reference string, `Patient/{id}`.
    pub fn fhir_reference(&self) -> String {
        format!("Patient/{}", self.id)
    }
}

/// Caller-supplied context, typically carried across conversation turns.
/// At most one patient is resolved per orchestration call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextHints {
    /// A reference resolved on a previous turn, passed back in verbatim.
    pub patient: Option<PatientReference>,
    /// A business identifier (e.g. MRN) to look the patient up by.
    pub patient_identifier: Option<String>,
    /// A free-text name to look the patient up by.
    pub patient_name: Option<String>,
    /// Practitioner to attach to appointments.
    pub practitioner_id: Option<String>,
    /// Location to attach to appointments (required by Canvas).
    pub location_id: Option<String>,
}

/// Normalized success shape for both backends: the stored or matched
/// resource with its server-assigned id when one is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedResource {
    pub resource_type: String,
    pub id: Option<String>,
    pub body: Value,
}

impl PersistedResource {
    /// Pull `resourceType` and `id` out of a raw resource body.
    pub fn from_body(body: Value) -> Self {
        let resource_type = body
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            resource_type,
            id,
            body,
        }
    }
}

/// Final outcome of one orchestration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrchestrationResult {
    Created {
        resource: PersistedResource,
    },
    Found {
        resource_type: String,
        resources: Vec<PersistedResource>,
    },
}

/// Per-request credentials for the translation service.
#[derive(Debug, Clone, Deserialize)]
pub struct Lang2FhirCredentials {
    pub token: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Caller-supplied description of the EMR backend to run against.
#[derive(Debug, Clone, Deserialize)]
pub struct EmrCredentials {
    pub provider: EmrProvider,
    pub token: String,
    /// Base URL for medplum overrides and generic FHIR endpoints.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Canvas instance identifier, e.g. the `xyz` of fumage-xyz.
    #[serde(default)]
    pub instance: Option<String>,
}

impl EmrCredentials {
    /// Build the per-call session, rejecting incomplete descriptions
    /// before anything goes on the wire.
    pub fn into_session(self) -> Result<EmrSession, AgentError> {
        match self.provider {
            EmrProvider::Medplum => Ok(EmrSession::medplum(self.token, self.base_url.as_deref())),
            EmrProvider::Canvas => {
                let instance = self.instance.ok_or_else(|| {
                    AgentError::InvalidRequest(
                        "canvas sessions need an instance identifier".to_string(),
                    )
                })?;
                Ok(EmrSession::canvas(self.token, &instance))
            }
            EmrProvider::GenericFhir => {
                let base_url = self.base_url.ok_or_else(|| {
                    AgentError::InvalidRequest("generic FHIR sessions need a base_url".to_string())
                })?;
                Ok(EmrSession::generic(self.token, &base_url))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_medplum_session_urls() {
        let session = EmrSession::medplum("tok", None);
        assert_eq!(session.base_url(), "https://api.medplum.com/fhir/R4");
        assert_eq!(
            session.resource_url("Condition"),
            "https://api.medplum.com/fhir/R4/Condition"
        );

        let hosted = EmrSession::medplum("tok", Some("https://emr.example.org/"));
        assert_eq!(hosted.base_url(), "https://emr.example.org/fhir/R4");
    }

    #[test]
    fn test_canvas_session_url() {
        let session = EmrSession::canvas("tok", "acme");
        assert_eq!(
            session.base_url(),
            "https://fumage-acme.canvasmedical.com"
        );
        assert_eq!(session.provider, EmrProvider::Canvas);
    }

    #[test]
    fn test_generic_session_trims_slash() {
        let session = EmrSession::generic("tok", "http://hapi.local/fhir/");
        assert_eq!(session.base_url(), "http://hapi.local/fhir");
    }

    #[test]
    fn test_translated_resource_requires_type() {
        let ok = TranslatedResource::from_value(json!({"resourceType": "Condition"})).unwrap();
        assert_eq!(ok.resource_type, "Condition");

        let missing = TranslatedResource::from_value(json!({"code": {}}));
        assert!(matches!(
            missing,
            Err(AgentError::Translation { status: None, .. })
        ));
    }

    #[test]
    fn test_search_directive_parse_keeps_order_and_repeats() {
        let directive =
            SearchDirective::parse("Appointment", "date=ge2025-03-02&date=le2025-03-09&status=")
                .unwrap();
        assert_eq!(directive.resource_type, "Appointment");
        assert_eq!(
            directive.params,
            vec![
                ("date".to_string(), "ge2025-03-02".to_string()),
                ("date".to_string(), "le2025-03-09".to_string()),
                ("status".to_string(), String::new()),
            ]
        );
        assert_eq!(
            directive.query_string(),
            "date=ge2025-03-02&date=le2025-03-09&status="
        );
    }

    #[test]
    fn test_search_directive_rejects_missing_type() {
        assert!(matches!(
            SearchDirective::parse("", "name=smith"),
            Err(AgentError::Translation { .. })
        ));
    }

    #[test]
    fn test_patient_reference_format() {
        let patient = PatientReference::with_display("pt-123", "Mark Scout");
        assert_eq!(patient.fhir_reference(), "Patient/pt-123");
        assert_eq!(patient.display.as_deref(), Some("Mark Scout"));
    }

    #[test]
    fn test_emr_credentials_validation() {
        let canvas = EmrCredentials {
            provider: EmrProvider::Canvas,
            token: "tok".to_string(),
            base_url: None,
            instance: None,
        };
        assert!(matches!(
            canvas.into_session(),
            Err(AgentError::InvalidRequest(_))
        ));

        let generic = EmrCredentials {
            provider: EmrProvider::GenericFhir,
            token: "tok".to_string(),
            base_url: None,
            instance: None,
        };
        assert!(matches!(
            generic.into_session(),
            Err(AgentError::InvalidRequest(_))
        ));

        let medplum = EmrCredentials {
            provider: EmrProvider::Medplum,
            token: "tok".to_string(),
            base_url: None,
            instance: None,
        };
        assert!(medplum.into_session().is_ok());
    }

    #[test]
    fn test_persisted_resource_from_body() {
        let resource = PersistedResource::from_body(json!({
            "resourceType": "Patient",
            "id": "pt-1",
            "name": [{"family": "Scout"}],
        }));
        assert_eq!(resource.resource_type, "Patient");
        assert_eq!(resource.id.as_deref(), Some("pt-1"));
    }
}
