// Copyright (c), lang2fhir-agent contributors
// SPDX-License-Identifier: Apache-2.0

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde_json::json;

use crate::types::PatientReference;

pub mod context;
pub mod emr;
pub mod endpoints;
pub mod lang2fhir;
pub mod orchestrator;
pub mod profiles;
pub mod types;

pub use emr::EmrClient;
pub use lang2fhir::{Lang2FhirClient, Lang2FhirConfig};
pub use orchestrator::{AgentRequest, Operation, Orchestrator};
pub use types::{EmrProvider, EmrSession, OrchestrationResult};

/// Failures surfaced by the orchestration core. Every variant carries the
/// originating upstream detail verbatim; the core performs no retries and
/// no local recovery.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The translation service rejected the request or returned output the
    /// core could not use. `status` is the upstream HTTP status when one
    /// was received.
    #[error("lang2fhir translation failed: {message}")]
    Translation {
        status: Option<u16>,
        message: String,
    },

    /// The EMR backend answered with a non-success status.
    #[error("EMR rejected the request ({status}): {body}")]
    BackendRejected { status: u16, body: String },

    /// The EMR backend could not be reached.
    #[error("EMR unreachable: {0}")]
    BackendUnavailable(String),

    /// A patient reference is required and none could be resolved.
    #[error("no patient could be resolved: {0}")]
    PatientNotResolved(String),

    /// More than one patient matched equally well. The core never picks
    /// one; the caller must disambiguate.
    #[error("{} patients match the given context", candidates.len())]
    AmbiguousPatient { candidates: Vec<PatientReference> },

    /// The resource type has no entry in the patient-scoping table.
    #[error("unsupported resource type: {0}")]
    UnsupportedResourceType(String),

    /// The request was rejected before any outbound call was made.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Type alias for Results that can fail with an [`AgentError`].
pub type AgentResult<T> = Result<T, AgentError>;

impl AgentError {
    /// Stable machine-readable tag, used in the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Translation { .. } => "translation_error",
            AgentError::BackendRejected { .. } => "backend_rejected",
            AgentError::BackendUnavailable(_) => "backend_unavailable",
            AgentError::PatientNotResolved(_) => "patient_not_resolved",
            AgentError::AmbiguousPatient { .. } => "ambiguous_patient",
            AgentError::UnsupportedResourceType(_) => "unsupported_resource_type",
            AgentError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Implement IntoResponse for AgentError so handlers can return
/// `Result<Json<T>, AgentError>` directly.
impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = match &self {
            AgentError::Translation { .. } => StatusCode::BAD_GATEWAY,
            AgentError::BackendRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AgentError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::PatientNotResolved(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AgentError::AmbiguousPatient { .. } => StatusCode::CONFLICT,
            AgentError::UnsupportedResourceType(_) => StatusCode::BAD_REQUEST,
            AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };

        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        match &self {
            AgentError::Translation {
                status: Some(upstream),
                ..
            } => {
                error["upstream_status"] = json!(upstream);
            }
            AgentError::BackendRejected { status, .. } => {
                error["upstream_status"] = json!(status);
            }
            AgentError::AmbiguousPatient { candidates } => {
                error["candidates"] = json!(candidates);
            }
            _ => {}
        }

        let body = Json(json!({ "error": error }));
        (status, body).into_response()
    }
}
