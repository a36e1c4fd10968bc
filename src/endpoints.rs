use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::lang2fhir::{Lang2FhirClient, Lang2FhirConfig};
use crate::orchestrator::{AgentRequest, Orchestrator};
use crate::types::{EmrCredentials, Lang2FhirCredentials, OrchestrationResult};
use crate::AgentError;

/// Full body for `POST /agent`: the orchestration request plus the
/// per-call credentials it runs under. Credentials arrive with the
/// request and die with it; the server keeps none.
#[derive(Debug, Deserialize)]
pub struct AgentEnvelope {
    #[serde(flatten)]
    pub request: AgentRequest,
    pub lang2fhir: Lang2FhirCredentials,
    pub emr: EmrCredentials,
}

/// One natural-language request, one result.
pub async fn handle_agent(
    Json(envelope): Json<AgentEnvelope>,
) -> Result<Json<OrchestrationResult>, AgentError> {
    let session = envelope.emr.into_session()?;
    let config = match envelope.lang2fhir.base_url.as_deref() {
        Some(base_url) => Lang2FhirConfig::with_base_url(envelope.lang2fhir.token, base_url),
        None => Lang2FhirConfig::new(envelope.lang2fhir.token),
    };

    let orchestrator = Orchestrator::new(Lang2FhirClient::new(config));
    let result = orchestrator.handle(&envelope.request, &session).await?;
    Ok(Json(result))
}

/// Liveness probe.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Router for the agent surface. CORS is wide open because the chat
/// frontend is served from another origin.
pub fn router() -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    info!("agent router ready");
    Router::new()
        .route("/healthz", get(healthz))
        .route("/agent", post(handle_agent))
        .layer(cors)
}
