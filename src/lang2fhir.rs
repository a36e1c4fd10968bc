// Copyright (c), lang2fhir-agent contributors
// SPDX-License-Identifier: Apache-2.0

// Client for the lang2fhir translation service: natural language in,
// structured FHIR resource or search directive out.

use serde_json::{json, Value};
use tracing::info;

use crate::types::{SearchDirective, TranslatedResource};
use crate::{AgentError, AgentResult};

pub const DEFAULT_BASE_URL: &str = "https://experiment.app.pheno.ml";

/// Connection settings for the translation service.
#[derive(Debug, Clone)]
pub struct Lang2FhirConfig {
    pub token: String,
    pub base_url: String,
}

impl Lang2FhirConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: &str) -> Self {
        Self {
            token: token.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Thin client over the two lang2fhir operations. Each call is exactly one
/// outbound request; nothing is cached, and repeated identical text is not
/// assumed to translate identically.
pub struct Lang2FhirClient {
    client: reqwest::Client,
    config: Lang2FhirConfig,
}

impl Lang2FhirClient {
    pub fn new(config: Lang2FhirConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Convert free text into one structured FHIR resource using the named
    /// profile. The profile list is owned by the service; an unknown
    /// profile surfaces as the service's own rejection.
    pub async fn translate_create(
        &self,
        text: &str,
        profile: &str,
        version: &str,
    ) -> AgentResult<TranslatedResource> {
        if text.trim().is_empty() {
            return Err(AgentError::InvalidRequest(
                "translation text must be non-empty".to_string(),
            ));
        }

        info!(profile, version, "lang2fhir create");
        let payload = json!({
            "version": version,
            "resource": profile,
            "text": text,
        });
        let body = self.post("lang2fhir/create", &payload).await?;
        TranslatedResource::from_value(body)
    }

    /// Convert a free-text query into a search directive. `resource_hint`
    /// biases the service but does not filter: the resource type in its
    /// answer is authoritative.
    pub async fn translate_search(
        &self,
        text: &str,
        resource_hint: Option<&str>,
    ) -> AgentResult<SearchDirective> {
        if text.trim().is_empty() {
            return Err(AgentError::InvalidRequest(
                "search text must be non-empty".to_string(),
            ));
        }

        info!(hint = resource_hint, "lang2fhir search");
        let mut payload = json!({ "text": text });
        if let Some(hint) = resource_hint {
            payload["resource"] = json!(hint);
        }
        let body = self.post("lang2fhir/search", &payload).await?;

        let resource_type = body
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let raw_params = body
            .get("searchParams")
            .and_then(Value::as_str)
            .unwrap_or_default();
        SearchDirective::parse(resource_type, raw_params)
    }

    async fn post(&self, path: &str, payload: &Value) -> AgentResult<Value> {
        let url = format!("{}/{}", self.config.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| AgentError::Translation {
                status: None,
                message: format!("lang2fhir request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Translation {
                status: Some(status.as_u16()),
                message,
            });
        }

        response.json().await.map_err(|e| AgentError::Translation {
            status: None,
            message: format!("lang2fhir returned malformed JSON: {e}"),
        })
    }
}
