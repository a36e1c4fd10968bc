// Copyright (c), lang2fhir-agent contributors
// SPDX-License-Identifier: Apache-2.0

// The per-request decision layer: classify intent, translate, complete
// patient context, then persist or query. One strictly sequential pass;
// the first failure is terminal and surfaced verbatim.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context;
use crate::emr::{self, EmrClient};
use crate::lang2fhir::Lang2FhirClient;
use crate::profiles::{infer_profile, PROFILES};
use crate::types::{ContextHints, EmrSession, OrchestrationResult};
use crate::{AgentError, AgentResult};

/// Operation class of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Search,
}

/// Swappable classification policy. The default is a keyword heuristic;
/// callers that need determinism pass the operation explicitly instead.
pub type IntentPolicy = fn(&str) -> Operation;

/// Phrasing that marks a request as a question over existing records
/// rather than a dictation of new ones.
const SEARCH_MARKERS: &[&str] = &[
    "find",
    "search",
    "show",
    "list",
    "look up",
    "lookup",
    "what",
    "which",
    "when",
    "who",
    "how many",
    "between",
    "since",
    "last",
    "recent",
    "upcoming",
    "history",
    "?",
];

/// Default intent heuristic: query-like temporal/filter phrasing routes to
/// search; everything else falls back to create.
pub fn default_intent_policy(text: &str) -> Operation {
    let lowered = text.to_lowercase();
    if SEARCH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        Operation::Search
    } else {
        Operation::Create
    }
}

fn default_version() -> String {
    "R4".to_string()
}

/// One natural-language request. `operation` and `profile` are optional
/// caller overrides; everything else is inferred.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentRequest {
    pub text: String,
    #[serde(default)]
    pub operation: Option<Operation>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub hints: ContextHints,
}

/// Ties the translation client, the context resolver and the EMR adapter
/// together for one request at a time. Holds no per-request state, so
/// independent requests may run on independent instances concurrently.
pub struct Orchestrator {
    lang2fhir: Lang2FhirClient,
    emr: EmrClient,
    policy: IntentPolicy,
}

impl Orchestrator {
    pub fn new(lang2fhir: Lang2FhirClient) -> Self {
        Self {
            lang2fhir,
            emr: EmrClient::new(),
            policy: default_intent_policy,
        }
    }

    /// Replace the intent classification policy.
    pub fn with_policy(mut self, policy: IntentPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Which operation a request runs as: the explicit override wins,
    /// otherwise the policy decides.
    pub fn classify(&self, request: &AgentRequest) -> Operation {
        request
            .operation
            .unwrap_or_else(|| (self.policy)(&request.text))
    }

    /// Run one request to completion. Stages run strictly in order; the
    /// first failure is terminal and nothing is retried here.
    pub async fn handle(
        &self,
        request: &AgentRequest,
        session: &EmrSession,
    ) -> AgentResult<OrchestrationResult> {
        if request.text.trim().is_empty() {
            return Err(AgentError::InvalidRequest(
                "request text must be non-empty".to_string(),
            ));
        }

        let operation = self.classify(request);
        info!(?operation, provider = ?session.provider, "handling request");
        match operation {
            Operation::Create => self.create(request, session).await,
            Operation::Search => self.search(request, session).await,
        }
    }

    async fn create(
        &self,
        request: &AgentRequest,
        session: &EmrSession,
    ) -> AgentResult<OrchestrationResult> {
        let profile = request
            .profile
            .as_deref()
            .unwrap_or_else(|| infer_profile(&request.text));

        let translated = self
            .lang2fhir
            .translate_create(&request.text, profile, &request.version)
            .await?;
        if let Some(expected) = PROFILES.resource_type(profile) {
            if expected != translated.resource_type {
                warn!(
                    profile,
                    expected,
                    got = %translated.resource_type,
                    "translation disagrees with profile registry"
                );
            }
        }

        let resolved = context::resolve_resource(translated, &request.hints, &self.emr, session)
            .await?;
        let created = self
            .emr
            .create(&resolved.resource_type, &resolved.body, session)
            .await?;
        Ok(OrchestrationResult::Created { resource: created })
    }

    async fn search(
        &self,
        request: &AgentRequest,
        session: &EmrSession,
    ) -> AgentResult<OrchestrationResult> {
        let hint = request
            .profile
            .as_deref()
            .and_then(|profile| PROFILES.resource_type(profile));

        let directive = self.lang2fhir.translate_search(&request.text, hint).await?;
        let mut directive =
            context::resolve_directive(directive, &request.hints, &self.emr, session).await?;
        emr::normalize_directive(&mut directive);

        let resources = self
            .emr
            .search(&directive.resource_type, &directive.params, session)
            .await?;
        Ok(OrchestrationResult::Found {
            resource_type: directive.resource_type,
            resources,
        })
    }
}
