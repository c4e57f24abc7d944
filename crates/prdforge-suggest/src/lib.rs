pub mod engine;
pub mod error;
mod parse;
mod prompt;

pub use engine::{engine_for, ChatEngine, Completion, LlmEngine, OpenAiEngine, TokenUsage};
pub use error::GatewayError;

use std::sync::Arc;

use prdforge_core::{FlowLayout, LayoutPage, OpenAiLogRow, Priority};
use prdforge_store::{insert_one, DataStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

// --- Request / response types ---

/// What the generators know about the product.
#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductBrief {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vision: String,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub problem: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    /// 0-100, how central the persona is to the product
    #[serde(default)]
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub description: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedPage {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub layout_description: String,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RewriteAction {
    Improve,
    Shorten,
    Expand,
    Formalize,
    Simplify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Personas,
    Features,
    Flow,
    FlowLayout,
    Rewrite,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Personas => "personas",
            RequestKind::Features => "features",
            RequestKind::Flow => "flow",
            RequestKind::FlowLayout => "flow_layout",
            RequestKind::Rewrite => "rewrite",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RequestData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RewriteAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// The `{ type, data }` envelope used by text operations.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GatewayRequest {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(default)]
    pub data: RequestData,
}

impl GatewayRequest {
    pub fn rewrite(text: impl Into<String>, action: RewriteAction) -> Self {
        Self {
            kind: RequestKind::Rewrite,
            data: RequestData {
                text: Some(text.into()),
                action: Some(action),
                context: None,
            },
        }
    }
}

// --- Gateway ---

/// Chat-completion calls for one configured engine, optionally audited to
/// `openai_logs`.
#[derive(Clone)]
pub struct Gateway {
    engine: Arc<dyn ChatEngine>,
    audit: Option<Arc<dyn DataStore>>,
}

impl Gateway {
    pub fn new(engine: Arc<dyn ChatEngine>) -> Self {
        Self { engine, audit: None }
    }

    pub fn with_audit(mut self, store: Arc<dyn DataStore>) -> Self {
        self.audit = Some(store);
        self
    }

    pub fn model(&self) -> &str {
        self.engine.model()
    }

    pub async fn generate_personas(
        &self,
        product_id: Option<&str>,
        brief: &ProductBrief,
    ) -> Result<Vec<Persona>, GatewayError> {
        let (system, user) = prompt::personas(brief);
        let payload = json!({ "brief": brief });
        self.call(RequestKind::Personas, product_id, payload, &system, &user, parse::parse_personas)
            .await
    }

    pub async fn generate_features(
        &self,
        product_id: Option<&str>,
        brief: &ProductBrief,
        personas: &[Persona],
    ) -> Result<Vec<Feature>, GatewayError> {
        let (system, user) = prompt::features(brief, personas);
        let payload = json!({ "brief": brief, "personas": personas });
        self.call(RequestKind::Features, product_id, payload, &system, &user, parse::parse_features)
            .await
    }

    /// Pages a user moves through, derived from the brief and feature list.
    pub async fn generate_flow(
        &self,
        product_id: Option<&str>,
        brief: &ProductBrief,
        feature_names: &[String],
    ) -> Result<Vec<SuggestedPage>, GatewayError> {
        let (system, user) = prompt::flow(brief, feature_names);
        let payload = json!({ "brief": brief, "features": feature_names });
        self.call(RequestKind::Flow, product_id, payload, &system, &user, parse::parse_pages)
            .await
    }

    /// Positions and connections for `pages`. Returned ids are the ids given
    /// in `pages`; connections between unknown ids are already dropped.
    pub async fn generate_flow_layout(
        &self,
        product_id: Option<&str>,
        pages: &[LayoutPage],
    ) -> Result<FlowLayout, GatewayError> {
        if pages.is_empty() {
            return Err(GatewayError::MissingField("pages"));
        }
        let (system, user) = prompt::flow_layout(pages);
        let payload = json!({ "pages": pages });
        self.call(RequestKind::FlowLayout, product_id, payload, &system, &user, parse::parse_layout)
            .await
    }

    pub async fn rewrite_text(
        &self,
        product_id: Option<&str>,
        request: &GatewayRequest,
    ) -> Result<String, GatewayError> {
        if request.kind != RequestKind::Rewrite {
            return Err(GatewayError::WrongRequestType {
                expected: RequestKind::Rewrite.as_str(),
                got: request.kind.as_str(),
            });
        }
        let has_text = request
            .data
            .text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if !has_text {
            return Err(GatewayError::MissingField("text"));
        }
        let (system, user) = prompt::rewrite(&request.data);
        let payload = serde_json::to_value(request).map_err(|e| GatewayError::Parse(e.to_string()))?;
        self.call(request.kind, product_id, payload, &system, &user, parse::parse_rewrite)
            .await
    }

    async fn call<T>(
        &self,
        kind: RequestKind,
        product_id: Option<&str>,
        request_payload: Value,
        system: &str,
        user: &str,
        parse: impl FnOnce(&str) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        debug!(kind = kind.as_str(), model = self.engine.model(), "sending request");

        let (result, completion) = match self.engine.complete(system, user).await {
            Ok(completion) => (parse(&completion.text), Some(completion)),
            Err(e) => (Err(e), None),
        };

        if let Some(usage) = completion.as_ref().and_then(|c| c.usage) {
            info!(kind = kind.as_str(), tokens = usage.total_tokens, "completion received");
        }
        if let Err(e) = &result {
            warn!(kind = kind.as_str(), error = %e, "generation failed");
        }

        if let Some(store) = &self.audit {
            let usage = completion.as_ref().and_then(|c| c.usage);
            let row = OpenAiLogRow {
                id: String::new(),
                product_id: product_id.map(str::to_string),
                request_type: kind.as_str().to_string(),
                model: self.engine.model().to_string(),
                request_payload,
                response_payload: completion.as_ref().map(|c| response_value(&c.text)),
                prompt_tokens: usage.map(|u| u.prompt_tokens),
                completion_tokens: usage.map(|u| u.completion_tokens),
                total_tokens: usage.map(|u| u.total_tokens),
                error: result.as_ref().err().map(|e| e.to_string()),
            };
            if let Err(e) = insert_one(store.as_ref(), &row).await {
                warn!(kind = kind.as_str(), error = %e, "could not write audit log");
            }
        }

        result
    }
}

/// The reply as JSON when it parses, otherwise as a string.
fn response_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
