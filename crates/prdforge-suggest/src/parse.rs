use std::collections::HashSet;

use prdforge_core::{FlowLayout, LayoutConnection, LayoutPage, Position, Priority};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{Feature, GatewayError, Persona, SuggestedPage};

/// Extract the outermost JSON object from raw model output.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Extract the outermost JSON array from raw model output.
fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

fn parse_value(raw: &str) -> Result<Value, GatewayError> {
    if let Some(obj) = extract_json_object(raw) {
        if let Ok(v) = serde_json::from_str(obj) {
            return Ok(v);
        }
    }
    let arr = extract_json_array(raw)
        .ok_or_else(|| GatewayError::Parse("no JSON found in reply".into()))?;
    serde_json::from_str(arr).map_err(|e| GatewayError::Parse(e.to_string()))
}

/// Items under `key`, or the top-level array. Malformed items are skipped so
/// one bad entry does not cost the whole reply.
fn parse_items<T: DeserializeOwned>(raw: &str, key: &str) -> Result<Vec<T>, GatewayError> {
    let value = parse_value(raw)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            _ => return Err(GatewayError::Parse(format!("reply has no \"{key}\" array"))),
        },
        _ => return Err(GatewayError::Parse("reply is not an object".into())),
    };
    let total = items.len();
    let parsed: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if parsed.len() < total {
        debug!(skipped = total - parsed.len(), key, "skipped malformed items");
    }
    Ok(parsed)
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}

/// Numbers may arrive as numbers or numeric strings.
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// --- Personas ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmPersona {
    name: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    goals: Vec<String>,
    #[serde(default, alias = "pain_points")]
    pain_points: Vec<String>,
    #[serde(default)]
    score: Value,
}

pub fn parse_personas(raw: &str) -> Result<Vec<Persona>, GatewayError> {
    let mut personas: Vec<Persona> = parse_items::<LlmPersona>(raw, "personas")?
        .into_iter()
        .filter(|p| !p.name.trim().is_empty())
        .map(|p| Persona {
            name: p.name.trim().to_string(),
            role: p.role.trim().to_string(),
            description: p.description.trim().to_string(),
            goals: clean_list(p.goals),
            pain_points: clean_list(p.pain_points),
            score: as_number(&p.score).unwrap_or(0.0).round().clamp(0.0, 100.0) as u8,
        })
        .collect();
    personas.sort_by(|a, b| b.score.cmp(&a.score));
    Ok(personas)
}

// --- Features ---

#[derive(Deserialize)]
struct LlmFeature {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<String>,
}

pub fn parse_features(raw: &str) -> Result<Vec<Feature>, GatewayError> {
    let mut seen = HashSet::new();
    Ok(parse_items::<LlmFeature>(raw, "features")?
        .into_iter()
        .filter_map(|f| {
            let name = f.name.trim().to_string();
            if name.is_empty() || !seen.insert(name.to_lowercase()) {
                return None;
            }
            Some(Feature {
                name,
                description: f.description.trim().to_string(),
                priority: f
                    .priority
                    .as_deref()
                    .and_then(Priority::parse)
                    .unwrap_or_default(),
            })
        })
        .collect())
}

// --- Flow pages ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmPage {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "layout", alias = "layout_description")]
    layout_description: String,
    #[serde(default)]
    features: Vec<String>,
}

pub fn parse_pages(raw: &str) -> Result<Vec<SuggestedPage>, GatewayError> {
    let mut seen = HashSet::new();
    Ok(parse_items::<LlmPage>(raw, "pages")?
        .into_iter()
        .filter_map(|p| {
            let name = p.name.trim().to_string();
            if name.is_empty() || !seen.insert(name.to_lowercase()) {
                return None;
            }
            Some(SuggestedPage {
                name,
                description: p.description.trim().to_string(),
                layout_description: p.layout_description.trim().to_string(),
                features: clean_list(p.features),
            })
        })
        .collect())
}

// --- Flow layout ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmLayoutPage {
    id: Value,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "layout", alias = "layout_description")]
    layout_description: String,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    position: Option<Value>,
    #[serde(default)]
    x: Option<Value>,
    #[serde(default)]
    y: Option<Value>,
}

impl LlmLayoutPage {
    fn position(&self) -> Option<Position> {
        let (x, y) = match &self.position {
            Some(p) => (p.get("x")?, p.get("y")?),
            None => (self.x.as_ref()?, self.y.as_ref()?),
        };
        Some(Position::new(as_number(x)?, as_number(y)?))
    }
}

#[derive(Deserialize)]
struct LlmConnection {
    source: Value,
    target: Value,
}

pub fn parse_layout(raw: &str) -> Result<FlowLayout, GatewayError> {
    let pages: Vec<LayoutPage> = parse_items::<LlmLayoutPage>(raw, "pages")?
        .into_iter()
        .filter_map(|p| {
            let id = as_id(&p.id)?;
            let position = p.position();
            Some(LayoutPage {
                id,
                name: p.name.trim().to_string(),
                description: p.description.trim().to_string(),
                layout_description: p.layout_description.trim().to_string(),
                features: clean_list(p.features),
                position,
            })
        })
        .filter(|p| !p.name.is_empty())
        .collect();

    // A reply without connections is still a usable layout.
    let connections = parse_items::<LlmConnection>(raw, "connections")
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| {
            Some(LayoutConnection {
                source: as_id(&c.source)?,
                target: as_id(&c.target)?,
            })
        })
        .collect();

    let mut layout = FlowLayout { pages, connections };
    layout.sanitize();
    if layout.pages.is_empty() {
        return Err(GatewayError::Parse("layout has no pages".into()));
    }
    Ok(layout)
}

// --- Rewrite ---

#[derive(Deserialize)]
struct LlmRewrite {
    text: String,
}

pub fn parse_rewrite(raw: &str) -> Result<String, GatewayError> {
    let obj = extract_json_object(raw)
        .ok_or_else(|| GatewayError::Parse("no JSON object in reply".into()))?;
    let parsed: LlmRewrite =
        serde_json::from_str(obj).map_err(|e| GatewayError::Parse(e.to_string()))?;
    let text = parsed.text.trim();
    if text.is_empty() {
        return Err(GatewayError::EmptyResponse);
    }
    Ok(text.to_string())
}
