pub mod error;
pub mod graph;
pub mod history;
pub mod layout;
pub mod placement;
pub mod records;
pub mod settings;

pub use error::CoreError;
pub use graph::{FlowGraph, GraphSnapshot};
pub use history::{FlowState, History};
pub use layout::{FlowLayout, LayoutConnection, LayoutPage};
pub use records::{
    BugRow, FlowConnectionRow, FlowPageRow, ItemStatus, OpenAiLogRow, Priority, Record, Table,
    TaskRow,
};
pub use settings::{AiSettings, AppSettings, StoreSettings, UploadSettings};

use serde::{Deserialize, Serialize};

// --- Types (mirroring the flow canvas node/edge shapes) ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Editable content of one page of the product being designed.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Free-text description of how the page is laid out
    #[serde(default)]
    pub layout_description: String,
    /// Feature names shown on the page, in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

/// A page in the flow diagram. Matches ReactFlow's Node structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    pub data: PageData,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, position: Position, data: PageData) -> Self {
        Self {
            id: id.into(),
            node_type: default_node_type(),
            position,
            data,
        }
    }
}

fn default_node_type() -> String {
    "page".to_string()
}

/// A directed user-flow transition between two pages. Matches ReactFlow's Edge structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl FlowEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Partial update of a page's content. `None` leaves a field unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

impl PagePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.layout_description.is_none()
            && self.features.is_none()
    }

    pub fn apply(&self, data: &mut PageData) {
        if let Some(name) = &self.name {
            data.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            data.description = description.clone();
        }
        if let Some(layout) = &self.layout_description {
            data.layout_description = layout.clone();
        }
        if let Some(features) = &self.features {
            data.features = features.clone();
        }
    }
}

/// Trimmed, non-empty name or a `MissingField` error.
pub fn require_name(name: &str) -> Result<String, CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::MissingField("name"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_serializes_like_canvas_node() {
        let node = FlowNode::new(
            "p1",
            Position::new(10.0, 20.0),
            PageData {
                name: "Login".into(),
                layout_description: "Centered form".into(),
                ..Default::default()
            },
        );
        let val = serde_json::to_value(&node).unwrap();
        assert_eq!(val["type"], "page");
        assert_eq!(val["data"]["layoutDescription"], "Centered form");
        assert!(val["data"].get("features").is_none());
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut data = PageData {
            name: "Home".into(),
            description: "Landing".into(),
            ..Default::default()
        };
        let patch = PagePatch {
            name: Some("  Dashboard ".into()),
            ..Default::default()
        };
        patch.apply(&mut data);
        assert_eq!(data.name, "Dashboard");
        assert_eq!(data.description, "Landing");
    }

    #[test]
    fn blank_name_is_rejected() {
        assert!(matches!(require_name("   "), Err(CoreError::MissingField("name"))));
        assert_eq!(require_name(" Cart ").unwrap(), "Cart");
    }
}
