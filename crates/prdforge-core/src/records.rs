//! Row shapes for the hosted tables this workspace reads and writes.
//!
//! Only the columns the editor, board and gateway touch are modelled. Other
//! columns are dropped on decode and never written back, since updates send
//! explicit column patches.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{FlowEdge, FlowNode, PageData, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Products,
    Prds,
    Features,
    FlowPages,
    FlowConnections,
    Bugs,
    Tasks,
    OpenaiLogs,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Products => "products",
            Table::Prds => "prds",
            Table::Features => "features",
            Table::FlowPages => "flow_pages",
            Table::FlowConnections => "flow_connections",
            Table::Bugs => "bugs",
            Table::Tasks => "tasks",
            Table::OpenaiLogs => "openai_logs",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed row of one table. Rows are inserted without an id and read back
/// with the id the store assigned.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: Table;

    fn id(&self) -> &str;
}

/// Treat an explicit `null` column like a missing one.
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

// --- Flow ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowPageRow {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub product_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_default")]
    pub layout_description: String,
    #[serde(default, deserialize_with = "null_default")]
    pub features: Vec<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub position_x: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub position_y: f64,
}

impl FlowPageRow {
    pub fn new(product_id: &str, data: &PageData, position: Position) -> Self {
        Self {
            id: String::new(),
            product_id: product_id.to_string(),
            name: data.name.clone(),
            description: data.description.clone(),
            layout_description: data.layout_description.clone(),
            features: data.features.clone(),
            position_x: position.x,
            position_y: position.y,
        }
    }

    pub fn into_node(self) -> FlowNode {
        FlowNode::new(
            self.id,
            Position::new(self.position_x, self.position_y),
            PageData {
                name: self.name,
                description: self.description,
                layout_description: self.layout_description,
                features: self.features,
            },
        )
    }
}

impl Record for FlowPageRow {
    const TABLE: Table = Table::FlowPages;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowConnectionRow {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub product_id: String,
    pub source_page_id: String,
    pub target_page_id: String,
}

impl FlowConnectionRow {
    pub fn new(product_id: &str, source: &str, target: &str) -> Self {
        Self {
            id: String::new(),
            product_id: product_id.to_string(),
            source_page_id: source.to_string(),
            target_page_id: target.to_string(),
        }
    }

    pub fn into_edge(self) -> FlowEdge {
        FlowEdge::new(self.id, self.source_page_id, self.target_page_id)
    }
}

impl Record for FlowConnectionRow {
    const TABLE: Table = Table::FlowConnections;

    fn id(&self) -> &str {
        &self.id
    }
}

// --- Audit ---

/// One chat-completion call, kept for auditing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAiLogRow {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    pub request_type: String,
    pub model: String,
    pub request_payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Record for OpenAiLogRow {
    const TABLE: Table = Table::OpenaiLogs;

    fn id(&self) -> &str {
        &self.id
    }
}

// --- Kanban ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 4] = [
        ItemStatus::Todo,
        ItemStatus::InProgress,
        ItemStatus::Review,
        ItemStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Todo => "todo",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Review => "review",
            ItemStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" | "med" | "normal" => Some(Priority::Medium),
            "high" | "critical" | "urgent" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRow {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub product_id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub position: i64,
}

impl Record for TaskRow {
    const TABLE: Table = Table::Tasks;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BugRow {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub product_id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_default")]
    pub steps_to_reproduce: String,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub position: i64,
}

impl Record for BugRow {
    const TABLE: Table = Table::Bugs;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_row_tolerates_null_columns() {
        let row: FlowPageRow = serde_json::from_value(json!({
            "id": "p1",
            "product_id": "prod",
            "name": "Checkout",
            "description": null,
            "layout_description": null,
            "features": null,
            "position_x": 12.5,
            "position_y": null,
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        let node = row.into_node();
        assert_eq!(node.id, "p1");
        assert_eq!(node.position, Position::new(12.5, 0.0));
        assert!(node.data.features.is_empty());
    }

    #[test]
    fn new_rows_serialize_without_id() {
        let row = FlowConnectionRow::new("prod", "a", "b");
        let val = serde_json::to_value(&row).unwrap();
        assert!(val.get("id").is_none());
        assert_eq!(val["source_page_id"], "a");
    }

    #[test]
    fn status_and_priority_parse() {
        assert_eq!(ItemStatus::parse("in_progress"), Some(ItemStatus::InProgress));
        assert_eq!(ItemStatus::parse("blocked"), None);
        assert_eq!(Priority::parse(" URGENT "), Some(Priority::High));
        assert_eq!(Table::OpenaiLogs.to_string(), "openai_logs");
    }
}
