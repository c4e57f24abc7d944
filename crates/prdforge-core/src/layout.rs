use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::placement::{grid_position, is_free};
use crate::{CoreError, FlowNode, PageData, Position};

/// A page proposed by the assistant, identified by a temporary id that only
/// has meaning inside its [`FlowLayout`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub layout_description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl LayoutPage {
    pub fn page_data(&self) -> PageData {
        PageData {
            name: self.name.clone(),
            description: self.description.clone(),
            layout_description: self.layout_description.clone(),
            features: self.features.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutConnection {
    pub source: String,
    pub target: String,
}

/// A complete proposed flow: positioned pages plus connections between their temporary ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowLayout {
    #[serde(default)]
    pub pages: Vec<LayoutPage>,
    #[serde(default)]
    pub connections: Vec<LayoutConnection>,
}

impl FlowLayout {
    /// Build a layout from pages already on the canvas, reusing their ids.
    pub fn from_nodes(nodes: &[FlowNode]) -> Self {
        Self {
            pages: nodes
                .iter()
                .map(|n| LayoutPage {
                    id: n.id.clone(),
                    name: n.data.name.clone(),
                    description: n.data.description.clone(),
                    layout_description: n.data.layout_description.clone(),
                    features: n.data.features.clone(),
                    position: Some(n.position),
                })
                .collect(),
            connections: Vec::new(),
        }
    }

    /// Drop connections the canvas could not render and give every page a position.
    ///
    /// Removes connections to unknown ids, self-loops and duplicates. Pages
    /// without coordinates take the first free grid slot.
    pub fn sanitize(&mut self) {
        let mut seen_ids = HashSet::new();
        self.pages.retain(|p| !p.id.is_empty() && seen_ids.insert(p.id.clone()));

        let ids: HashSet<&str> = self.pages.iter().map(|p| p.id.as_str()).collect();
        let mut seen = HashSet::new();
        self.connections.retain(|c| {
            c.source != c.target
                && ids.contains(c.source.as_str())
                && ids.contains(c.target.as_str())
                && seen.insert((c.source.clone(), c.target.clone()))
        });

        let mut placed: Vec<FlowNode> = self
            .pages
            .iter()
            .filter_map(|p| p.position.map(|pos| FlowNode::new(p.id.clone(), pos, PageData::default())))
            .collect();
        let mut slot = 0;
        for page in self.pages.iter_mut().filter(|p| p.position.is_none()) {
            let pos = loop {
                let candidate = grid_position(slot);
                slot += 1;
                if is_free(candidate, &placed) {
                    break candidate;
                }
            };
            page.position = Some(pos);
            placed.push(FlowNode::new(page.id.clone(), pos, PageData::default()));
        }
    }

    /// Translate connections from temporary ids to stored ids.
    pub fn remap_connections(
        &self,
        id_map: &HashMap<String, String>,
    ) -> Result<Vec<(String, String)>, CoreError> {
        self.connections
            .iter()
            .map(|c| {
                let source = id_map
                    .get(&c.source)
                    .ok_or_else(|| CoreError::UnmappedPage(c.source.clone()))?;
                let target = id_map
                    .get(&c.target)
                    .ok_or_else(|| CoreError::UnmappedPage(c.target.clone()))?;
                Ok((source.clone(), target.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lp(id: &str, position: Option<Position>) -> LayoutPage {
        LayoutPage {
            id: id.into(),
            name: id.to_uppercase(),
            description: String::new(),
            layout_description: String::new(),
            features: vec![],
            position,
        }
    }

    fn conn(s: &str, t: &str) -> LayoutConnection {
        LayoutConnection { source: s.into(), target: t.into() }
    }

    #[test]
    fn sanitize_drops_bad_connections() {
        let mut layout = FlowLayout {
            pages: vec![lp("1", None), lp("2", None)],
            connections: vec![conn("1", "2"), conn("1", "2"), conn("2", "2"), conn("2", "9")],
        };
        layout.sanitize();
        assert_eq!(layout.connections, vec![conn("1", "2")]);
        assert!(layout.pages.iter().all(|p| p.position.is_some()));
        assert_ne!(layout.pages[0].position, layout.pages[1].position);
    }

    #[test]
    fn unpositioned_pages_avoid_positioned_ones() {
        let mut layout = FlowLayout {
            pages: vec![lp("1", Some(Position::new(100.0, 100.0))), lp("2", None)],
            connections: vec![],
        };
        layout.sanitize();
        assert_eq!(layout.pages[1].position, Some(Position::new(350.0, 100.0)));
    }

    #[test]
    fn remap_requires_every_endpoint() {
        let layout = FlowLayout {
            pages: vec![lp("t1", None), lp("t2", None)],
            connections: vec![conn("t1", "t2")],
        };
        let mut map = HashMap::new();
        map.insert("t1".to_string(), "db-1".to_string());
        assert!(matches!(
            layout.remap_connections(&map),
            Err(CoreError::UnmappedPage(id)) if id == "t2"
        ));
        map.insert("t2".to_string(), "db-2".to_string());
        assert_eq!(
            layout.remap_connections(&map).unwrap(),
            vec![("db-1".to_string(), "db-2".to_string())]
        );
    }
}
