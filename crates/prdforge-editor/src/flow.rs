//! Flow diagram editor for one product.
//!
//! Every mutation follows the same path: validate, update the local graph
//! (optimistically or after the backend agreed), persist, and either commit
//! the pre-mutation snapshot to history or compensate. Undo and redo only
//! touch local state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use prdforge_core::placement::next_free_position;
use prdforge_core::{
    require_name, CoreError, FlowConnectionRow, FlowEdge, FlowGraph, FlowLayout, FlowNode,
    FlowPageRow, FlowState, GraphSnapshot, LayoutPage, PageData, PagePatch, Position,
};
use prdforge_store::{
    delete_by_id, delete_ids, fetch_for_product, insert_many, insert_one, update_by_id, DataStore,
    StoreError,
};
use prdforge_suggest::{Gateway, SuggestedPage};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::EditorError;

pub struct FlowEditor {
    product_id: String,
    store: Arc<dyn DataStore>,
    state: FlowState,
    /// Positions the backend has not accepted yet, latest per page.
    outbox: BTreeMap<String, Position>,
    last_error: Option<String>,
}

impl FlowEditor {
    /// Fetch pages and connections concurrently and start with empty history.
    pub async fn load(store: Arc<dyn DataStore>, product_id: &str) -> Result<Self, EditorError> {
        let (pages, connections) = tokio::try_join!(
            fetch_for_product::<FlowPageRow, _>(store.as_ref(), product_id),
            fetch_for_product::<FlowConnectionRow, _>(store.as_ref(), product_id),
        )?;
        let graph = FlowGraph::from_parts(
            pages.into_iter().map(FlowPageRow::into_node).collect(),
            connections.into_iter().map(FlowConnectionRow::into_edge).collect(),
        );
        info!(
            product_id,
            pages = graph.nodes().len(),
            connections = graph.edges().len(),
            "flow loaded"
        );
        Ok(Self {
            product_id: product_id.to_string(),
            store,
            state: FlowState::new(graph),
            outbox: BTreeMap::new(),
            last_error: None,
        })
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.state.graph
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.state.graph.snapshot()
    }

    pub fn can_undo(&self) -> bool {
        self.state.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.state.history.can_redo()
    }

    pub fn undo_depth(&self) -> usize {
        self.state.history.undo_depth()
    }

    pub fn redo_depth(&self) -> usize {
        self.state.history.redo_depth()
    }

    /// What a UI would show after the most recent failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Positions moved locally that the backend has not stored yet.
    pub fn pending_positions(&self) -> Vec<(String, Position)> {
        self.outbox.iter().map(|(id, pos)| (id.clone(), *pos)).collect()
    }

    fn fail<T>(&mut self, err: impl Into<EditorError>) -> Result<T, EditorError> {
        let err = err.into();
        warn!(product_id = %self.product_id, error = %err, "flow operation failed");
        self.last_error = Some(err.user_message());
        Err(err)
    }

    fn require_node(&mut self, id: &str) -> Result<(), EditorError> {
        if self.state.graph.contains_node(id) {
            Ok(())
        } else {
            self.fail(CoreError::UnknownNode(id.to_string()))
        }
    }

    // --- Positions ---

    /// Move a page. Returns whether the backend stored the new position; when
    /// it did not, the position waits in the outbox for [`flush_outbox`](Self::flush_outbox).
    pub async fn move_node(&mut self, id: &str, position: Position) -> Result<bool, EditorError> {
        self.require_node(id)?;
        self.state.mutate(|g| g.set_position(id, position))?;

        match self.persist_position(id, position).await {
            Ok(()) => {
                self.outbox.remove(id);
                Ok(true)
            }
            Err(e) => {
                warn!(node_id = id, error = %e, "position not saved, queued for retry");
                self.last_error = Some(EditorError::from(e).user_message());
                self.outbox.insert(id.to_string(), position);
                Ok(false)
            }
        }
    }

    async fn persist_position(&self, id: &str, position: Position) -> Result<(), StoreError> {
        update_by_id::<FlowPageRow, _>(
            self.store.as_ref(),
            id,
            json!({ "position_x": position.x, "position_y": position.y }),
        )
        .await
        .map(|_| ())
    }

    /// Retry queued position writes. Returns how many were stored; entries
    /// that fail again stay queued.
    pub async fn flush_outbox(&mut self) -> Result<usize, EditorError> {
        let pending = std::mem::take(&mut self.outbox);
        let mut stored = 0;
        let mut first_err = None;
        for (id, position) in pending {
            match self.persist_position(&id, position).await {
                Ok(()) => stored += 1,
                // The page is gone remotely; nothing left to save.
                Err(StoreError::NotFound(_)) => debug!(node_id = %id, "dropping queued position"),
                Err(e) => {
                    self.outbox.insert(id, position);
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return self.fail(e);
        }
        Ok(stored)
    }

    // --- Connections ---

    /// Connect two pages. The edge appears only after the backend stored it.
    pub async fn connect(&mut self, source: &str, target: &str) -> Result<FlowEdge, EditorError> {
        if let Err(e) = self.state.graph.validate_connection(source, target) {
            return self.fail(e);
        }
        let row = FlowConnectionRow::new(&self.product_id, source, target);
        let stored = match insert_one(self.store.as_ref(), &row).await {
            Ok(stored) => stored,
            Err(e) => return self.fail(e),
        };
        let edge = stored.into_edge();
        self.state.mutate(|g| g.push_edge(edge.clone()))?;
        debug!(edge_id = %edge.id, source, target, "connected");
        Ok(edge)
    }

    /// Remove an edge right away and put it back if the backend refuses.
    pub async fn delete_edge(&mut self, id: &str) -> Result<(), EditorError> {
        let before = self.state.graph.snapshot();
        let Some((index, edge)) = self.state.graph.remove_edge(id) else {
            return self.fail(CoreError::UnknownEdge(id.to_string()));
        };

        match delete_by_id::<FlowConnectionRow, _>(self.store.as_ref(), id).await {
            Ok(_) => {
                self.state.history.record(before);
                Ok(())
            }
            Err(e) => {
                self.state.graph.reinsert_edge(index, edge)?;
                self.fail(e)
            }
        }
    }

    // --- Pages ---

    /// Delete a page with its connections, remotely first. If the page row
    /// survives, its connections are still removed locally as one undo step.
    pub async fn delete_node(&mut self, id: &str) -> Result<(), EditorError> {
        self.require_node(id)?;
        let edge_ids: Vec<String> = self
            .state
            .graph
            .edges_touching(id)
            .map(|e| e.id.clone())
            .collect();

        if let Err(e) = delete_ids::<FlowConnectionRow, _>(self.store.as_ref(), &edge_ids).await {
            return self.fail(e);
        }
        if let Err(e) = delete_by_id::<FlowPageRow, _>(self.store.as_ref(), id).await {
            // The connections are already gone remotely; drop them here too.
            if !edge_ids.is_empty() {
                self.state.mutate(|g| {
                    for edge_id in &edge_ids {
                        g.remove_edge(edge_id);
                    }
                    Ok::<_, EditorError>(())
                })?;
            }
            return self.fail(e);
        }

        self.state.mutate(|g| {
            g.remove_node(id)
                .ok_or_else(|| CoreError::UnknownNode(id.to_string()))
        })?;
        self.outbox.remove(id);
        debug!(node_id = id, connections = edge_ids.len(), "page deleted");
        Ok(())
    }

    /// Add a page by hand. Without a position it takes the first free grid slot.
    pub async fn add_page(
        &mut self,
        data: PageData,
        position: Option<Position>,
    ) -> Result<FlowNode, EditorError> {
        let name = match require_name(&data.name) {
            Ok(name) => name,
            Err(e) => return self.fail(e),
        };
        let data = PageData { name, ..data };
        let position = position.unwrap_or_else(|| next_free_position(self.state.graph.nodes()));

        let row = FlowPageRow::new(&self.product_id, &data, position);
        let node = match insert_one(self.store.as_ref(), &row).await {
            Ok(stored) => stored.into_node(),
            Err(e) => return self.fail(e),
        };
        self.state.mutate(|g| {
            g.push_node(node.clone());
            Ok::<_, EditorError>(())
        })?;
        Ok(node)
    }

    pub async fn edit_page(&mut self, id: &str, patch: PagePatch) -> Result<FlowNode, EditorError> {
        self.require_node(id)?;
        if let Some(name) = &patch.name {
            if let Err(e) = require_name(name) {
                return self.fail(e);
            }
        }
        if patch.is_empty() {
            return self.fail(EditorError::Validation("nothing to change".into()));
        }

        if let Err(e) = update_by_id::<FlowPageRow, _>(self.store.as_ref(), id, patch_columns(&patch)).await {
            return self.fail(e);
        }
        self.state.mutate(|g| g.update_page(id, &patch))?;
        self.state
            .graph
            .node(id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownNode(id.to_string()).into())
    }

    // --- History ---

    pub fn undo(&mut self) -> bool {
        self.state.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.state.redo()
    }

    // --- Assisted regeneration ---

    /// Pages to hand the assistant: `pages` under temporary ids, or the
    /// current pages under their own ids.
    pub fn layout_input(
        &mut self,
        pages: Option<Vec<SuggestedPage>>,
    ) -> Result<Vec<LayoutPage>, EditorError> {
        let input: Vec<LayoutPage> = match pages {
            Some(pages) => pages
                .into_iter()
                .enumerate()
                .map(|(i, p)| LayoutPage {
                    id: format!("new-{}", i + 1),
                    name: p.name,
                    description: p.description,
                    layout_description: p.layout_description,
                    features: p.features,
                    position: None,
                })
                .collect(),
            None => FlowLayout::from_nodes(self.state.graph.nodes()).pages,
        };
        if input.is_empty() {
            return self.fail(EditorError::Validation("there are no pages to lay out".into()));
        }
        Ok(input)
    }

    /// Ask the assistant to lay out the current pages, or `pages` when given.
    /// Nothing changes until the result is passed to [`apply_layout`](Self::apply_layout).
    pub async fn suggest_flow(
        &mut self,
        gateway: &Gateway,
        pages: Option<Vec<SuggestedPage>>,
    ) -> Result<FlowLayout, EditorError> {
        let input = self.layout_input(pages)?;
        match gateway.generate_flow_layout(Some(&self.product_id), &input).await {
            Ok(layout) => Ok(layout),
            Err(e) => self.fail(e),
        }
    }

    /// Replace the whole flow with `layout`.
    ///
    /// Every page needs a name. New rows are staged first. If staging fails the staged rows are
    /// deleted and the old flow stays as it was. Only then are the old rows
    /// removed. Locally the swap is one undoable step.
    pub async fn apply_layout(&mut self, mut layout: FlowLayout) -> Result<(), EditorError> {
        layout.sanitize();
        if layout.pages.is_empty() {
            return self.fail(EditorError::Validation("layout has no pages".into()));
        }
        for page in &mut layout.pages {
            match require_name(&page.name) {
                Ok(name) => page.name = name,
                Err(e) => return self.fail(e),
            }
        }
        let store = self.store.clone();

        let page_rows: Vec<FlowPageRow> = layout
            .pages
            .iter()
            .map(|p| {
                let position = p.position.unwrap_or_default();
                FlowPageRow::new(&self.product_id, &p.page_data(), position)
            })
            .collect();
        let staged_pages = match insert_many(store.as_ref(), &page_rows).await {
            Ok(rows) => rows,
            Err(e) => return self.fail(e),
        };
        let staged_page_ids: Vec<String> = staged_pages.iter().map(|r| r.id.clone()).collect();

        let id_map: HashMap<String, String> = layout
            .pages
            .iter()
            .map(|p| p.id.clone())
            .zip(staged_page_ids.iter().cloned())
            .collect();
        let pairs = match layout.remap_connections(&id_map) {
            Ok(pairs) => pairs,
            Err(e) => {
                self.discard_staged(&[], &staged_page_ids).await;
                return self.fail(e);
            }
        };
        let connection_rows: Vec<FlowConnectionRow> = pairs
            .iter()
            .map(|(s, t)| FlowConnectionRow::new(&self.product_id, s, t))
            .collect();
        let staged_connections = match insert_many(store.as_ref(), &connection_rows).await {
            Ok(rows) => rows,
            Err(e) => {
                self.discard_staged(&[], &staged_page_ids).await;
                return self.fail(e);
            }
        };

        // Swap: old connections first so no stored connection points at a deleted page.
        let old_edge_ids: Vec<String> = self.state.graph.edges().iter().map(|e| e.id.clone()).collect();
        let old_page_ids: Vec<String> = self.state.graph.nodes().iter().map(|n| n.id.clone()).collect();
        if let Err(e) = delete_ids::<FlowConnectionRow, _>(store.as_ref(), &old_edge_ids).await {
            let staged_connection_ids: Vec<String> =
                staged_connections.iter().map(|r| r.id.clone()).collect();
            self.discard_staged(&staged_connection_ids, &staged_page_ids).await;
            return self.fail(e);
        }
        if let Err(e) = delete_ids::<FlowPageRow, _>(store.as_ref(), &old_page_ids).await {
            // The new flow is complete remotely; the old pages are orphans now.
            warn!(product_id = %self.product_id, error = %e, "old pages left behind after regeneration");
            self.last_error = Some(EditorError::from(e).user_message());
        }

        let graph = FlowGraph::from_parts(
            staged_pages.into_iter().map(FlowPageRow::into_node).collect(),
            staged_connections.into_iter().map(FlowConnectionRow::into_edge).collect(),
        );
        info!(
            product_id = %self.product_id,
            pages = graph.nodes().len(),
            connections = graph.edges().len(),
            "flow regenerated"
        );
        self.state.mutate(|g| {
            *g = graph;
            Ok::<_, EditorError>(())
        })?;
        self.outbox.clear();
        Ok(())
    }

    /// Suggest a layout and apply it in one go.
    pub async fn regenerate(
        &mut self,
        gateway: &Gateway,
        pages: Option<Vec<SuggestedPage>>,
    ) -> Result<(), EditorError> {
        let layout = self.suggest_flow(gateway, pages).await?;
        self.apply_layout(layout).await
    }

    async fn discard_staged(&self, connection_ids: &[String], page_ids: &[String]) {
        if let Err(e) = delete_ids::<FlowConnectionRow, _>(self.store.as_ref(), connection_ids).await {
            warn!(product_id = %self.product_id, error = %e, "could not remove staged connections");
        }
        if let Err(e) = delete_ids::<FlowPageRow, _>(self.store.as_ref(), page_ids).await {
            warn!(product_id = %self.product_id, error = %e, "could not remove staged pages");
        }
    }
}

/// Row columns touched by a patch.
fn patch_columns(patch: &PagePatch) -> Value {
    let mut map = Map::new();
    if let Some(name) = &patch.name {
        map.insert("name".into(), json!(name.trim()));
    }
    if let Some(description) = &patch.description {
        map.insert("description".into(), json!(description));
    }
    if let Some(layout) = &patch.layout_description {
        map.insert("layout_description".into(), json!(layout));
    }
    if let Some(features) = &patch.features {
        map.insert("features".into(), json!(features));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_columns_only_include_set_fields() {
        let patch = PagePatch {
            name: Some("  Checkout ".into()),
            features: Some(vec!["Pay".into()]),
            ..Default::default()
        };
        assert_eq!(
            patch_columns(&patch),
            json!({"name": "Checkout", "features": ["Pay"]})
        );
    }
}
