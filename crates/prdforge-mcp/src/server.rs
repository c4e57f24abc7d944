use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use prdforge_core::settings::store_configured;
use prdforge_core::{
    AppSettings, BugRow, FlowEdge, FlowLayout, FlowNode, ItemStatus, PageData, PagePatch, Position,
    Priority, TaskRow, UploadSettings,
};
use prdforge_editor::{EditorError, FlowEditor, KanbanBoard, KanbanFilter, KanbanItem};
use prdforge_store::{upload_image, DataStore, ObjectStorage, RestStore};
use prdforge_suggest::{
    engine_for, Gateway, GatewayError, GatewayRequest, Persona, ProductBrief, RequestData,
    RequestKind, RewriteAction, SuggestedPage,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Unwrap a value or return the tool failure carried in the `Err`.
macro_rules! try_tool {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(result) => return Ok(result),
        }
    };
}

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ProductRequest {
    /// ID of the product whose flow to use
    product_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AddPageRequest {
    product_id: String,
    /// Page name (required, shown on the canvas)
    name: String,
    description: Option<String>,
    /// How the page is laid out, in a sentence or two
    layout_description: Option<String>,
    /// Feature names shown on the page
    features: Option<Vec<String>>,
    /// X position. Default: first free grid slot.
    x: Option<f64>,
    /// Y position. Default: first free grid slot.
    y: Option<f64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct EditPageRequest {
    product_id: String,
    /// ID of the page to edit
    page_id: String,
    name: Option<String>,
    description: Option<String>,
    layout_description: Option<String>,
    /// Replaces the page's feature list
    features: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct MovePageRequest {
    product_id: String,
    page_id: String,
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ConnectPagesRequest {
    product_id: String,
    /// Page the user navigates from
    source: String,
    /// Page the user navigates to
    target: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct DeleteConnectionRequest {
    product_id: String,
    connection_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct DeletePageRequest {
    product_id: String,
    page_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SuggestFlowRequest {
    product_id: String,
    /// New pages to lay out instead of the current ones
    pages: Option<Vec<SuggestedPage>>,
    /// When given without `pages`, pages are first generated from this brief
    brief: Option<ProductBrief>,
    /// Feature names passed along with `brief`
    features: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ApplyLayoutRequest {
    product_id: String,
    /// Layout JSON ({pages, connections}). Default: the last suggest_flow result for this product.
    layout: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GeneratePersonasRequest {
    /// Product the call is logged against
    product_id: Option<String>,
    brief: ProductBrief,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GenerateFeaturesRequest {
    product_id: Option<String>,
    brief: ProductBrief,
    /// Personas to design for, e.g. from generate_personas
    personas: Option<Vec<Persona>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct RewriteTextRequest {
    product_id: Option<String>,
    text: String,
    /// "improve" (default), "shorten", "expand", "formalize" or "simplify"
    action: Option<RewriteAction>,
    /// Surrounding document text to keep the rewrite consistent
    context: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ListTasksRequest {
    product_id: String,
    /// "tasks" (default) or "bugs"
    board: Option<String>,
    /// "todo", "in_progress", "review" or "done"
    status: Option<String>,
    /// "low", "medium" or "high"
    priority: Option<String>,
    assignee: Option<String>,
    /// Case-insensitive text to find in title or description
    text: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct MoveTaskRequest {
    product_id: String,
    /// "tasks" (default) or "bugs"
    board: Option<String>,
    item_id: String,
    /// Target column: "todo", "in_progress", "review" or "done"
    status: String,
    /// Position in the column. Default: end of column.
    position: Option<i64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct UploadImageRequest {
    product_id: String,
    /// Image bytes (JPEG, PNG, GIF or WebP), base64-encoded
    data_base64: String,
}

// --- Responses ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowView<'a> {
    product_id: &'a str,
    nodes: &'a [FlowNode],
    edges: &'a [FlowEdge],
    can_undo: bool,
    can_redo: bool,
    pending_positions: Vec<PendingPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingPosition {
    page_id: String,
    position: Position,
}

impl<'a> FlowView<'a> {
    fn of(editor: &'a FlowEditor) -> Self {
        Self {
            product_id: editor.product_id(),
            nodes: editor.graph().nodes(),
            edges: editor.graph().edges(),
            can_undo: editor.can_undo(),
            can_redo: editor.can_redo(),
            pending_positions: editor
                .pending_positions()
                .into_iter()
                .map(|(page_id, position)| PendingPosition { page_id, position })
                .collect(),
            last_error: editor.last_error(),
        }
    }
}

fn success(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

fn failure(text: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text.into())])
}

fn json_result<T: Serialize>(value: &T) -> CallToolResult {
    match serde_json::to_string_pretty(value) {
        Ok(json) => success(json),
        Err(e) => failure(format!("Serialization error: {e}")),
    }
}

fn editor_failure(e: &EditorError) -> CallToolResult {
    failure(format!("{} ({e})", e.user_message()))
}

fn gateway_failure(e: &GatewayError) -> CallToolResult {
    failure(format!("{} ({e})", e.user_message()))
}

fn parse_status(status: &str) -> Result<ItemStatus, CallToolResult> {
    ItemStatus::parse(status).ok_or_else(|| {
        failure(format!(
            "Unknown status '{status}'. Use todo, in_progress, review or done."
        ))
    })
}

// --- Backends ---

/// Clients built once at start-up from settings.
pub struct Backends {
    pub store: Option<Arc<dyn DataStore>>,
    pub files: Option<Arc<dyn ObjectStorage>>,
    pub gateway: Option<Gateway>,
    pub upload: UploadSettings,
}

impl Backends {
    pub fn from_settings(settings: &AppSettings) -> Self {
        let rest = if store_configured(&settings.store) {
            match RestStore::new(&settings.store) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!(error = %e, "could not create store client");
                    None
                }
            }
        } else {
            warn!("store is not configured; flow and board tools are disabled");
            None
        };
        let store = rest.clone().map(|s| s as Arc<dyn DataStore>);
        let files = rest.map(|s| s as Arc<dyn ObjectStorage>);

        let gateway = match engine_for(&settings.ai) {
            Ok(engine) => {
                info!(provider = %settings.ai.provider, model = %settings.ai.model, "AI generation enabled");
                let gateway = Gateway::new(engine);
                Some(match &store {
                    Some(store) => gateway.with_audit(store.clone()),
                    None => gateway,
                })
            }
            Err(e) => {
                warn!(error = %e, "AI generation is disabled");
                None
            }
        };

        Self {
            store,
            files,
            gateway,
            upload: settings.upload.clone(),
        }
    }
}

// --- Server ---

#[derive(Clone)]
pub struct ForgeServer {
    tool_router: ToolRouter<Self>,
    backends: Arc<Backends>,
    /// One editor per loaded product
    editors: Arc<Mutex<HashMap<String, FlowEditor>>>,
    /// Last suggested layout per product, waiting for apply_layout
    layouts: Arc<Mutex<HashMap<String, FlowLayout>>>,
}

impl ForgeServer {
    fn store(&self) -> Result<Arc<dyn DataStore>, CallToolResult> {
        self.backends.store.clone().ok_or_else(|| {
            failure("The data store is not configured. Set store.url and store.apiKey in ~/.prdforge/settings.json.")
        })
    }

    fn gateway(&self) -> Result<&Gateway, CallToolResult> {
        self.backends.gateway.as_ref().ok_or_else(|| {
            failure("AI generation is not configured. Set ai.provider, ai.model and ai.apiKey in ~/.prdforge/settings.json.")
        })
    }

    /// The product's editor, loading it on first use.
    async fn editor<'a>(
        &self,
        editors: &'a mut HashMap<String, FlowEditor>,
        product_id: &str,
    ) -> Result<&'a mut FlowEditor, CallToolResult> {
        if !editors.contains_key(product_id) {
            let editor = FlowEditor::load(self.store()?, product_id)
                .await
                .map_err(|e| editor_failure(&e))?;
            editors.insert(product_id.to_string(), editor);
        }
        editors
            .get_mut(product_id)
            .ok_or_else(|| failure(format!("Flow for product '{product_id}' is not loaded")))
    }

    async fn list_board<T: KanbanItem>(
        &self,
        product_id: &str,
        filter: &KanbanFilter,
    ) -> Result<CallToolResult, McpError> {
        let store = try_tool!(self.store());
        let board = match KanbanBoard::<T>::load(store, product_id).await {
            Ok(board) => board,
            Err(e) => return Ok(editor_failure(&e)),
        };
        let items: Vec<&T> = board.filter(filter);
        Ok(json_result(&items))
    }

    async fn move_on_board<T: KanbanItem>(
        &self,
        req: &MoveTaskRequest,
        status: ItemStatus,
    ) -> Result<CallToolResult, McpError> {
        let store = try_tool!(self.store());
        let mut board = match KanbanBoard::<T>::load(store, &req.product_id).await {
            Ok(board) => board,
            Err(e) => return Ok(editor_failure(&e)),
        };
        match board.move_to(&req.item_id, status, req.position).await {
            Ok(()) => Ok(json_result(&board.item(&req.item_id))),
            Err(e) => Ok(editor_failure(&e)),
        }
    }
}

#[tool_router]
impl ForgeServer {
    pub fn new(backends: Backends) -> Self {
        Self {
            tool_router: Self::tool_router(),
            backends: Arc::new(backends),
            editors: Arc::new(Mutex::new(HashMap::new())),
            layouts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[tool(
        description = "Load (or reload) a product's user-flow diagram from the backend. Discards undo history and any unsaved suggestion. Returns {productId, nodes: [{id, type, position: {x, y}, data: {name, description, layoutDescription, features}}], edges: [{id, source, target}], canUndo, canRedo, pendingPositions}."
    )]
    async fn load_flow(
        &self,
        Parameters(req): Parameters<ProductRequest>,
    ) -> Result<CallToolResult, McpError> {
        let store = try_tool!(self.store());
        let editor = match FlowEditor::load(store, &req.product_id).await {
            Ok(editor) => editor,
            Err(e) => return Ok(editor_failure(&e)),
        };
        let result = json_result(&FlowView::of(&editor));
        self.editors.lock().await.insert(req.product_id.clone(), editor);
        self.layouts.lock().await.remove(&req.product_id);
        Ok(result)
    }

    #[tool(description = "Get the current in-memory flow of a product (loads it on first use). Same shape as load_flow.")]
    async fn get_flow(
        &self,
        Parameters(req): Parameters<ProductRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        Ok(json_result(&FlowView::of(editor)))
    }

    #[tool(description = "Add a page to the flow. Without x/y the page is placed on the first free grid slot.")]
    async fn add_page(
        &self,
        Parameters(req): Parameters<AddPageRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        let data = PageData {
            name: req.name,
            description: req.description.unwrap_or_default(),
            layout_description: req.layout_description.unwrap_or_default(),
            features: req.features.unwrap_or_default(),
        };
        let position = match (req.x, req.y) {
            (Some(x), Some(y)) => Some(Position::new(x, y)),
            _ => None,
        };
        match editor.add_page(data, position).await {
            Ok(node) => Ok(json_result(&node)),
            Err(e) => Ok(editor_failure(&e)),
        }
    }

    #[tool(description = "Edit a page's name, description, layout description or feature list. Omitted fields are unchanged.")]
    async fn edit_page(
        &self,
        Parameters(req): Parameters<EditPageRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        let patch = PagePatch {
            name: req.name,
            description: req.description,
            layout_description: req.layout_description,
            features: req.features,
        };
        match editor.edit_page(&req.page_id, patch).await {
            Ok(node) => Ok(json_result(&node)),
            Err(e) => Ok(editor_failure(&e)),
        }
    }

    #[tool(
        description = "Move a page on the canvas. If the backend rejects the write the page still moves locally and the position is queued; call flush_positions to retry."
    )]
    async fn move_page(
        &self,
        Parameters(req): Parameters<MovePageRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        match editor.move_node(&req.page_id, Position::new(req.x, req.y)).await {
            Ok(true) => Ok(success(format!("Moved '{}' to ({}, {})", req.page_id, req.x, req.y))),
            Ok(false) => Ok(success(format!(
                "Moved '{}' locally, but the position was not saved ({}). It is queued; call flush_positions to retry.",
                req.page_id,
                editor.last_error().unwrap_or("unknown error")
            ))),
            Err(e) => Ok(editor_failure(&e)),
        }
    }

    #[tool(description = "Connect two pages with a directed transition (source -> target). Self-connections and duplicates are rejected.")]
    async fn connect_pages(
        &self,
        Parameters(req): Parameters<ConnectPagesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        match editor.connect(&req.source, &req.target).await {
            Ok(edge) => Ok(json_result(&edge)),
            Err(e) => Ok(editor_failure(&e)),
        }
    }

    #[tool(description = "Delete one connection by ID")]
    async fn delete_connection(
        &self,
        Parameters(req): Parameters<DeleteConnectionRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        match editor.delete_edge(&req.connection_id).await {
            Ok(()) => Ok(success(format!("Deleted connection '{}'", req.connection_id))),
            Err(e) => Ok(editor_failure(&e)),
        }
    }

    #[tool(description = "Delete a page together with every connection to or from it")]
    async fn delete_page(
        &self,
        Parameters(req): Parameters<DeletePageRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        match editor.delete_node(&req.page_id).await {
            Ok(()) => Ok(success(format!("Deleted page '{}'", req.page_id))),
            Err(e) => Ok(editor_failure(&e)),
        }
    }

    #[tool(
        description = "Undo the last flow change. Only the in-memory flow changes; the backend keeps its current rows until the next edit of the affected items."
    )]
    async fn undo(
        &self,
        Parameters(req): Parameters<ProductRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        if editor.undo() {
            Ok(json_result(&FlowView::of(editor)))
        } else {
            Ok(success("Nothing to undo."))
        }
    }

    #[tool(description = "Redo the last undone flow change (in memory only)")]
    async fn redo(
        &self,
        Parameters(req): Parameters<ProductRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        if editor.redo() {
            Ok(json_result(&FlowView::of(editor)))
        } else {
            Ok(success("Nothing to redo."))
        }
    }

    #[tool(description = "Retry saving page positions that failed to save earlier")]
    async fn flush_positions(
        &self,
        Parameters(req): Parameters<ProductRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        match editor.flush_outbox().await {
            Ok(n) => Ok(success(format!("Saved {n} queued position(s)"))),
            Err(e) => Ok(editor_failure(&e)),
        }
    }

    #[tool(
        description = "Ask the AI for a flow layout: positions for every page plus connections. Uses the current pages, the given `pages`, or pages generated from `brief`. Nothing is saved; review the result and call apply_layout."
    )]
    async fn suggest_flow(
        &self,
        Parameters(req): Parameters<SuggestFlowRequest>,
    ) -> Result<CallToolResult, McpError> {
        let gateway = try_tool!(self.gateway());
        let pages = match (req.pages, &req.brief) {
            (Some(pages), _) => Some(pages),
            (None, Some(brief)) => {
                let features = req.features.unwrap_or_default();
                match gateway.generate_flow(Some(&req.product_id), brief, &features).await {
                    Ok(pages) => Some(pages),
                    Err(e) => return Ok(gateway_failure(&e)),
                }
            }
            (None, None) => None,
        };

        // The model call runs without holding the editors lock.
        let input = {
            let mut editors = self.editors.lock().await;
            let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
            match editor.layout_input(pages) {
                Ok(input) => input,
                Err(e) => return Ok(editor_failure(&e)),
            }
        };
        match gateway.generate_flow_layout(Some(&req.product_id), &input).await {
            Ok(layout) => {
                let result = json_result(&layout);
                self.layouts.lock().await.insert(req.product_id, layout);
                Ok(result)
            }
            Err(e) => Ok(gateway_failure(&e)),
        }
    }

    #[tool(
        description = "Replace the product's whole flow with a layout (the last suggest_flow result by default). New rows are saved before old ones are removed; on failure the old flow is kept. Undoable in memory."
    )]
    async fn apply_layout(
        &self,
        Parameters(req): Parameters<ApplyLayoutRequest>,
    ) -> Result<CallToolResult, McpError> {
        let layout = match req.layout {
            Some(json) => match serde_json::from_str::<FlowLayout>(&json) {
                Ok(layout) => layout,
                Err(e) => return Ok(failure(format!("Invalid layout JSON: {e}"))),
            },
            None => match self.layouts.lock().await.get(&req.product_id) {
                Some(layout) => layout.clone(),
                None => {
                    return Ok(failure(
                        "No suggested layout for this product. Call suggest_flow first or pass `layout`.",
                    ))
                }
            },
        };

        let mut editors = self.editors.lock().await;
        let editor = try_tool!(self.editor(&mut editors, &req.product_id).await);
        match editor.apply_layout(layout).await {
            Ok(()) => {
                self.layouts.lock().await.remove(&req.product_id);
                Ok(json_result(&FlowView::of(editor)))
            }
            Err(e) => Ok(editor_failure(&e)),
        }
    }

    #[tool(description = "Generate customer personas for a product brief, ranked by score (0-100)")]
    async fn generate_personas(
        &self,
        Parameters(req): Parameters<GeneratePersonasRequest>,
    ) -> Result<CallToolResult, McpError> {
        let gateway = try_tool!(self.gateway());
        match gateway.generate_personas(req.product_id.as_deref(), &req.brief).await {
            Ok(personas) => Ok(json_result(&personas)),
            Err(e) => Ok(gateway_failure(&e)),
        }
    }

    #[tool(description = "Generate a first-release feature list (name, description, priority) for a product brief")]
    async fn generate_features(
        &self,
        Parameters(req): Parameters<GenerateFeaturesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let gateway = try_tool!(self.gateway());
        let personas = req.personas.unwrap_or_default();
        match gateway
            .generate_features(req.product_id.as_deref(), &req.brief, &personas)
            .await
        {
            Ok(features) => Ok(json_result(&features)),
            Err(e) => Ok(gateway_failure(&e)),
        }
    }

    #[tool(description = "Rewrite a piece of PRD text: improve, shorten, expand, formalize or simplify")]
    async fn rewrite_text(
        &self,
        Parameters(req): Parameters<RewriteTextRequest>,
    ) -> Result<CallToolResult, McpError> {
        let gateway = try_tool!(self.gateway());
        let request = GatewayRequest {
            kind: RequestKind::Rewrite,
            data: RequestData {
                text: Some(req.text),
                action: req.action,
                context: req.context,
            },
        };
        match gateway.rewrite_text(req.product_id.as_deref(), &request).await {
            Ok(text) => Ok(success(text)),
            Err(e) => Ok(gateway_failure(&e)),
        }
    }

    #[tool(description = "List kanban items (tasks or bugs) of a product, optionally filtered by status, priority, assignee or text")]
    async fn list_tasks(
        &self,
        Parameters(req): Parameters<ListTasksRequest>,
    ) -> Result<CallToolResult, McpError> {
        let status = match req.status.as_deref() {
            Some(s) => Some(try_tool!(parse_status(s))),
            None => None,
        };
        let priority = match req.priority.as_deref() {
            Some(p) => match Priority::parse(p) {
                Some(p) => Some(p),
                None => return Ok(failure(format!("Unknown priority '{p}'. Use low, medium or high."))),
            },
            None => None,
        };
        let filter = KanbanFilter {
            status,
            priority,
            assignee: req.assignee,
            text: req.text,
        };
        match req.board.as_deref().unwrap_or("tasks") {
            "tasks" => self.list_board::<TaskRow>(&req.product_id, &filter).await,
            "bugs" => self.list_board::<BugRow>(&req.product_id, &filter).await,
            other => Ok(failure(format!("Unknown board '{other}'. Use tasks or bugs."))),
        }
    }

    #[tool(description = "Move a kanban item (task or bug) to another column and/or position")]
    async fn move_task(
        &self,
        Parameters(req): Parameters<MoveTaskRequest>,
    ) -> Result<CallToolResult, McpError> {
        let status = try_tool!(parse_status(&req.status));
        match req.board.as_deref().unwrap_or("tasks") {
            "tasks" => self.move_on_board::<TaskRow>(&req, status).await,
            "bugs" => self.move_on_board::<BugRow>(&req, status).await,
            other => Ok(failure(format!("Unknown board '{other}'. Use tasks or bugs."))),
        }
    }

    #[tool(
        description = "Upload a screenshot or mockup for a product. The image is validated, re-encoded as JPEG and stored; returns {path, url, width, height} with a long-lived signed URL."
    )]
    async fn upload_image(
        &self,
        Parameters(req): Parameters<UploadImageRequest>,
    ) -> Result<CallToolResult, McpError> {
        let Some(files) = self.backends.files.clone() else {
            return Ok(failure("File storage is not configured."));
        };
        let raw = match base64::engine::general_purpose::STANDARD.decode(req.data_base64.trim()) {
            Ok(raw) => raw,
            Err(e) => return Ok(failure(format!("data_base64 is not valid base64: {e}"))),
        };
        match upload_image(files.as_ref(), &req.product_id, &raw, &self.backends.upload).await {
            Ok(uploaded) => Ok(json_result(&uploaded)),
            Err(e) => Ok(failure(format!("{} ({e})", e.user_message()))),
        }
    }
}

#[tool_handler]
impl ServerHandler for ForgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

const INSTRUCTIONS: &str = r#"prdforge edits the product requirement documents of PRD Forge: user-flow diagrams, kanban boards and AI-generated content.

## User flow
A product's flow is a directed graph. Pages (nodes) have a name, description, layout description and feature list; connections (edges) are transitions from a source page to a target page.
1. Call `load_flow` (or `get_flow`) to see the pages and connection IDs.
2. Edit with `add_page`, `edit_page`, `move_page`, `connect_pages`, `delete_connection`, `delete_page`.
3. `undo` / `redo` step through your changes in memory only. The backend is not rolled back.
4. If `move_page` reports a queued position, call `flush_positions` once the backend is reachable.

## Regenerating a flow
`suggest_flow` proposes positions and connections (from the current pages, from pages you pass, or from a product brief). Review it, then call `apply_layout` to replace the whole flow. If saving fails the old flow stays.

## Content
`generate_personas`, `generate_features` and `rewrite_text` call the configured AI provider. Errors come back as short messages safe to show a user.

## Kanban
`list_tasks` and `move_task` work on the "tasks" board by default; pass `board: "bugs"` for bugs. Columns are todo, in_progress, review and done."#;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prdforge_core::Table;
    use prdforge_store::MemoryStore;
    use prdforge_suggest::{ChatEngine, Completion};
    use serde_json::json;

    struct Canned(&'static str);

    #[async_trait]
    impl ChatEngine for Canned {
        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<Completion, GatewayError> {
            Ok(Completion {
                text: self.0.to_string(),
                usage: None,
            })
        }
    }

    fn server(store: Arc<MemoryStore>, reply: &'static str) -> ForgeServer {
        ForgeServer::new(Backends {
            store: Some(store.clone() as Arc<dyn DataStore>),
            files: Some(store.clone() as Arc<dyn ObjectStorage>),
            gateway: Some(Gateway::new(Arc::new(Canned(reply))).with_audit(store)),
            upload: UploadSettings::default(),
        })
    }

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            Table::FlowPages,
            vec![
                json!({"id": "a", "product_id": "p1", "name": "Home", "position_x": 0.0, "position_y": 0.0}),
                json!({"id": "b", "product_id": "p1", "name": "Cart", "position_x": 300.0, "position_y": 0.0}),
            ],
        );
        store
    }

    fn is_error(result: &CallToolResult) -> bool {
        result.is_error == Some(true)
    }

    #[tokio::test]
    async fn edits_go_through_one_editor_per_product() {
        let store = seeded();
        let server = server(store.clone(), "{}");
        let params = |source: &str, target: &str| {
            Parameters(ConnectPagesRequest {
                product_id: "p1".into(),
                source: source.into(),
                target: target.into(),
            })
        };

        assert!(!is_error(&server.connect_pages(params("a", "b")).await.unwrap()));
        assert!(is_error(&server.connect_pages(params("a", "b")).await.unwrap()));
        assert_eq!(store.count(Table::FlowConnections), 1);

        let undo = server
            .undo(Parameters(ProductRequest { product_id: "p1".into() }))
            .await
            .unwrap();
        assert!(!is_error(&undo));
        let editors = server.editors.lock().await;
        assert!(editors["p1"].graph().edges().is_empty());
    }

    #[tokio::test]
    async fn suggested_layout_is_applied_on_request() {
        let store = seeded();
        let server = server(
            store.clone(),
            r#"{"pages":[{"id":"a","name":"Home","position":{"x":0,"y":0}},
                         {"id":"b","name":"Cart","position":{"x":300,"y":0}}],
                "connections":[{"source":"a","target":"b"}]}"#,
        );

        let apply = |layout: Option<String>| {
            Parameters(ApplyLayoutRequest { product_id: "p1".into(), layout })
        };
        assert!(is_error(&server.apply_layout(apply(None)).await.unwrap()));

        let suggested = server
            .suggest_flow(Parameters(SuggestFlowRequest {
                product_id: "p1".into(),
                pages: None,
                brief: None,
                features: None,
            }))
            .await
            .unwrap();
        assert!(!is_error(&suggested));
        assert_eq!(store.count(Table::FlowConnections), 0);

        assert!(!is_error(&server.apply_layout(apply(None)).await.unwrap()));
        assert_eq!(store.count(Table::FlowPages), 2);
        assert_eq!(store.count(Table::FlowConnections), 1);
        assert_eq!(store.count(Table::OpenaiLogs), 1);
    }

    #[tokio::test]
    async fn unknown_status_is_rejected_before_loading() {
        let store = Arc::new(MemoryStore::new());
        let server = server(store.clone(), "{}");
        let result = server
            .move_task(Parameters(MoveTaskRequest {
                product_id: "p1".into(),
                board: None,
                item_id: "t1".into(),
                status: "blocked".into(),
                position: None,
            }))
            .await
            .unwrap();
        assert!(is_error(&result));
        assert_eq!(store.calls(Table::Tasks, prdforge_store::Op::Select), 0);
    }

    #[tokio::test]
    async fn missing_store_is_reported() {
        let server = ForgeServer::new(Backends {
            store: None,
            files: None,
            gateway: None,
            upload: UploadSettings::default(),
        });
        let result = server
            .get_flow(Parameters(ProductRequest { product_id: "p1".into() }))
            .await
            .unwrap();
        assert!(is_error(&result));
    }

    struct Gated {
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl ChatEngine for Gated {
        fn model(&self) -> &str {
            "gated"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<Completion, GatewayError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Completion {
                text: r#"{"pages":[{"id":"a","name":"Home"},{"id":"b","name":"Cart"}]}"#.into(),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn flow_tools_stay_usable_while_a_layout_is_generated() {
        let store = seeded();
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let server = ForgeServer::new(Backends {
            store: Some(store.clone() as Arc<dyn DataStore>),
            files: None,
            gateway: Some(Gateway::new(Arc::new(Gated {
                entered: entered.clone(),
                release: release.clone(),
            }))),
            upload: UploadSettings::default(),
        });

        let suggest = server.suggest_flow(Parameters(SuggestFlowRequest {
            product_id: "p1".into(),
            pages: None,
            brief: None,
            features: None,
        }));
        let meanwhile = async {
            entered.notified().await;
            let flow = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                server.get_flow(Parameters(ProductRequest { product_id: "p1".into() })),
            )
            .await;
            release.notify_one();
            flow
        };
        let (suggested, flow) = tokio::join!(suggest, meanwhile);

        let flow = flow.expect("get_flow waited for the model call").unwrap();
        assert!(!is_error(&flow));
        assert!(!is_error(&suggested.unwrap()));
    }
}
