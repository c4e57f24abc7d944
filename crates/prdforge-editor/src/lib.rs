pub mod error;
pub mod flow;
pub mod kanban;

pub use error::EditorError;
pub use flow::FlowEditor;
pub use kanban::{KanbanBoard, KanbanFilter, KanbanItem};
