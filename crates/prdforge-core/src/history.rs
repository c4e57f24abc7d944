use crate::{FlowGraph, GraphSnapshot};

/// Undo/redo stacks of whole-graph snapshots.
///
/// Unbounded and in-memory only; they live as long as the editor that owns them.
#[derive(Debug, Clone, Default)]
pub struct History {
    undo: Vec<GraphSnapshot>,
    redo: Vec<GraphSnapshot>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push the pre-mutation state. Any redo branch is discarded.
    pub fn record(&mut self, before: GraphSnapshot) {
        self.undo.push(before);
        self.redo.clear();
    }

    /// Pop the last snapshot, parking `current` on the redo stack.
    pub fn undo(&mut self, current: GraphSnapshot) -> Option<GraphSnapshot> {
        let previous = self.undo.pop()?;
        self.redo.push(current);
        Some(previous)
    }

    /// Mirror of [`undo`](Self::undo).
    pub fn redo(&mut self, current: GraphSnapshot) -> Option<GraphSnapshot> {
        let next = self.redo.pop()?;
        self.undo.push(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

/// A graph together with its history. Only in-memory state; callers decide
/// when a change is committed.
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    pub graph: FlowGraph,
    pub history: History,
}

impl FlowState {
    pub fn new(graph: FlowGraph) -> Self {
        Self {
            graph,
            history: History::new(),
        }
    }

    /// Run a mutation, recording the pre-mutation snapshot only if it succeeds.
    pub fn mutate<T, E>(&mut self, f: impl FnOnce(&mut FlowGraph) -> Result<T, E>) -> Result<T, E> {
        let before = self.graph.snapshot();
        match f(&mut self.graph) {
            Ok(value) => {
                self.history.record(before);
                Ok(value)
            }
            Err(e) => {
                self.graph.restore(before);
                Err(e)
            }
        }
    }

    pub fn undo(&mut self) -> bool {
        match self.history.undo(self.graph.snapshot()) {
            Some(previous) => {
                self.graph.restore(previous);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo(self.graph.snapshot()) {
            Some(next) => {
                self.graph.restore(next);
                true
            }
            None => false,
        }
    }
}
