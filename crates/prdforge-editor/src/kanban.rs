//! Kanban board over tasks or bugs of one product.

use std::sync::Arc;

use prdforge_core::{BugRow, ItemStatus, Priority, Record, TaskRow};
use prdforge_store::{delete_by_id, fetch, insert_one, product_query, update_by_id, DataStore};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::EditorError;

/// A row that can live on a kanban board.
pub trait KanbanItem: Record + Clone {
    fn title(&self) -> &str;
    fn description(&self) -> &str;
    fn status(&self) -> ItemStatus;
    fn priority(&self) -> Priority;
    fn assignee(&self) -> Option<&str>;
    fn position(&self) -> i64;
    fn place(&mut self, status: ItemStatus, position: i64);
}

macro_rules! kanban_item {
    ($row:ty) => {
        impl KanbanItem for $row {
            fn title(&self) -> &str {
                &self.title
            }
            fn description(&self) -> &str {
                &self.description
            }
            fn status(&self) -> ItemStatus {
                self.status
            }
            fn priority(&self) -> Priority {
                self.priority
            }
            fn assignee(&self) -> Option<&str> {
                self.assignee.as_deref()
            }
            fn position(&self) -> i64 {
                self.position
            }
            fn place(&mut self, status: ItemStatus, position: i64) {
                self.status = status;
                self.position = position;
            }
        }
    };
}

kanban_item!(TaskRow);
kanban_item!(BugRow);

/// Criteria are combined; `None` matches everything.
#[derive(Debug, Clone, Default)]
pub struct KanbanFilter {
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    /// Case-insensitive match against title and description
    pub text: Option<String>,
}

impl KanbanFilter {
    pub fn matches<T: KanbanItem>(&self, item: &T) -> bool {
        if self.status.is_some_and(|s| s != item.status()) {
            return false;
        }
        if self.priority.is_some_and(|p| p != item.priority()) {
            return false;
        }
        if let Some(assignee) = &self.assignee {
            if item.assignee() != Some(assignee.as_str()) {
                return false;
            }
        }
        match self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => {
                let needle = text.to_lowercase();
                item.title().to_lowercase().contains(&needle)
                    || item.description().to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

pub struct KanbanBoard<T: KanbanItem> {
    product_id: String,
    store: Arc<dyn DataStore>,
    items: Vec<T>,
    last_error: Option<String>,
}

impl<T: KanbanItem> KanbanBoard<T> {
    pub async fn load(store: Arc<dyn DataStore>, product_id: &str) -> Result<Self, EditorError> {
        let query = product_query(product_id).order_by("position", true);
        let items = fetch::<T, _>(store.as_ref(), &query).await?;
        debug!(product_id, table = %T::TABLE, count = items.len(), "board loaded");
        Ok(Self {
            product_id: product_id.to_string(),
            store,
            items,
            last_error: None,
        })
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|i| i.id() == id)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Items with `status`, ordered by position.
    pub fn column(&self, status: ItemStatus) -> Vec<&T> {
        let mut column: Vec<&T> = self.items.iter().filter(|i| i.status() == status).collect();
        column.sort_by_key(|i| i.position());
        column
    }

    pub fn columns(&self) -> Vec<(ItemStatus, Vec<&T>)> {
        ItemStatus::ALL.into_iter().map(|s| (s, self.column(s))).collect()
    }

    pub fn filter(&self, filter: &KanbanFilter) -> Vec<&T> {
        self.items.iter().filter(|i| filter.matches(*i)).collect()
    }

    fn fail<R>(&mut self, err: impl Into<EditorError>) -> Result<R, EditorError> {
        let err = err.into();
        warn!(product_id = %self.product_id, table = %T::TABLE, error = %err, "board operation failed");
        self.last_error = Some(err.user_message());
        Err(err)
    }

    fn next_position(&self, status: ItemStatus) -> i64 {
        self.column(status).last().map_or(0, |i| i.position() + 1)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.id() == id)
    }

    /// Store a new item at the end of its column.
    pub async fn create(&mut self, mut item: T) -> Result<T, EditorError> {
        if item.title().trim().is_empty() {
            return self.fail(EditorError::Validation("title is required".into()));
        }
        let status = item.status();
        item.place(status, self.next_position(status));
        match insert_one(self.store.as_ref(), &item).await {
            Ok(stored) => {
                self.items.push(stored.clone());
                Ok(stored)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Save the fields of `item` that differ from the loaded copy. Columns
    /// left unchanged are not sent, so concurrent edits to them survive.
    pub async fn update(&mut self, item: T) -> Result<T, EditorError> {
        let Some(index) = self.index_of(item.id()) else {
            return self.fail(EditorError::Validation(format!("no item {}", item.id())));
        };
        if item.title().trim().is_empty() {
            return self.fail(EditorError::Validation("title is required".into()));
        }
        let columns = serde_json::to_value(&self.items[index])
            .and_then(|before| Ok((before, serde_json::to_value(&item)?)));
        let patch = match columns {
            Ok((before, after)) => changed_columns(&before, &after),
            Err(e) => return self.fail(prdforge_store::StoreError::from(e)),
        };
        if patch.is_empty() {
            return Ok(self.items[index].clone());
        }
        match update_by_id::<T, _>(self.store.as_ref(), item.id(), Value::Object(patch)).await {
            Ok(stored) => {
                self.items[index] = stored.clone();
                Ok(stored)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Move an item to `status`, at `position` or the end of the column.
    /// Applied locally first and rolled back if the backend refuses.
    pub async fn move_to(
        &mut self,
        id: &str,
        status: ItemStatus,
        position: Option<i64>,
    ) -> Result<(), EditorError> {
        let Some(index) = self.index_of(id) else {
            return self.fail(EditorError::Validation(format!("no item {id}")));
        };
        let previous = self.items[index].clone();
        let position = position.unwrap_or_else(|| self.next_position(status));
        self.items[index].place(status, position);

        let patch = json!({ "status": status, "position": position });
        match update_by_id::<T, _>(self.store.as_ref(), id, patch).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.items[index] = previous;
                self.fail(e)
            }
        }
    }

    pub async fn delete(&mut self, id: &str) -> Result<(), EditorError> {
        let Some(index) = self.index_of(id) else {
            return self.fail(EditorError::Validation(format!("no item {id}")));
        };
        if let Err(e) = delete_by_id::<T, _>(self.store.as_ref(), id).await {
            return self.fail(e);
        }
        self.items.remove(index);
        Ok(())
    }
}

/// Columns whose value differs between two encodings of the same row.
/// A column missing from `after` was cleared and is sent as null.
fn changed_columns(before: &Value, after: &Value) -> Map<String, Value> {
    let empty = Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);
    let mut patch = Map::new();
    for (column, value) in after {
        if column != "id" && before.get(column) != Some(value) {
            patch.insert(column.clone(), value.clone());
        }
    }
    for column in before.keys() {
        if column != "id" && !after.contains_key(column) {
            patch.insert(column.clone(), Value::Null);
        }
    }
    patch
}
