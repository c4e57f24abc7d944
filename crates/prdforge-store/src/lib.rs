pub mod error;
pub mod memory;
pub mod query;
pub mod rest;
pub mod storage;

pub use error::StoreError;
pub use memory::{MemoryStore, Op};
pub use query::{Filter, Query};
pub use rest::RestStore;
pub use storage::{upload_image, ObjectStorage, PreparedImage, UploadedImage};

use async_trait::async_trait;
use prdforge_core::{Record, Table};
use serde_json::Value;
use tracing::debug;

/// Table-oriented CRUD against the hosted backend. Rows are JSON objects.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// Insert rows, returning them as stored (with server-assigned ids).
    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, StoreError>;

    /// Apply `patch` to every matching row, returning the updated rows.
    async fn update(&self, table: Table, query: &Query, patch: Value)
        -> Result<Vec<Value>, StoreError>;

    /// Delete every matching row, returning how many went.
    async fn delete(&self, table: Table, query: &Query) -> Result<usize, StoreError>;
}

// --- Typed helpers ---

fn decode<R: Record>(rows: Vec<Value>) -> Result<Vec<R>, StoreError> {
    rows.into_iter()
        .map(|v| {
            serde_json::from_value(v).map_err(|source| StoreError::Decode {
                table: R::TABLE,
                source,
            })
        })
        .collect()
}

pub fn product_query(product_id: &str) -> Query {
    Query::new().eq("product_id", product_id)
}

pub async fn fetch<R, S>(store: &S, query: &Query) -> Result<Vec<R>, StoreError>
where
    R: Record,
    S: DataStore + ?Sized,
{
    let rows = store.select(R::TABLE, query).await?;
    debug!(table = %R::TABLE, count = rows.len(), "fetched rows");
    decode(rows)
}

pub async fn fetch_for_product<R, S>(store: &S, product_id: &str) -> Result<Vec<R>, StoreError>
where
    R: Record,
    S: DataStore + ?Sized,
{
    fetch(store, &product_query(product_id)).await
}

pub async fn insert_one<R, S>(store: &S, row: &R) -> Result<R, StoreError>
where
    R: Record,
    S: DataStore + ?Sized,
{
    let value = serde_json::to_value(row)?;
    let stored = store.insert(R::TABLE, vec![value]).await?;
    decode::<R>(stored)?
        .into_iter()
        .next()
        .ok_or(StoreError::EmptyResult(R::TABLE))
}

pub async fn insert_many<R, S>(store: &S, rows: &[R]) -> Result<Vec<R>, StoreError>
where
    R: Record,
    S: DataStore + ?Sized,
{
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let values = rows
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    decode(store.insert(R::TABLE, values).await?)
}

pub async fn update_by_id<R, S>(store: &S, id: &str, patch: Value) -> Result<R, StoreError>
where
    R: Record,
    S: DataStore + ?Sized,
{
    let rows = store
        .update(R::TABLE, &Query::new().eq("id", id), patch)
        .await?;
    decode::<R>(rows)?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(format!("{} {}", R::TABLE, id)))
}

/// Delete one row. `Ok(false)` when it was already gone.
pub async fn delete_by_id<R, S>(store: &S, id: &str) -> Result<bool, StoreError>
where
    R: Record,
    S: DataStore + ?Sized,
{
    let n = store.delete(R::TABLE, &Query::new().eq("id", id)).await?;
    Ok(n > 0)
}

pub async fn delete_ids<R, S>(store: &S, ids: &[String]) -> Result<usize, StoreError>
where
    R: Record,
    S: DataStore + ?Sized,
{
    if ids.is_empty() {
        return Ok(0);
    }
    store
        .delete(R::TABLE, &Query::new().is_in("id", ids.iter().cloned()))
        .await
}

pub async fn delete_for_product<R, S>(store: &S, product_id: &str) -> Result<usize, StoreError>
where
    R: Record,
    S: DataStore + ?Sized,
{
    store.delete(R::TABLE, &product_query(product_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use prdforge_core::{FlowPageRow, PageData, Position};
    use serde_json::json;

    fn page(product: &str, name: &str) -> FlowPageRow {
        FlowPageRow::new(
            product,
            &PageData { name: name.into(), ..Default::default() },
            Position::new(0.0, 0.0),
        )
    }

    #[tokio::test]
    async fn typed_round_trip_through_memory_store() {
        let store = MemoryStore::new();
        let a = insert_one(&store, &page("p1", "Home")).await.unwrap();
        assert!(!a.id.is_empty());
        insert_many(&store, &[page("p1", "Cart"), page("p2", "Other")]).await.unwrap();

        let rows: Vec<FlowPageRow> = fetch_for_product(&store, "p1").await.unwrap();
        assert_eq!(rows.len(), 2);

        let updated: FlowPageRow = update_by_id(&store, &a.id, json!({"position_x": 42.0}))
            .await
            .unwrap();
        assert_eq!(updated.position_x, 42.0);

        assert!(delete_by_id::<FlowPageRow, _>(&store, &a.id).await.unwrap());
        assert!(!delete_by_id::<FlowPageRow, _>(&store, &a.id).await.unwrap());
        assert_eq!(delete_for_product::<FlowPageRow, _>(&store, "p1").await.unwrap(), 1);
        assert_eq!(store.count(Table::FlowPages), 1);
    }

    #[tokio::test]
    async fn update_of_missing_row_is_not_found() {
        let store = MemoryStore::new();
        let err = update_by_id::<FlowPageRow, _>(&store, "ghost", json!({"name": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn undecodable_rows_report_table() {
        let store = MemoryStore::new();
        store.seed(Table::FlowPages, vec![json!({"id": "x", "product_id": "p1"})]);
        let err = fetch_for_product::<FlowPageRow, _>(&store, "p1").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { table: Table::FlowPages, .. }));
    }
}
