//! PostgREST-style client for the hosted backend.

use std::time::Duration;

use async_trait::async_trait;
use prdforge_core::{StoreSettings, Table};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::storage::ObjectStorage;
use crate::{DataStore, Query, StoreError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestStore {
    pub fn new(settings: &StoreSettings) -> Result<Self, StoreError> {
        if settings.url.is_empty() || settings.api_key.is_empty() {
            return Err(StoreError::Config("store url and api key are required".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(
                settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            access_token: settings.access_token.clone(),
        })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        rb.header("apikey", &self.api_key).bearer_auth(token)
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!(status = status.as_u16(), body = %body, "store request failed");
        Err(StoreError::from_status(status.as_u16(), body))
    }

    async fn rows(rb: RequestBuilder) -> Result<Vec<Value>, StoreError> {
        let response = Self::check(rb.send().await?).await?;
        // 204 / empty body when the server was asked for no representation
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&text)? {
            Value::Array(rows) => Ok(rows),
            other => Ok(vec![other]),
        }
    }
}

#[async_trait]
impl DataStore for RestStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        debug!(table = %table, "select");
        let rb = self
            .authed(self.client.get(self.table_url(table)))
            .query(&[("select", "*")])
            .query(&query.to_params());
        Self::rows(rb).await
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        debug!(table = %table, count = rows.len(), "insert");
        let rb = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(&rows);
        Self::rows(rb).await
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        debug!(table = %table, "update");
        let rb = self
            .authed(self.client.patch(self.table_url(table)))
            .header("Prefer", "return=representation")
            .query(&query.to_params())
            .json(&patch);
        Self::rows(rb).await
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<usize, StoreError> {
        if query.filters().is_empty() {
            // PostgREST refuses unfiltered deletes; so do we.
            return Err(StoreError::Config(format!("refusing unfiltered delete on {table}")));
        }
        debug!(table = %table, "delete");
        let rb = self
            .authed(self.client.delete(self.table_url(table)))
            .header("Prefer", "return=representation")
            .query(&query.to_params());
        Ok(Self::rows(rb).await?.len())
    }
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

#[async_trait]
impl ObjectStorage for RestStore {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let rb = self
            .authed(self.client.post(self.object_url(bucket, path)))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes);
        Self::check(rb.send().await?).await?;
        Ok(())
    }

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, StoreError> {
        let url = format!("{}/storage/v1/object/sign/{}/{}", self.base_url, bucket, path);
        let rb = self
            .authed(self.client.post(url))
            .json(&json!({ "expiresIn": expires_in_secs }));
        let response = Self::check(rb.send().await?).await?;
        let signed: SignedUrlResponse = response.json().await?;
        Ok(format!("{}/storage/v1{}", self.base_url, signed.signed_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> StoreSettings {
        StoreSettings {
            url: url.into(),
            api_key: "anon".into(),
            ..Default::default()
        }
    }

    #[test]
    fn requires_url_and_key() {
        assert!(matches!(
            RestStore::new(&StoreSettings::default()),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn builds_endpoint_urls() {
        let store = RestStore::new(&settings("https://proj.example.co/")).unwrap();
        assert_eq!(
            store.table_url(Table::FlowPages),
            "https://proj.example.co/rest/v1/flow_pages"
        );
        assert_eq!(
            store.object_url("screenshots", "p/1.jpg"),
            "https://proj.example.co/storage/v1/object/screenshots/p/1.jpg"
        );
    }

    #[tokio::test]
    async fn unfiltered_delete_is_refused() {
        let store = RestStore::new(&settings("https://proj.example.co")).unwrap();
        let err = store.delete(Table::Tasks, &Query::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
