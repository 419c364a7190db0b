//! WMS client: destination for master data and orders, source of completed
//! shipments and receipts, and blob store for item pictures.
//!
//! The WMS has no idempotency key, so writes look the entity up by natural key
//! first and then update (`PUT`) or create (`POST`).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use wms_bridge_core::contract::{
    BlobStore, CompletedItem, CompletedItemSource, MappedEntity, TargetWriter,
};
use wms_bridge_core::entity::{EntityKind, Scope, UploadFlow};
use wms_bridge_core::error::ContractError;
use wms_bridge_core::mapping::upload_profile;
use wms_bridge_core::record::Record;

use crate::http::{build_client, endpoint, ensure_success, send_with_retry, ClientError, HttpSettings};

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Debug, Clone)]
pub struct WmsClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub http: HttpSettings,
}

#[derive(Clone)]
pub struct WmsClient {
    client: Client,
    config: WmsClientConfig,
}

/// WMS collection receiving each entity kind.
pub fn resource(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Item => "products",
        EntityKind::ItemGroup => "product_groups",
        EntityKind::Customer => "customers",
        EntityKind::Supplier => "suppliers",
        EntityKind::SalesOrder => "orders",
        EntityKind::PurchaseOrder => "inbound_orders",
    }
}

/// WMS collection listing completed work for each upload flow.
pub fn completed_resource(flow: UploadFlow) -> &'static str {
    match flow {
        UploadFlow::Shipments => "shipments",
        UploadFlow::Receipts => "receipts",
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing {
    Wrapped { results: Vec<Value> },
    Bare(Vec<Value>),
}

impl Listing {
    fn into_items(self) -> Vec<Value> {
        match self {
            Listing::Wrapped { results } => results,
            Listing::Bare(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StoredBlob {
    url: String,
}

impl WmsClient {
    pub fn new(config: WmsClientConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(&config.http)?;
        Ok(Self { client, config })
    }

    async fn exists(&self, scope: &Scope, kind: EntityKind, key: &str) -> Result<bool, ClientError> {
        let url = endpoint(&self.config.base_url, &[scope.as_str(), resource(kind), key])?;
        let response = send_with_retry(self.config.http.max_retries, || {
            self.client
                .get(url.clone())
                .header(API_KEY_HEADER, &self.config.api_key)
        })
        .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response).await?;
        Ok(true)
    }
}

#[async_trait]
impl TargetWriter for WmsClient {
    async fn upsert(
        &self,
        scope: &Scope,
        kind: EntityKind,
        entity: &MappedEntity,
    ) -> Result<(), ContractError> {
        let key = entity.key.as_str();
        let exists = self.exists(scope, kind, key).await?;
        let response = if exists {
            let url = endpoint(&self.config.base_url, &[scope.as_str(), resource(kind), key])?;
            send_with_retry(self.config.http.max_retries, || {
                self.client
                    .put(url.clone())
                    .header(API_KEY_HEADER, &self.config.api_key)
                    .json(&entity.payload)
            })
            .await?
        } else {
            let url = endpoint(&self.config.base_url, &[scope.as_str(), resource(kind)])?;
            send_with_retry(self.config.http.max_retries, || {
                self.client
                    .post(url.clone())
                    .header(API_KEY_HEADER, &self.config.api_key)
                    .json(&entity.payload)
            })
            .await?
        };
        ensure_success(response).await?;
        tracing::debug!(%scope, entity = %kind, %key, updated = exists, "WMS upsert done");
        Ok(())
    }
}

#[async_trait]
impl CompletedItemSource for WmsClient {
    async fn poll_completed(
        &self,
        scope: &Scope,
        flow: UploadFlow,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompletedItem>, ContractError> {
        let url = endpoint(&self.config.base_url, &[scope.as_str(), completed_resource(flow)])?;
        let query = [
            ("status", "completed".to_string()),
            ("processed", "false".to_string()),
            ("completed_since", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ];
        let response = send_with_retry(self.config.http.max_retries, || {
            self.client
                .get(url.clone())
                .header(API_KEY_HEADER, &self.config.api_key)
                .query(&query)
        })
        .await?;
        let listing = ensure_success(response).await?.json::<Listing>().await?;

        let profile = upload_profile(flow);
        let items: Vec<CompletedItem> = listing
            .into_items()
            .iter()
            .map(|raw| {
                let record = Record::from_json(raw);
                CompletedItem {
                    item_id: profile.item_id(&record).unwrap_or_default(),
                    completed_at: profile.completed_at(&record),
                    record,
                }
            })
            .collect();
        tracing::info!(%scope, flow = %flow, count = items.len(), "polled completed WMS items");
        Ok(items)
    }

    async fn mark_processed(
        &self,
        scope: &Scope,
        flow: UploadFlow,
        item_id: &str,
    ) -> Result<(), ContractError> {
        let url = endpoint(
            &self.config.base_url,
            &[scope.as_str(), completed_resource(flow), item_id, "processed"],
        )?;
        let response = send_with_retry(self.config.http.max_retries, || {
            self.client
                .post(url.clone())
                .header(API_KEY_HEADER, &self.config.api_key)
        })
        .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for WmsClient {
    async fn put_blob(&self, scope: &Scope, hash: &str, bytes: &[u8]) -> Result<String, ContractError> {
        let url = endpoint(&self.config.base_url, &[scope.as_str(), "images", hash])?;
        let response = send_with_retry(self.config.http.max_retries, || {
            self.client
                .put(url.clone())
                .header(API_KEY_HEADER, &self.config.api_key)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.to_vec())
        })
        .await?;
        let stored = ensure_success(response).await?.json::<StoredBlob>().await?;
        Ok(stored.url)
    }
}
