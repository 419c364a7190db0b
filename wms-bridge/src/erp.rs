//! ERP client: the source of master data and orders, and the sink for
//! delivery/receipt documents.
//!
//! Lists are paged. Every page carries `results` and an optional `next` link
//! that is followed verbatim until absent. A page that fails after earlier
//! pages succeeded yields a partial batch instead of an error, so the job can
//! still process what was read (and holds its watermark).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use wms_bridge_core::contract::{AssetFetcher, DocumentSink, FetchWindow, SourceBatch, SourceReader};
use wms_bridge_core::entity::{EntityKind, Scope, UploadFlow};
use wms_bridge_core::error::ContractError;
use wms_bridge_core::mapping::entity_profile;
use wms_bridge_core::record::Record;
use wms_bridge_core::store::epoch;

use crate::http::{build_client, endpoint, ensure_success, send_with_retry, ClientError, HttpSettings};

#[derive(Debug, Clone)]
pub struct ErpClientConfig {
    pub base_url: String,
    pub api_token: String,
    pub page_size: usize,
    pub http: HttpSettings,
}

#[derive(Clone)]
pub struct ErpClient {
    client: Client,
    config: ErpClientConfig,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default, alias = "__next")]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: Value,
}

/// ERP collection holding each entity kind.
pub fn resource(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Item => "items",
        EntityKind::ItemGroup => "item_groups",
        EntityKind::Customer => "accounts",
        EntityKind::Supplier => "suppliers",
        EntityKind::SalesOrder => "sales_orders",
        EntityKind::PurchaseOrder => "purchase_orders",
    }
}

/// ERP document type created for each upload flow.
pub fn document(flow: UploadFlow) -> &'static str {
    match flow {
        UploadFlow::Shipments => "goods_deliveries",
        UploadFlow::Receipts => "purchase_receipts",
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl ErpClient {
    pub fn new(config: ErpClientConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(&config.http)?;
        Ok(Self { client, config })
    }

    async fn get_page(&self, url: &str, query: &[(&str, String)]) -> Result<Page, ClientError> {
        let response = send_with_retry(self.config.http.max_retries, || {
            self.client
                .get(url)
                .bearer_auth(&self.config.api_token)
                .query(query)
        })
        .await?;
        let page = ensure_success(response).await?.json::<Page>().await?;
        Ok(page)
    }

    /// Follows `next` links until exhausted or `limit` records were read.
    async fn fetch_all(
        &self,
        scope: &Scope,
        kind: EntityKind,
        window: &FetchWindow,
    ) -> Result<SourceBatch, ClientError> {
        let first = endpoint(&self.config.base_url, &[scope.as_str(), resource(kind)])?;
        let page_size = window
            .limit
            .map_or(self.config.page_size, |limit| limit.min(self.config.page_size))
            .max(1);
        let mut query = vec![("page_size", page_size.to_string())];
        if window.since > epoch() {
            query.push(("modified_since", timestamp(window.since)));
        }
        if let Some(until) = window.until {
            query.push(("modified_until", timestamp(until)));
        }
        if let Some(lines) = &entity_profile(kind).lines {
            query.push(("expand", lines.source.to_string()));
        }

        let mut records = Vec::new();
        let mut next = Some(first.to_string());
        let mut is_first = true;
        while let Some(url) = next.take() {
            // `next` links already carry the query
            let params: &[(&str, String)] = if is_first { &query } else { &[] };
            let page = match self.get_page(&url, params).await {
                Ok(page) => page,
                Err(e) if is_first => return Err(e),
                Err(e) => {
                    tracing::warn!(%scope, entity = %kind, read = records.len(), error = %e, "page failed, returning partial batch");
                    return Ok(SourceBatch::partial(records));
                }
            };
            is_first = false;
            records.extend(page.results.iter().map(Record::from_json));
            if let Some(limit) = window.limit {
                if records.len() >= limit {
                    let more = records.len() > limit || page.next.is_some();
                    records.truncate(limit);
                    return Ok(if more {
                        SourceBatch::partial(records)
                    } else {
                        SourceBatch::complete(records)
                    });
                }
            }
            next = page.next.filter(|n| !n.is_empty());
        }
        tracing::info!(%scope, entity = %kind, fetched = records.len(), "fetched candidates from ERP");
        Ok(SourceBatch::complete(records))
    }
}

#[async_trait]
impl SourceReader for ErpClient {
    async fn fetch(
        &self,
        scope: &Scope,
        kind: EntityKind,
        window: &FetchWindow,
    ) -> Result<SourceBatch, ContractError> {
        Ok(self.fetch_all(scope, kind, window).await?)
    }
}

#[async_trait]
impl DocumentSink for ErpClient {
    async fn submit(
        &self,
        scope: &Scope,
        flow: UploadFlow,
        document_body: &Value,
    ) -> Result<String, ContractError> {
        let url = endpoint(&self.config.base_url, &[scope.as_str(), document(flow)])?;
        let response = send_with_retry(self.config.http.max_retries, || {
            self.client
                .post(url.clone())
                .bearer_auth(&self.config.api_token)
                .json(document_body)
        })
        .await?;
        let created = ensure_success(response).await?.json::<Created>().await?;
        let id = match created.id {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => return Err(ClientError::Payload(format!("document id {other}")).into()),
        };
        tracing::info!(%scope, flow = %flow, document_id = %id, "ERP document created");
        Ok(id)
    }
}

#[async_trait]
impl AssetFetcher for ErpClient {
    async fn fetch_asset(&self, _scope: &Scope, url: &str) -> Result<Vec<u8>, ContractError> {
        let response = send_with_retry(self.config.http.max_retries, || {
            self.client.get(url).bearer_auth(&self.config.api_token)
        })
        .await?;
        let bytes = ensure_success(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}
