#![allow(unused)]

//! # contract: capability interfaces at the edge of the sync engine
//!
//! The jobs in this crate never talk HTTP. They consume the traits below, which
//! the binary crate implements for the real ERP and WMS and which tests replace
//! with `mockall` mocks.
//!
//! ## Interface & Extensibility
//! - [`SourceReader`]: paginated, watermark-bounded retrieval of candidate records.
//! - [`TargetWriter`]: idempotent upsert of mapped entities into the destination.
//! - [`CompletedItemSource`]: polling of completed destination work, and marking it processed.
//! - [`DocumentSink`]: submission of documents back into the source system.
//! - [`AssetFetcher`] / [`BlobStore`]: the binary-asset side-channel.
//!
//! All methods are async and return [`ContractError`] so each transport keeps its own error types.
//! Transport concerns (timeouts, auth, retry/backoff) belong to the implementor.
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall`; mocks are exported with the `test-export-mocks`
//!   feature so integration tests can build deterministic collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use mockall::{automock, predicate::*};

use crate::entity::{EntityKey, EntityKind, Scope, UploadFlow};
use crate::error::ContractError;
use crate::record::Record;

/// Bounds of one source fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    /// Lower bound. The Unix epoch means a full/initial sync.
    pub since: DateTime<Utc>,
    /// Optional upper bound for deterministic backfills.
    pub until: Option<DateTime<Utc>>,
    /// Hard cap on returned records. Truncates, never errors.
    pub limit: Option<usize>,
}

/// Result of a fetch: the records in the source's natural order.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub records: Vec<Record>,
    /// False when the sequence was cut short, either by `limit` or by a page that
    /// failed after earlier pages succeeded.
    pub complete: bool,
}

impl SourceBatch {
    pub fn complete(records: Vec<Record>) -> Self {
        Self {
            records,
            complete: true,
        }
    }

    pub fn partial(records: Vec<Record>) -> Self {
        Self {
            records,
            complete: false,
        }
    }
}

/// An entity mapped to the destination schema, ready for writing.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedEntity {
    pub key: EntityKey,
    pub payload: Value,
}

/// Trait for paginated, filtered retrieval of candidate entities from the source system.
///
/// Pagination is handled inside the implementor; the caller sees one logical sequence.
/// A failure on the first page is an error; a failure on a later page returns the pages
/// accumulated so far as a [`SourceBatch::partial`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn fetch(
        &self,
        scope: &Scope,
        kind: EntityKind,
        window: &FetchWindow,
    ) -> Result<SourceBatch, ContractError>;
}

/// Trait for idempotent upsert of mapped entities into the destination system.
///
/// The destination has no idempotency key of its own, so implementors check
/// existence by natural key before deciding create-vs-update.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TargetWriter: Send + Sync {
    async fn upsert(
        &self,
        scope: &Scope,
        kind: EntityKind,
        entity: &MappedEntity,
    ) -> Result<(), ContractError>;

    /// Writes a logical batch and reports one result per entity, in input order.
    ///
    /// The default emulates batching with sequential per-item calls. One item's
    /// failure does not stop the remaining items.
    async fn upsert_batch(
        &self,
        scope: &Scope,
        kind: EntityKind,
        entities: &[MappedEntity],
    ) -> Vec<Result<(), ContractError>> {
        let mut results = Vec::with_capacity(entities.len());
        for entity in entities {
            results.push(self.upsert(scope, kind, entity).await);
        }
        results
    }
}

/// A unit of completed destination work (a shipped order, a received delivery).
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedItem {
    /// The destination's id for the item; the upload idempotency key.
    pub item_id: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub record: Record,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CompletedItemSource: Send + Sync {
    /// Items completed since `since` that have not been marked processed.
    async fn poll_completed(
        &self,
        scope: &Scope,
        flow: UploadFlow,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompletedItem>, ContractError>;

    /// Flags the item so future polls no longer return it.
    async fn mark_processed(
        &self,
        scope: &Scope,
        flow: UploadFlow,
        item_id: &str,
    ) -> Result<(), ContractError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Creates a document in the source system and returns the id it assigned.
    async fn submit(
        &self,
        scope: &Scope,
        flow: UploadFlow,
        document: &Value,
    ) -> Result<String, ContractError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch_asset(&self, scope: &Scope, url: &str) -> Result<Vec<u8>, ContractError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores content under its hash and returns the public URL.
    async fn put_blob(&self, scope: &Scope, hash: &str, bytes: &[u8]) -> Result<String, ContractError>;
}
