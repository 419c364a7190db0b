//! Binary-asset side-channel (item pictures).
//!
//! Runs after mapping, for entities that changed. It repeats the fingerprint
//! pattern at a smaller scope: the asset bytes are hashed, and the blob is only
//! uploaded when the hash differs from the one stored on the status row.
//! Failures here never fail the entity sync; the job logs them and keeps the
//! previous URL.

use async_trait::async_trait;

use crate::contract::{AssetFetcher, BlobStore};
use crate::entity::Scope;
use crate::error::ContractError;
use crate::fingerprint::content_hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetState {
    pub url: String,
    pub hash: String,
}

#[async_trait]
pub trait AssetSync: Send + Sync {
    /// Brings the asset at `source_url` up to date and returns the state to store.
    async fn sync_asset(
        &self,
        scope: &Scope,
        source_url: &str,
        previous: Option<AssetState>,
    ) -> Result<Option<AssetState>, ContractError>;
}

/// Leaves assets alone; whatever was stored before is kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAssets;

#[async_trait]
impl AssetSync for NoAssets {
    async fn sync_asset(
        &self,
        _scope: &Scope,
        _source_url: &str,
        previous: Option<AssetState>,
    ) -> Result<Option<AssetState>, ContractError> {
        Ok(previous)
    }
}

/// Fetches the asset, and stores it under its SHA-256 when the content changed.
pub struct ContentAddressedAssets<F, B> {
    fetcher: F,
    blobs: B,
}

impl<F, B> ContentAddressedAssets<F, B>
where
    F: AssetFetcher,
    B: BlobStore,
{
    pub fn new(fetcher: F, blobs: B) -> Self {
        Self { fetcher, blobs }
    }
}

#[async_trait]
impl<F, B> AssetSync for ContentAddressedAssets<F, B>
where
    F: AssetFetcher,
    B: BlobStore,
{
    async fn sync_asset(
        &self,
        scope: &Scope,
        source_url: &str,
        previous: Option<AssetState>,
    ) -> Result<Option<AssetState>, ContractError> {
        let bytes = self.fetcher.fetch_asset(scope, source_url).await?;
        let hash = content_hash(&bytes);
        if let Some(prev) = previous.filter(|p| p.hash == hash) {
            tracing::debug!(%scope, source_url, "asset unchanged, skipping upload");
            return Ok(Some(prev));
        }
        let url = self.blobs.put_blob(scope, &hash, &bytes).await?;
        tracing::info!(%scope, source_url, %url, "asset stored");
        Ok(Some(AssetState { url, hash }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockAssetFetcher, MockBlobStore};

    #[tokio::test]
    async fn unchanged_asset_is_not_uploaded_again() {
        let mut fetcher = MockAssetFetcher::new();
        fetcher
            .expect_fetch_asset()
            .returning(|_, _| Ok(b"png-bytes".to_vec()));
        let mut blobs = MockBlobStore::new();
        blobs.expect_put_blob().times(0);

        let previous = AssetState {
            url: "https://cdn/old.png".into(),
            hash: content_hash(b"png-bytes"),
        };
        let assets = ContentAddressedAssets::new(fetcher, blobs);
        let state = assets
            .sync_asset(&Scope::new("1"), "https://erp/p.png", Some(previous.clone()))
            .await
            .expect("sync");
        assert_eq!(state, Some(previous));
    }

    #[tokio::test]
    async fn changed_asset_is_stored_under_its_hash() {
        let mut fetcher = MockAssetFetcher::new();
        fetcher
            .expect_fetch_asset()
            .returning(|_, _| Ok(b"new-bytes".to_vec()));
        let mut blobs = MockBlobStore::new();
        let expected_hash = content_hash(b"new-bytes");
        let check_hash = expected_hash.clone();
        blobs
            .expect_put_blob()
            .times(1)
            .withf(move |_, hash, bytes| hash == check_hash && bytes == b"new-bytes")
            .returning(|_, hash, _| Ok(format!("https://cdn/{hash}")));

        let assets = ContentAddressedAssets::new(fetcher, blobs);
        let state = assets
            .sync_asset(&Scope::new("1"), "https://erp/p.png", None)
            .await
            .expect("sync")
            .expect("state");
        assert_eq!(state.hash, expected_hash);
        assert_eq!(state.url, format!("https://cdn/{expected_hash}"));
    }
}
