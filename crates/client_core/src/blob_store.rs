use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::Deserialize;
use shared::domain::{Address, QuiltId};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_BLOB_EPOCHS: u32 = 5;
/// Multipart field name the encrypted payload is stored under.
pub const ENCRYPTED_PART: &str = "encrypted-data";

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("blob store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("blob store unavailable ({status})")]
    Unavailable { status: u16 },
    #[error("blob store response did not include a quilt patch id")]
    MissingQuiltId,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` and transfers the resulting blob object to `owner`.
    async fn store(&self, data: Vec<u8>, owner: &Address) -> Result<QuiltId, BlobStoreError>;

    async fn read(&self, quilt_id: &QuiltId) -> Result<Vec<u8>, BlobStoreError>;
}

/// Publisher/aggregator HTTP client.
pub struct WalrusBlobStore {
    http: Client,
    publisher_url: String,
    aggregator_url: String,
    epochs: u32,
}

impl WalrusBlobStore {
    pub fn new(publisher_url: impl Into<String>, aggregator_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            publisher_url: publisher_url.into().trim_end_matches('/').to_string(),
            aggregator_url: aggregator_url.into().trim_end_matches('/').to_string(),
            epochs: DEFAULT_BLOB_EPOCHS,
        }
    }

    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs.max(1);
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreQuiltResponse {
    #[serde(default)]
    stored_quilt_blobs: Vec<StoredQuiltBlob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredQuiltBlob {
    quilt_patch_id: String,
}

#[async_trait]
impl BlobStore for WalrusBlobStore {
    async fn store(&self, data: Vec<u8>, owner: &Address) -> Result<QuiltId, BlobStoreError> {
        let size = data.len();
        let form = Form::new().part(
            ENCRYPTED_PART,
            Part::bytes(data).file_name(ENCRYPTED_PART),
        );
        let response = self
            .http
            .put(format!("{}/v1/quilts", self.publisher_url))
            .query(&[
                ("epochs", self.epochs.to_string()),
                ("send_object_to", owner.to_string()),
            ])
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BlobStoreError::Unavailable {
                status: response.status().as_u16(),
            });
        }
        let body: StoreQuiltResponse = response.json().await?;
        let quilt_id = body
            .stored_quilt_blobs
            .into_iter()
            .next()
            .and_then(|blob| QuiltId::new(blob.quilt_patch_id).ok())
            .ok_or(BlobStoreError::MissingQuiltId)?;
        info!(quilt_id = %quilt_id, size, owner = %owner, "blob: stored");
        Ok(quilt_id)
    }

    async fn read(&self, quilt_id: &QuiltId) -> Result<Vec<u8>, BlobStoreError> {
        let response = self
            .http
            .get(format!(
                "{}/v1/blobs/by-quilt-patch-id/{}",
                self.aggregator_url, quilt_id
            ))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BlobStoreError::Unavailable {
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await?.to_vec();
        info!(quilt_id = %quilt_id, size = bytes.len(), "blob: fetched");
        Ok(bytes)
    }
}

#[cfg(test)]
#[path = "tests/blob_store_tests.rs"]
mod tests;
