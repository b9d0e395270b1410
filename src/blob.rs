//! Base64 image payloads kept out of the cache entries.
//!
//! Providers that answer inline hand back several hundred KB of base64.
//! Instead of embedding that in every cached [`ImageEntry`](crate::cache::ImageEntry)
//! it is stored once under a short id derived from the owning cache key and
//! served at `/api/image/{id}`.

use crate::cache::{now_millis, GuardedStore};
use crate::key::CacheKey;
use crate::metrics::METRICS;
use crate::{Result, ScentKitError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::Ordering;

pub const BLOB_KEY_PREFIX: &str = "image-blob::";
pub const BLOB_ROUTE_PREFIX: &str = "/api/image/";

const BLOB_ID_LEN: usize = 16;
const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// 16 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobId(String);

impl BlobId {
    /// Deterministic: the same owner key always maps to the same id.
    pub fn for_owner(owner: &CacheKey) -> Self {
        let digest = Sha256::digest(owner.as_str().as_bytes());
        Self(hex::encode(digest)[..BLOB_ID_LEN].to_string())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == BLOB_ID_LEN
            && raw.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn url(&self) -> String {
        format!("{}{}", BLOB_ROUTE_PREFIX, self.0)
    }

    fn store_key(&self) -> String {
        format!("{}{}", BLOB_KEY_PREFIX, self.0)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBlob {
    pub content_type: String,
    pub base64: String,
    pub created_at: i64,
}

impl ImageBlob {
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.base64.as_bytes())
            .map_err(|e| ScentKitError::Internal(format!("Stored blob is not valid base64: {}", e)))
    }
}

/// Splits `data:<mime>;base64,<payload>` into its parts. Plain payloads come
/// back unchanged with no content type.
pub fn strip_data_url(raw: &str) -> (Option<&str>, &str) {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("data:") {
        if let Some((header, payload)) = rest.split_once(',') {
            let mime = header.strip_suffix(";base64").unwrap_or(header);
            let mime = (!mime.is_empty()).then_some(mime);
            return (mime, payload);
        }
    }
    (None, raw)
}

#[derive(Clone)]
pub struct BlobStore {
    store: GuardedStore,
}

impl BlobStore {
    pub fn new(store: GuardedStore) -> Self {
        Self { store }
    }

    /// Validates and stores a base64 payload for `owner`.
    ///
    /// The declared content type is used when it names an image; otherwise
    /// the type is sniffed from the decoded bytes.
    pub async fn store(&self, owner: &CacheKey, content_type: Option<&str>, payload: &str) -> Result<BlobId> {
        let (embedded_type, payload) = strip_data_url(payload);
        let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD
            .decode(payload.as_bytes())
            .map_err(|e| ScentKitError::GenerationFailed(format!("Provider returned invalid base64: {}", e)))?;
        if bytes.is_empty() {
            return Err(ScentKitError::GenerationFailed("Provider returned an empty image".into()));
        }

        let content_type = content_type
            .or(embedded_type)
            .filter(|ct| is_image_mime(ct))
            .map(str::to_string)
            .unwrap_or_else(|| sniff_content_type(&bytes));

        let id = BlobId::for_owner(owner);
        let blob = ImageBlob {
            content_type,
            base64: payload,
            created_at: now_millis(),
        };

        if !self.store.set_json(&id.store_key(), &blob).await {
            return Err(ScentKitError::CacheUnavailable(format!("Blob {} was not stored", id)));
        }
        METRICS.blobs_stored.fetch_add(1, Ordering::Relaxed);
        tracing::info!("[blob] stored {} ({}, {} bytes) for {}", id, blob.content_type, bytes.len(), owner);
        Ok(id)
    }

    /// `None` for malformed and unknown ids alike.
    pub async fn retrieve(&self, raw_id: &str) -> Option<ImageBlob> {
        let id = BlobId::parse(raw_id)?;
        self.store.get_json(&id.store_key()).await
    }

    pub fn url_for(id: &BlobId) -> String {
        id.url()
    }
}

fn is_image_mime(raw: &str) -> bool {
    raw.parse::<mime::Mime>()
        .map(|m| m.type_().as_str() == "image")
        .unwrap_or(false)
}

fn sniff_content_type(bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| DEFAULT_CONTENT_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryKv;
    use crate::key::{build_key, Category, ImageVariant, KeyParts, Language};
    use std::sync::Arc;
    use std::time::Duration;

    // 1x1 transparent PNG
    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn owner(subject: &str) -> CacheKey {
        build_key(&KeyParts::image("v1", subject, Category::Anime, Language::En, ImageVariant::default()))
    }

    fn blobs() -> BlobStore {
        BlobStore::new(GuardedStore::new(Arc::new(MemoryKv::new()), Duration::from_secs(1)))
    }

    #[test]
    fn ids_are_deterministic_per_owner() {
        assert_eq!(BlobId::for_owner(&owner("goku")), BlobId::for_owner(&owner("Goku")));
        assert_ne!(BlobId::for_owner(&owner("goku")), BlobId::for_owner(&owner("vegeta")));
        let id = BlobId::for_owner(&owner("goku"));
        assert_eq!(id.as_str().len(), 16);
        assert_eq!(BlobId::parse(id.as_str()), Some(id.clone()));
        assert!(id.url().starts_with("/api/image/"));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!(BlobId::parse("short"), None);
        assert_eq!(BlobId::parse("ABCDEF0123456789"), None);
        assert_eq!(BlobId::parse("../../etc/passwd"), None);
    }

    #[test]
    fn strips_data_urls() {
        assert_eq!(strip_data_url("data:image/jpeg;base64,AAAA"), (Some("image/jpeg"), "AAAA"));
        assert_eq!(strip_data_url("AAAA"), (None, "AAAA"));
    }

    #[tokio::test]
    async fn store_and_retrieve() {
        let blobs = blobs();
        let id = blobs.store(&owner("goku"), None, PNG_B64).await.unwrap();
        let blob = blobs.retrieve(id.as_str()).await.unwrap();
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(blob.base64, PNG_B64);
        assert!(!blob.decode().unwrap().is_empty());
    }

    #[tokio::test]
    async fn declared_non_image_type_is_replaced_by_sniffed_type() {
        let blobs = blobs();
        let payload = format!("data:application/octet-stream;base64,{}", PNG_B64);
        let id = blobs.store(&owner("goku"), None, &payload).await.unwrap();
        assert_eq!(blobs.retrieve(id.as_str()).await.unwrap().content_type, "image/png");
    }

    #[tokio::test]
    async fn invalid_base64_is_rejected() {
        let result = blobs().store(&owner("goku"), Some("image/png"), "%%% not base64 %%%").await;
        assert!(matches!(result, Err(ScentKitError::GenerationFailed(_))));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        assert!(blobs().retrieve("0123456789abcdef").await.is_none());
        assert!(blobs().retrieve("nope").await.is_none());
    }
}
