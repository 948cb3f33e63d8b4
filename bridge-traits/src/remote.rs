//! Remote Storage Abstractions
//!
//! The object store receives media bytes, the metadata store receives one
//! document describing each capture. Both are keyed by caller-chosen
//! identifiers so a repeated write overwrites instead of duplicating.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Geographic position attached to a capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

/// Fields written to the metadata store for one uploaded capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDocument {
    pub id: String,
    pub owner_id: String,
    /// `photo` or `video`
    pub media_kind: String,
    pub media_url: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the uploaded bytes
    pub sha256: String,
    pub caption: Option<String>,
    pub location: Option<GeoPoint>,
    pub filter_tag: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Object store trait
///
/// `put` must be idempotent per `object_key`: writing the same key twice
/// leaves exactly one object.
///
/// Failures are reported through `BridgeError`:
/// - `Timeout`, `Throttled`, `OperationFailed`, `Io` for retryable conditions
/// - `Rejected` when the payload will never be accepted
/// - `Unauthorized` with the sub-cause the backend reported
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `data` under `object_key` and return the object's URL.
    async fn put(&self, object_key: &str, data: Bytes, content_type: &str) -> Result<String>;
}

/// Metadata store trait
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create the document or replace it wholesale if it already exists.
    async fn create_or_replace(&self, document_id: &str, document: MediaDocument) -> Result<()>;
}
