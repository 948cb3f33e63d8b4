//! # Queue Item Model
//!
//! The only persisted entity of the upload queue. One `QueueItem` exists per
//! capture that has been quarantined but not yet written to the remote stores.
//! Its `id` is reused as the object key and document id on every attempt, so
//! retries overwrite rather than duplicate.

use bridge_traits::remote::GeoPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Prefix for every object written by the queue.
pub const OBJECT_KEY_PREFIX: &str = "captures";

/// Type-safe queue item identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    /// Create a new random queue item ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a queue item ID from a string
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::Validation(format!("invalid queue item id '{}': {}", s, e)))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of captured media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Photo => "jpg",
            Self::Video => "mp4",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Photo => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most recent failure recorded against an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: String,
    pub message: String,
}

impl From<&SyncError> for LastError {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// What the capture surface hands over when a capture is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    /// Temporary file produced by the capture surface; consumed by enqueue.
    pub source_path: PathBuf,
    pub media_kind: MediaKind,
    pub owner_id: String,
    pub caption: Option<String>,
    pub location: Option<GeoPoint>,
    pub filter_tag: Option<String>,
}

impl CaptureRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        media_kind: MediaKind,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            media_kind,
            owner_id: owner_id.into(),
            caption: None,
            location: None,
            filter_tag: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_filter_tag(mut self, tag: impl Into<String>) -> Self {
        self.filter_tag = Some(tag.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_metadata(&self.owner_id, self.location.as_ref())
    }
}

fn validate_metadata(owner_id: &str, location: Option<&GeoPoint>) -> Result<()> {
    if owner_id.trim().is_empty() {
        return Err(SyncError::Validation("owner_id is empty".to_string()));
    }

    if let Some(location) = location {
        let lat_ok = (-90.0..=90.0).contains(&location.latitude);
        let lon_ok = (-180.0..=180.0).contains(&location.longitude);
        if !lat_ok || !lon_ok {
            return Err(SyncError::Validation(format!(
                "location out of range: {}, {}",
                location.latitude, location.longitude
            )));
        }
    }

    Ok(())
}

/// A capture waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub owned_file_path: PathBuf,
    pub media_kind: MediaKind,
    pub created_at: DateTime<Utc>,
    pub caption: Option<String>,
    pub location: Option<GeoPoint>,
    pub filter_tag: Option<String>,
    pub owner_id: String,
    pub upload_attempts: u32,
    pub last_error: Option<LastError>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Build a fresh item for a file that was just quarantined under `id`.
    pub fn from_request(
        id: QueueItemId,
        owned_file_path: PathBuf,
        request: &CaptureRequest,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owned_file_path,
            media_kind: request.media_kind,
            created_at,
            caption: request.caption.clone(),
            location: request.location,
            filter_tag: request.filter_tag.clone(),
            owner_id: request.owner_id.clone(),
            upload_attempts: 0,
            last_error: None,
            last_attempt_at: None,
        }
    }

    /// Key under which the media bytes are stored remotely.
    pub fn object_key(&self) -> String {
        format!("{}/{}.{}", OBJECT_KEY_PREFIX, self.id, self.media_kind.extension())
    }

    /// Check fields the remote stores depend on.
    pub fn validate(&self) -> Result<()> {
        validate_metadata(&self.owner_id, self.location.as_ref())
    }

    /// Record a transient failure.
    pub fn record_failure(&mut self, err: &SyncError, at: DateTime<Utc>) {
        self.upload_attempts = self.upload_attempts.saturating_add(1);
        self.last_error = Some(LastError::from(err));
        self.last_attempt_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: MediaKind) -> QueueItem {
        let request = CaptureRequest::new("/tmp/capture.tmp", kind, "user-1");
        QueueItem::from_request(
            QueueItemId::new(),
            PathBuf::from("/data/quarantine/x"),
            &request,
            Utc::now(),
        )
    }

    #[test]
    fn test_object_key_uses_id_and_extension() {
        let photo = item(MediaKind::Photo);
        assert_eq!(photo.object_key(), format!("captures/{}.jpg", photo.id));

        let video = item(MediaKind::Video);
        assert_eq!(video.object_key(), format!("captures/{}.mp4", video.id));
        assert_eq!(video.media_kind.content_type(), "video/mp4");
    }

    #[test]
    fn test_id_parse_roundtrip_and_rejects_garbage() {
        let id = QueueItemId::new();
        assert_eq!(QueueItemId::from_string(&id.to_string()).unwrap(), id);
        assert!(matches!(
            QueueItemId::from_string("not-a-uuid"),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut it = item(MediaKind::Photo);
        assert!(it.validate().is_ok());

        it.location = Some(GeoPoint {
            latitude: 123.0,
            longitude: 0.0,
            accuracy_m: None,
        });
        assert!(it.validate().is_err());

        let mut it = item(MediaKind::Photo);
        it.owner_id = "  ".to_string();
        assert!(matches!(it.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_record_failure_bumps_attempts() {
        let mut it = item(MediaKind::Photo);
        let now = Utc::now();
        it.record_failure(&SyncError::NetworkTransient("reset".to_string()), now);
        it.record_failure(&SyncError::NetworkTransient("reset".to_string()), now);

        assert_eq!(it.upload_attempts, 2);
        assert_eq!(it.last_attempt_at, Some(now));
        assert_eq!(it.last_error.as_ref().unwrap().kind, "network_transient");
    }

    #[test]
    fn test_media_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
    }
}
