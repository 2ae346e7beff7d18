//! Request/Response types for the volume API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::volume::{Properties, Volume};

/// Body of `POST /volumes`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVolumeRequest {
    /// Tagged strategy, validated separately so a bad strategy is a 422.
    #[serde(default)]
    pub strategy: serde_json::Value,
    /// Initial properties.
    #[serde(default)]
    pub properties: Properties,
    /// Seconds until expiry; zero or absent never expires.
    #[serde(default)]
    pub ttl: u64,
}

/// Body of `PUT /volumes/{handle}/properties/{key}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetPropertyRequest {
    /// New property value.
    pub value: String,
}

/// Body of `PUT /volumes/{handle}/ttl`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetTtlRequest {
    /// New TTL in seconds.
    pub value: u64,
}

/// A volume as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeResponse {
    /// Volume identifier.
    pub handle: String,
    /// Absolute path of the volume's content.
    pub path: String,
    /// Current properties.
    pub properties: Properties,
    /// TTL in seconds; zero never expires.
    pub ttl: u64,
    /// When the reaper may destroy the volume.
    pub expires_at: Option<DateTime<Utc>>,
    /// Copy-on-write parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl From<Volume> for VolumeResponse {
    fn from(volume: Volume) -> Self {
        Self {
            handle: volume.handle.to_string(),
            path: volume.path.to_string_lossy().into_owned(),
            properties: volume.properties,
            ttl: volume.ttl.as_secs(),
            expires_at: volume.expires_at,
            parent: volume.parent.map(|p| p.to_string()),
        }
    }
}

/// Liveness payload.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Timestamp of the check.
    pub timestamp: DateTime<Utc>,
}
