//! Handlers for the volume API.
//!
//! Repository calls touch the filesystem and may wait on volume locks, so
//! every one runs on the blocking pool.

use axum::{
    extract::{rejection::QueryRejection, Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use tracing::error;

use crate::api::volumes::types::{
    CreateVolumeRequest, HealthResponse, SetPropertyRequest, SetTtlRequest, VolumeResponse,
};
use crate::infrastructure::audit::{log_audit, AuditEvent};
use crate::volume::{Handle, Properties, Repository, Strategy, Ttl, VolumeError, VolumeSpec};

/// API errors for volume operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Domain-level volume error.
    #[error(transparent)]
    Volume(#[from] VolumeError),
    /// The body is not JSON.
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    /// The query string could not be decoded.
    #[error("malformed query string: {0}")]
    MalformedQuery(String),
    /// The body is JSON of the wrong shape, or the query is ambiguous.
    #[error("{0}")]
    Unprocessable(String),
    /// The path names something that cannot be a volume.
    #[error("volume not found: {0}")]
    UnknownHandle(String),
    /// The blocking task failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Volume(e) if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Volume(e) if e.is_conflict() => StatusCode::CONFLICT,
            ApiError::Volume(VolumeError::VolumeNotFound(_)) | ApiError::UnknownHandle(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::MalformedBody(_) | ApiError::MalformedQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Volume(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::MalformedQuery(rejection.body_text())
    }
}

/// Syntax errors are malformed input; well-formed JSON of the wrong shape is
/// unprocessable.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        if e.is_data() {
            ApiError::Unprocessable(e.to_string())
        } else {
            ApiError::MalformedBody(e.to_string())
        }
    })
}

fn parse_handle(raw: &str) -> Result<Handle, ApiError> {
    Handle::parse(raw).ok_or_else(|| ApiError::UnknownHandle(raw.to_string()))
}

/// Builds a property filter, rejecting any key given more than once.
fn property_filter(pairs: Vec<(String, String)>) -> Result<Properties, ApiError> {
    let mut filter = Properties::new();
    for (key, value) in pairs {
        match filter.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(slot) => {
                return Err(ApiError::Unprocessable(format!(
                    "ambiguous filter: property '{}' given more than once",
                    slot.key()
                )));
            }
        }
    }
    Ok(filter)
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, VolumeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

/// GET /volumes
///
/// Lists volumes whose properties include every query pair.
pub async fn list_volumes(
    State(repository): State<Arc<Repository>>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<Vec<VolumeResponse>>, ApiError> {
    let Query(pairs) = query?;
    let filter = property_filter(pairs)?;
    let volumes = repository.list(&filter);
    Ok(Json(volumes.into_iter().map(VolumeResponse::from).collect()))
}

/// POST /volumes
pub async fn create_volume(
    State(repository): State<Arc<Repository>>,
    body: Bytes,
) -> Result<(StatusCode, Json<VolumeResponse>), ApiError> {
    let request: CreateVolumeRequest = parse_body(&body)?;
    let strategy = Strategy::from_request(&request.strategy)?;
    let spec = VolumeSpec::new(strategy)
        .with_properties(request.properties)
        .with_ttl(Ttl::from_secs(request.ttl));

    let volume = blocking(move || repository.create(spec)).await?;
    Ok((StatusCode::CREATED, Json(volume.into())))
}

/// GET /volumes/{handle}
pub async fn get_volume(
    State(repository): State<Arc<Repository>>,
    Path(handle): Path<String>,
) -> Result<Json<VolumeResponse>, ApiError> {
    let handle = parse_handle(&handle)?;
    Ok(Json(repository.get(&handle)?.into()))
}

/// DELETE /volumes/{handle}
pub async fn destroy_volume(
    State(repository): State<Arc<Repository>>,
    Path(handle): Path<String>,
) -> Result<StatusCode, ApiError> {
    let handle = parse_handle(&handle)?;
    let destroyed = handle.clone();
    blocking(move || repository.destroy(&destroyed)).await?;

    log_audit(&AuditEvent::VolumeDestroyed {
        handle: handle.to_string(),
        reason: "requested".to_string(),
    });
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /volumes/{handle}/properties/{key}
pub async fn set_property(
    State(repository): State<Arc<Repository>>,
    Path((handle, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let handle = parse_handle(&handle)?;
    let request: SetPropertyRequest = parse_body(&body)?;
    blocking(move || repository.set_property(&handle, key, request.value)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /volumes/{handle}/ttl
pub async fn set_ttl(
    State(repository): State<Arc<Repository>>,
    Path(handle): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let handle = parse_handle(&handle)?;
    let request: SetTtlRequest = parse_body(&body)?;
    blocking(move || repository.set_ttl(&handle, Ttl::from_secs(request.value))).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_property_filter() -> anyhow::Result<()> {
        let filter = property_filter(pairs(&[("a", "1"), ("b", "2")]))?;
        assert_eq!(filter.len(), 2);
        assert_eq!(filter["a"], "1");
        Ok(())
    }

    #[test]
    fn test_property_filter_rejects_repeated_keys() {
        let err = property_filter(pairs(&[("a", "1"), ("a", "2")]));
        assert!(matches!(err, Err(ApiError::Unprocessable(_))));

        let err = property_filter(pairs(&[("a", "1"), ("a", "1")]));
        assert!(matches!(err, Err(ApiError::Unprocessable(_))));
    }

    #[test]
    fn test_parse_body_classifies_errors() {
        let malformed = parse_body::<SetTtlRequest>(&Bytes::from_static(b"{not json"));
        assert!(matches!(malformed, Err(ApiError::MalformedBody(_))));

        let wrong_shape = parse_body::<SetTtlRequest>(&Bytes::from_static(br#"{"value":"soon"}"#));
        assert!(matches!(wrong_shape, Err(ApiError::Unprocessable(_))));
    }

    #[tokio::test]
    async fn test_query_rejection_is_json() -> anyhow::Result<()> {
        let uri: axum::http::Uri = "/volumes?limit=many".parse()?;
        let Err(rejection) = Query::<Vec<(String, u32)>>::try_from_uri(&uri) else {
            anyhow::bail!("expected the query to be rejected");
        };

        let response = ApiError::from(rejection).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body: serde_json::Value = serde_json::from_slice(&body)?;
        let message = body["error"].as_str().unwrap_or_default();
        assert!(message.starts_with("malformed query string"), "{message}");
        Ok(())
    }

    #[test]
    fn test_status_mapping() {
        let status = |e: ApiError| e.into_response().status();

        assert_eq!(
            status(VolumeError::InvalidStrategy("x".into()).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(VolumeError::ParentNotFound(Handle::generate()).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(VolumeError::VolumeNotFound(Handle::generate()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(
                VolumeError::HasDependents {
                    handle: Handle::generate(),
                    dependents: vec![Handle::generate()],
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(ApiError::MalformedBody("eof".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ApiError::Internal("join".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
