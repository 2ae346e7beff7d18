//! Route table for the volume API.

use axum::{
    routing::{get, put},
    Router,
};
use std::sync::Arc;

use crate::api::volumes::handlers::{
    create_volume, destroy_volume, get_volume, health_check, list_volumes, set_property, set_ttl,
};
use crate::volume::Repository;

/// Volume endpoints plus the basic health check at `/health`.
pub fn routes() -> Router<Arc<Repository>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/volumes", get(list_volumes).post(create_volume))
        .route("/volumes/{handle}", get(get_volume).delete(destroy_volume))
        .route("/volumes/{handle}/properties/{key}", put(set_property))
        .route("/volumes/{handle}/ttl", put(set_ttl))
}
