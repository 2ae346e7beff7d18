//! REST API for volumed.

pub mod volumes;

use axum::Router;
use std::sync::Arc;

use crate::volume::Repository;

pub use volumes::ApiError;

/// The volume API with its state attached.
pub fn router(repository: Arc<Repository>) -> Router {
    volumes::routes().with_state(repository)
}
