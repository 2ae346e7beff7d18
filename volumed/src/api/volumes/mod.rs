//! REST endpoints for creating, inspecting, updating and destroying volumes.

pub mod handlers;
pub mod routes;
pub mod types;

pub use handlers::ApiError;
pub use routes::routes;
pub use types::{CreateVolumeRequest, SetPropertyRequest, SetTtlRequest, VolumeResponse};
