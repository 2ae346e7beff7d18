//! volumed - local volume management daemon.
//!
//! Volumes are directories created empty, copied from another volume, or
//! imported from an external tree. Each carries string properties and an
//! optional TTL after which a background reaper destroys it. A JSON HTTP API
//! exposes the lifecycle.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// HTTP API.
pub mod api;
/// Infrastructure components (config, server, telemetry, audit).
pub mod infrastructure;
/// Volume storage, lifecycle and expiry.
pub mod volume;
