/// Audit logging for volume lifecycle events.
pub mod audit;
/// Configuration management.
pub mod config;
/// HTTP server and control plane.
pub mod server;
/// Structured logging setup.
pub mod telemetry;
