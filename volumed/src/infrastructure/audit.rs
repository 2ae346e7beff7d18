use serde::Serialize;
use tracing::{info, info_span};

/// Domain event for audit logging.
/// Structured for JSON serialization to enable machine-readable audit trails.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The daemon started.
    SystemStartup {
        /// Started component.
        component: String,
    },
    /// The daemon is stopping.
    SystemShutdown {
        /// Why it is stopping.
        reason: String,
    },
    /// A volume and its data were removed.
    VolumeDestroyed {
        /// Destroyed volume.
        handle: String,
        /// `requested` or `expired`.
        reason: String,
    },
    /// An import tree had its ownership rewritten.
    TreeNamespaced {
        /// Canonical tree path.
        path: String,
        /// Namespacer cache key in force.
        policy: String,
    },
}

/// Logs an audit event to the dedicated audit channel as structured JSON.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a secure file.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Audit Event");
}
