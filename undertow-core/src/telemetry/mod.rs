//! Session lifecycle analytics
//!
//! The registry reports lifecycle milestones through [`Telemetry`]. Reporting
//! is fire-and-forget: implementations must return immediately and never let
//! a delivery failure reach the caller.

mod mixpanel;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

pub use mixpanel::MixpanelTelemetry;

use crate::magnet::InfoHash;

/// Errors raised while preparing or delivering analytics.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Telemetry context is not valid base64: {reason}")]
    InvalidEncoding { reason: String },

    #[error("Telemetry context must be a JSON object")]
    InvalidContext,

    #[error("Telemetry request failed")]
    Http(#[from] reqwest::Error),

    #[error("Telemetry payload could not be encoded")]
    Json(#[from] serde_json::Error),

    #[error("Telemetry endpoint rejected request with status {status}")]
    Rejected { status: u16 },
}

/// Lifecycle milestones reported for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryEvent {
    Added,
    MetadataReceived,
    MetadataFailed,
    Serving,
    Finished,
    Removed,
    TransferFailed,
}

impl TelemetryEvent {
    /// Event name as shown in analytics dashboards.
    pub fn name(self) -> &'static str {
        match self {
            TelemetryEvent::Added => "Added",
            TelemetryEvent::MetadataReceived => "Metadata received",
            TelemetryEvent::MetadataFailed => "Metadata failed",
            TelemetryEvent::Serving => "Serving",
            TelemetryEvent::Finished => "Finished",
            TelemetryEvent::Removed => "Removed",
            TelemetryEvent::TransferFailed => "Transfer failed",
        }
    }
}

/// The session an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySubject {
    pub info_hash: InfoHash,
    pub name: String,
    /// Opaque base64 JSON supplied with the request that created the session
    pub context: Option<String>,
}

/// Analytics sink.
pub trait Telemetry: Send + Sync {
    /// Reports an event. Must not block.
    fn track(&self, event: TelemetryEvent, subject: &TelemetrySubject);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn track(&self, event: TelemetryEvent, subject: &TelemetrySubject) {
        tracing::trace!("Telemetry disabled, dropping '{}' for {}", event.name(), subject.info_hash);
    }
}

/// Decodes a base64 JSON object context blob.
///
/// # Errors
/// - `TelemetryError::InvalidEncoding` - Not base64 or not UTF-8 JSON
/// - `TelemetryError::InvalidContext` - Decoded JSON is not an object
pub fn decode_context(encoded: &str) -> Result<Map<String, Value>, TelemetryError> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TelemetryError::InvalidEncoding {
            reason: e.to_string(),
        })?;

    let value: Value =
        serde_json::from_slice(&raw).map_err(|e| TelemetryError::InvalidEncoding {
            reason: e.to_string(),
        })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(TelemetryError::InvalidContext),
    }
}
