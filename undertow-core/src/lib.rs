//! Undertow Core - Streaming readiness controller for magnet content
//!
//! This crate owns everything between an HTTP request for a magnet link and
//! the retrieval engine doing the actual swarm work: piece bookkeeping, the
//! preload prioritizer, the per-content session state machine, lifecycle
//! timers and the session registry actor.

pub mod config;
pub mod engine;
pub mod magnet;
pub mod pieces;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod telemetry;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod timers;
pub mod tracing_setup;
pub mod watchdog;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use engine::{
    ByteStream, ContentLayout, EngineError, FileEntry, Priority, Transfer, TransferEvents,
    TransferFactory, TransferRequest, TransferStats,
};
pub use magnet::{InfoHash, MagnetError, MagnetLink};
pub use pieces::{PieceIndex, PieceMap, PreloadPlan};
pub use registry::{
    AttachRequest, Attachment, ConnectionGuard, RegistryError, RegistryHandle, StreamSource,
    spawn_registry,
};
pub use session::{SessionState, SessionStatus};
pub use shutdown::ShutdownSignal;
pub use telemetry::{
    MixpanelTelemetry, NoopTelemetry, Telemetry, TelemetryEvent, TelemetrySubject,
};
