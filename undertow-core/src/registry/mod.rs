//! Session registry
//!
//! Maps each content identifier to exactly one session. The registry runs as
//! an actor; HTTP handlers talk to it through a [`RegistryHandle`] and hold a
//! [`ConnectionGuard`] for as long as their request is open.

mod actor;
mod attachment;
mod commands;
mod handle;
mod meter;

#[cfg(test)]
mod integration_tests;

pub use actor::spawn_registry;
pub use attachment::{Attachment, ConnectionGuard, StreamSource};
pub use commands::AttachRequest;
pub use handle::RegistryHandle;
pub use meter::ServingMeter;

use crate::engine::EngineError;
use crate::magnet::InfoHash;

/// Errors returned by the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to start transfer for {info_hash}")]
    StartFailed {
        info_hash: InfoHash,
        #[source]
        source: EngineError,
    },

    #[error("Session registry has stopped")]
    Stopped,
}
