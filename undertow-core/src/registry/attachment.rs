//! What a request gets back when it attaches to a session.

use std::ops::Range;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::commands::LifecycleMessage;
use super::meter::ServingMeter;
use crate::engine::{ByteStream, EngineError, SessionKey, Transfer};
use crate::session::{MainFile, SessionStatus};

/// Holds one connection on a session.
///
/// Dropping the guard releases the connection exactly once, whichever way
/// the request ends.
#[derive(Debug)]
pub struct ConnectionGuard {
    session: SessionKey,
    notifier: mpsc::UnboundedSender<LifecycleMessage>,
}

impl ConnectionGuard {
    pub(crate) fn new(
        session: SessionKey,
        notifier: mpsc::UnboundedSender<LifecycleMessage>,
    ) -> Self {
        Self { session, notifier }
    }

    pub fn session(&self) -> SessionKey {
        self.session
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        // Registry already gone during shutdown
        let _ = self.notifier.send(LifecycleMessage::Disconnected {
            session: self.session,
        });
    }
}

/// Main file of a streamable session, ready to be read.
#[derive(Clone)]
pub struct StreamSource {
    transfer: Arc<dyn Transfer>,
    file: MainFile,
    meter: ServingMeter,
}

impl StreamSource {
    pub(crate) fn new(transfer: Arc<dyn Transfer>, file: MainFile, meter: ServingMeter) -> Self {
        Self {
            transfer,
            file,
            meter,
        }
    }

    /// Path of the main file within the content.
    pub fn path(&self) -> &str {
        &self.file.entry.path
    }

    /// Size of the main file in bytes.
    pub fn length(&self) -> u64 {
        self.file.entry.length
    }

    pub fn meter(&self) -> &ServingMeter {
        &self.meter
    }

    /// Opens a byte range of the main file.
    ///
    /// # Errors
    /// - `EngineError::InvalidRange` - Range exceeds the file
    /// - `EngineError::Stopped` - Transfer already torn down
    pub fn open(&self, range: Range<u64>) -> Result<ByteStream, EngineError> {
        self.transfer.read_file(self.file.index, range)
    }
}

/// Result of attaching a request to a session.
pub struct Attachment {
    /// Keeps the connection counted until dropped
    pub guard: ConnectionGuard,
    /// Status right after attaching
    pub status: SessionStatus,
    /// Present when the session can serve bytes
    pub stream: Option<StreamSource>,
}
