//! Messages handled by the registry actor.

use std::path::PathBuf;

use tokio::sync::oneshot;

use super::RegistryError;
use super::attachment::Attachment;
use crate::engine::SessionKey;
use crate::magnet::{InfoHash, MagnetLink};
use crate::session::SessionStatus;
use crate::timers::TimerKind;

/// Parameters of a request that attaches to a session.
#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub link: MagnetLink,
    /// Overrides the configured download directory for a new session
    pub download_dir: Option<PathBuf>,
    /// Opaque base64 telemetry context, used only if this creates the session
    pub telemetry_context: Option<String>,
}

impl AttachRequest {
    pub fn new(link: MagnetLink) -> Self {
        Self {
            link,
            download_dir: None,
            telemetry_context: None,
        }
    }
}

/// Commands sent through a [`super::RegistryHandle`].
pub(crate) enum RegistryCommand {
    /// Get or create the session and attach one connection.
    Attach {
        request: AttachRequest,
        responder: oneshot::Sender<Result<Attachment, RegistryError>>,
    },
    /// Status of one session.
    Status {
        info_hash: InfoHash,
        responder: oneshot::Sender<Option<SessionStatus>>,
    },
    /// Status of every session.
    Statuses {
        responder: oneshot::Sender<Vec<SessionStatus>>,
    },
    /// Destroy every session, wait for teardown, then stop the actor.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Internal notifications from timers, guards and stream meters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LifecycleMessage {
    /// A connection guard was dropped.
    Disconnected { session: SessionKey },
    /// A lifecycle timer elapsed.
    TimerElapsed {
        session: SessionKey,
        kind: TimerKind,
        epoch: u64,
    },
    /// Streamed bytes crossed the serving threshold.
    ServingThresholdCrossed { session: SessionKey },
}
