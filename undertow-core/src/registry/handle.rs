//! Handle for communicating with the session registry actor.

use tokio::sync::{mpsc, oneshot};

use super::RegistryError;
use super::attachment::Attachment;
use super::commands::{AttachRequest, RegistryCommand};
use crate::magnet::InfoHash;
use crate::session::SessionStatus;

/// Cloneable async API over the registry actor.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub(crate) fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Resolves or creates the session for a link and attaches one connection.
    ///
    /// The connection stays counted until the returned guard is dropped.
    ///
    /// # Errors
    /// - `RegistryError::StartFailed` - Engine refused to start a new transfer
    /// - `RegistryError::Stopped` - Registry has shut down
    pub async fn attach(&self, request: AttachRequest) -> Result<Attachment, RegistryError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Attach { request, responder })
            .await?;
        rx.await.map_err(|_| RegistryError::Stopped)?
    }

    /// Status of one session, if it exists.
    ///
    /// # Errors
    /// - `RegistryError::Stopped` - Registry has shut down
    pub async fn status(&self, info_hash: InfoHash) -> Result<Option<SessionStatus>, RegistryError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Status {
            info_hash,
            responder,
        })
        .await?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    /// Status of every session, ordered by info hash.
    ///
    /// # Errors
    /// - `RegistryError::Stopped` - Registry has shut down
    pub async fn statuses(&self) -> Result<Vec<SessionStatus>, RegistryError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Statuses { responder }).await?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    /// Destroys every session and stops the registry.
    ///
    /// Returns once all transfers are torn down.
    ///
    /// # Errors
    /// - `RegistryError::Stopped` - Registry had already shut down
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let (responder, rx) = oneshot::channel();
        self.send(RegistryCommand::Shutdown { responder }).await?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    async fn send(&self, command: RegistryCommand) -> Result<(), RegistryError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| RegistryError::Stopped)
    }
}
