//! Actor implementation for the session registry.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::RegistryError;
use super::attachment::{Attachment, ConnectionGuard, StreamSource};
use super::commands::{AttachRequest, LifecycleMessage, RegistryCommand};
use super::handle::RegistryHandle;
use super::meter::ServingMeter;
use crate::config::UndertowConfig;
use crate::engine::{
    SessionEvent, SessionKey, TransferEvent, TransferEvents, TransferFactory, TransferRequest,
};
use crate::magnet::InfoHash;
use crate::session::{Session, SessionError};
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::timers::TimerKind;

/// Spawns the session registry actor and returns its handle.
///
/// The actor owns every session. Requests, timer firings and engine events
/// all arrive as messages and are applied one at a time, so no session state
/// is ever shared between tasks.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use std::sync::Arc;
/// use undertow_core::{NoopTelemetry, UndertowConfig, spawn_registry};
/// # fn factory() -> Arc<dyn undertow_core::TransferFactory> { unimplemented!() }
///
/// let handle = spawn_registry(UndertowConfig::default(), factory(), Arc::new(NoopTelemetry));
/// let sessions = handle.statuses().await.unwrap();
/// assert!(sessions.is_empty());
/// # }
/// ```
pub fn spawn_registry(
    config: UndertowConfig,
    factory: Arc<dyn TransferFactory>,
    telemetry: Arc<dyn Telemetry>,
) -> RegistryHandle {
    let (command_sender, command_receiver) = mpsc::channel(100);
    let (lifecycle_sender, lifecycle_receiver) = mpsc::unbounded_channel();
    let (event_sender, event_receiver) = mpsc::unbounded_channel();

    let registry = SessionRegistry {
        sessions: BTreeMap::new(),
        context: SessionContext {
            config,
            factory,
            telemetry,
            lifecycle_sender,
            event_sender,
            next_serial: 0,
        },
        teardowns: JoinSet::new(),
    };

    tokio::spawn(run_actor_loop(
        registry,
        command_receiver,
        lifecycle_receiver,
        event_receiver,
    ));

    RegistryHandle::new(command_sender)
}

/// Everything needed to start and drive sessions, apart from the map itself.
struct SessionContext {
    config: UndertowConfig,
    factory: Arc<dyn TransferFactory>,
    telemetry: Arc<dyn Telemetry>,
    lifecycle_sender: mpsc::UnboundedSender<LifecycleMessage>,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
    next_serial: u64,
}

struct SessionRegistry {
    sessions: BTreeMap<InfoHash, Session>,
    context: SessionContext,
    teardowns: JoinSet<()>,
}

/// Runs the actor until shutdown or until every handle is dropped.
///
/// Lifecycle messages and engine events are drained before commands, so a
/// command always observes every notification that was sent before it.
async fn run_actor_loop(
    mut registry: SessionRegistry,
    mut command_receiver: mpsc::Receiver<RegistryCommand>,
    mut lifecycle_receiver: mpsc::UnboundedReceiver<LifecycleMessage>,
    mut event_receiver: mpsc::UnboundedReceiver<SessionEvent>,
) {
    tracing::debug!("Session registry actor started");

    loop {
        tokio::select! {
            biased;

            Some(message) = lifecycle_receiver.recv() => {
                registry.handle_lifecycle(message);
            }
            Some(event) = event_receiver.recv() => {
                registry.handle_event(event);
            }
            command = command_receiver.recv() => {
                let Some(command) = command else {
                    // Every handle dropped
                    registry.shutdown().await;
                    break;
                };
                if !registry.handle_command(command).await {
                    break;
                }
            }
            Some(result) = registry.teardowns.join_next(), if !registry.teardowns.is_empty() => {
                if let Err(e) = result {
                    tracing::error!("Session teardown task failed: {}", e);
                }
            }
        }
    }

    tracing::debug!("Session registry actor stopped");
}

impl SessionRegistry {
    /// Handles a single command. Returns false once the actor must stop.
    async fn handle_command(&mut self, command: RegistryCommand) -> bool {
        match command {
            RegistryCommand::Attach { request, responder } => {
                let result = self.attach(request);
                // A dropped responder drops the attachment, which releases
                // its connection again
                let _ = responder.send(result);
            }

            RegistryCommand::Status {
                info_hash,
                responder,
            } => {
                let status = self.sessions.get(&info_hash).map(Session::status);
                let _ = responder.send(status);
            }

            RegistryCommand::Statuses { responder } => {
                let statuses = self.sessions.values().map(Session::status).collect();
                let _ = responder.send(statuses);
            }

            RegistryCommand::Shutdown { responder } => {
                self.shutdown().await;
                let _ = responder.send(());
                return false;
            }
        }

        true
    }

    /// Get-or-create in one step, then attach a connection.
    fn attach(&mut self, request: AttachRequest) -> Result<Attachment, RegistryError> {
        let info_hash = request.link.info_hash;
        let context = &mut self.context;

        let session = match self.sessions.entry(info_hash) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(context.create_session(request)?),
        };

        if session.connect() {
            tracing::info!("{}: RESUMED", session.display_name());
        }
        tracing::debug!(
            "{}: connection attached ({} open)",
            session.display_name(),
            session.connections()
        );

        let key = session.key();
        let guard = ConnectionGuard::new(key, context.lifecycle_sender.clone());

        let stream = session
            .main_file()
            .filter(|_| session.state().is_streamable())
            .map(|file| {
                let meter = ServingMeter::new(
                    key,
                    session.served_bytes(),
                    context.config.lifecycle.serving_threshold,
                    context.lifecycle_sender.clone(),
                );
                StreamSource::new(Arc::clone(session.transfer()), file, meter)
            });

        Ok(Attachment {
            guard,
            status: session.status(),
            stream,
        })
    }

    fn handle_lifecycle(&mut self, message: LifecycleMessage) {
        match message {
            LifecycleMessage::Disconnected { session } => self.on_disconnected(session),
            LifecycleMessage::TimerElapsed {
                session,
                kind,
                epoch,
            } => self.on_timer(session, kind, epoch),
            LifecycleMessage::ServingThresholdCrossed { session } => self.on_serving(session),
        }
    }

    fn on_disconnected(&mut self, key: SessionKey) {
        let context = &self.context;
        let Some(session) = current_session(&mut self.sessions, key) else {
            return;
        };

        if !session.disconnect() {
            return;
        }

        tracing::debug!("{}: last connection closed", session.display_name());
        session.timers.pause.arm(
            context.config.lifecycle.pause_timeout,
            context.lifecycle_sender.clone(),
            move |epoch| LifecycleMessage::TimerElapsed {
                session: key,
                kind: TimerKind::Pause,
                epoch,
            },
        );
    }

    fn on_timer(&mut self, key: SessionKey, kind: TimerKind, epoch: u64) {
        let context = &self.context;
        let Some(session) = current_session(&mut self.sessions, key) else {
            return;
        };

        if !session.timers.slot_mut(kind).fire(epoch) {
            tracing::trace!("{}: ignoring stale {} timer", session.display_name(), kind);
            return;
        }

        match kind {
            TimerKind::Metadata => {
                if session.fail_metadata().is_ok() {
                    tracing::info!("{}: METADATA FAILED", session.display_name());
                    context
                        .telemetry
                        .track(TelemetryEvent::MetadataFailed, &session.telemetry_subject());
                }
            }

            TimerKind::Pause => {
                if session.connections() > 0 {
                    return;
                }
                if session.pause() {
                    tracing::info!("{}: PAUSED", session.display_name());
                }
                session.timers.remove.arm(
                    context.config.lifecycle.remove_timeout,
                    context.lifecycle_sender.clone(),
                    move |epoch| LifecycleMessage::TimerElapsed {
                        session: key,
                        kind: TimerKind::Remove,
                        epoch,
                    },
                );
            }

            TimerKind::Remove => {
                if session.connections() == 0 {
                    self.destroy(key.info_hash);
                }
            }
        }
    }

    fn on_serving(&mut self, key: SessionKey) {
        let context = &self.context;
        let Some(session) = current_session(&mut self.sessions, key) else {
            return;
        };

        if session.record_served(context.config.lifecycle.serving_threshold) {
            tracing::info!("{}: SERVING", session.display_name());
            context
                .telemetry
                .track(TelemetryEvent::Serving, &session.telemetry_subject());
        }
    }

    fn handle_event(&mut self, SessionEvent { session: key, event }: SessionEvent) {
        let context = &self.context;
        let Some(session) = current_session(&mut self.sessions, key) else {
            tracing::trace!("Dropping event for retired session {}", key.info_hash);
            return;
        };

        match event {
            TransferEvent::Ready(layout) => match session.enter_active(layout) {
                Ok(()) => {
                    tracing::info!("{}: METADATA RECEIVED", session.display_name());
                    context
                        .telemetry
                        .track(TelemetryEvent::MetadataReceived, &session.telemetry_subject());
                }
                Err(SessionError::InvalidTransition { state, .. }) => {
                    tracing::debug!(
                        "{}: ignoring layout while {}",
                        session.display_name(),
                        state
                    );
                }
                Err(e) => {
                    let reason = e.to_string();
                    self.fail_transfer(key, &reason);
                }
            },

            TransferEvent::Verified(index) => {
                if let Err(e) = session.mark_verified(index) {
                    tracing::warn!("{}: {}", session.display_name(), e);
                }
            }

            TransferEvent::Idle => {
                if session.mark_idle() {
                    tracing::info!("{}: FINISHED", session.display_name());
                    context
                        .telemetry
                        .track(TelemetryEvent::Finished, &session.telemetry_subject());
                }
            }

            TransferEvent::Failed { reason } => self.fail_transfer(key, &reason),
        }
    }

    /// Engine failures are fatal to the session.
    fn fail_transfer(&mut self, key: SessionKey, reason: &str) {
        if let Some(session) = current_session(&mut self.sessions, key) {
            tracing::error!("{}: transfer failed: {}", session.display_name(), reason);
            self.context
                .telemetry
                .track(TelemetryEvent::TransferFailed, &session.telemetry_subject());
            self.destroy(key.info_hash);
        }
    }

    /// Removes the session and tears its transfer down off the actor.
    ///
    /// Idempotent: a second call finds no entry.
    fn destroy(&mut self, info_hash: InfoHash) {
        let Some(mut session) = self.sessions.remove(&info_hash) else {
            return;
        };
        if !session.begin_destroy() {
            return;
        }

        let transfer = Arc::clone(session.transfer());
        let name = session.display_name().to_string();
        let subject = session.telemetry_subject();
        let telemetry = Arc::clone(&self.context.telemetry);
        let keep_files = self.context.config.storage.keep_files;

        self.teardowns.spawn(async move {
            if let Err(e) = transfer.shutdown().await {
                tracing::warn!("{}: transfer shutdown failed: {}", name, e);
            }
            tracing::info!("{}: REMOVED", name);
            telemetry.track(TelemetryEvent::Removed, &subject);

            if keep_files {
                return;
            }
            match transfer.remove_data().await {
                Ok(()) => tracing::info!("{}: DELETED", name),
                Err(e) => tracing::warn!("{}: removing data failed: {}", name, e),
            }
        });
    }

    /// Destroys every session and waits for all teardowns.
    async fn shutdown(&mut self) {
        tracing::debug!("Session registry shutting down");

        let info_hashes: Vec<InfoHash> = self.sessions.keys().copied().collect();
        for info_hash in info_hashes {
            self.destroy(info_hash);
        }

        while let Some(result) = self.teardowns.join_next().await {
            if let Err(e) = result {
                tracing::error!("Session teardown task failed: {}", e);
            }
        }
    }
}

impl SessionContext {
    /// Starts the transfer and builds a session with its metadata timer armed.
    fn create_session(&mut self, request: AttachRequest) -> Result<Session, RegistryError> {
        let info_hash = request.link.info_hash;
        let key = SessionKey {
            info_hash,
            serial: self.next_serial,
        };
        self.next_serial += 1;

        let download_dir = request
            .download_dir
            .unwrap_or_else(|| self.config.storage.default_download_dir.clone());
        let events = TransferEvents::new(key, self.event_sender.clone());
        let transfer = self
            .factory
            .start(
                TransferRequest {
                    link: request.link.clone(),
                    download_dir,
                },
                events,
            )
            .map_err(|source| RegistryError::StartFailed { info_hash, source })?;

        let mut session = Session::new(key, &request.link, request.telemetry_context, transfer);
        session.timers.metadata.arm(
            self.config.lifecycle.metadata_timeout,
            self.lifecycle_sender.clone(),
            move |epoch| LifecycleMessage::TimerElapsed {
                session: key,
                kind: TimerKind::Metadata,
                epoch,
            },
        );

        tracing::info!("{}: ADDED", session.display_name());
        self.telemetry
            .track(TelemetryEvent::Added, &session.telemetry_subject());

        Ok(session)
    }
}

/// Looks up the session a message was addressed to.
///
/// Messages for a destroyed session must not touch a newer session for the
/// same content, so the serial has to match.
fn current_session(
    sessions: &mut BTreeMap<InfoHash, Session>,
    key: SessionKey,
) -> Option<&mut Session> {
    sessions
        .get_mut(&key.info_hash)
        .filter(|session| session.key().serial == key.serial)
}
