//! Per-content session state machine
//!
//! A session is a plain record owned by the registry actor. Every transition
//! is a method returning what happened, so the actor can log, report
//! telemetry and arm timers around it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::engine::{ContentLayout, FileEntry, SessionKey, Transfer};
use crate::magnet::{InfoHash, MagnetLink};
use crate::pieces::{PieceIndex, PieceMap, PieceMapError, PreloadPlan};
use crate::telemetry::TelemetrySubject;
use crate::timers::SessionTimers;

/// Pieces per row of the rendered piece map.
pub const PIECE_MAP_ROW_LEN: usize = 100;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// Waiting for the engine to learn the content layout
    #[serde(rename = "metadata")]
    AcquiringMetadata,
    /// Layout known, transfer running
    #[serde(rename = "downloading")]
    Active,
    /// Engine went idle with the main file selected
    #[serde(rename = "finished")]
    Finished,
    /// Metadata never arrived
    #[serde(rename = "failed")]
    Failed,
}

impl SessionState {
    /// Whether byte ranges can be served in this state.
    pub fn is_streamable(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Finished)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::AcquiringMetadata => "metadata",
            SessionState::Active => "downloading",
            SessionState::Finished => "finished",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Rejected session transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Cannot {action} while session is {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    #[error("Content has no files")]
    NoFiles,

    #[error("Piece map update failed")]
    PieceMap(#[from] PieceMapError),
}

/// State that only exists once the layout is known.
#[derive(Debug, Clone)]
struct ActiveContent {
    layout: ContentLayout,
    main_file: usize,
    piece_map: PieceMap,
    plan: PreloadPlan,
}

/// The main file of a streamable session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainFile {
    pub index: usize,
    pub entry: FileEntry,
}

/// One content item and its background transfer.
pub struct Session {
    key: SessionKey,
    display_name: String,
    state: SessionState,
    paused: bool,
    content: Option<ActiveContent>,
    connections: usize,
    pub(crate) timers: SessionTimers,
    telemetry_context: Option<String>,
    serving: bool,
    served_bytes: Arc<AtomicU64>,
    transfer: Arc<dyn Transfer>,
    destroying: bool,
}

impl Session {
    /// Creates a session in metadata acquisition with no connections.
    pub fn new(
        key: SessionKey,
        link: &MagnetLink,
        telemetry_context: Option<String>,
        transfer: Arc<dyn Transfer>,
    ) -> Self {
        Self {
            key,
            display_name: link.label(),
            state: SessionState::AcquiringMetadata,
            paused: false,
            content: None,
            connections: 0,
            timers: SessionTimers::default(),
            telemetry_context,
            serving: false,
            served_bytes: Arc::new(AtomicU64::new(0)),
            transfer,
            destroying: false,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn info_hash(&self) -> InfoHash {
        self.key.info_hash
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn connections(&self) -> usize {
        self.connections
    }

    pub fn transfer(&self) -> &Arc<dyn Transfer> {
        &self.transfer
    }

    pub fn piece_map(&self) -> Option<&PieceMap> {
        self.content.as_ref().map(|content| &content.piece_map)
    }

    pub fn main_file(&self) -> Option<MainFile> {
        self.content.as_ref().map(|content| MainFile {
            index: content.main_file,
            entry: content.layout.files[content.main_file].clone(),
        })
    }

    /// Counter shared with the streams serving this session.
    pub fn served_bytes(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.served_bytes)
    }

    pub fn telemetry_subject(&self) -> TelemetrySubject {
        TelemetrySubject {
            info_hash: self.key.info_hash,
            name: self.display_name.clone(),
            context: self.telemetry_context.clone(),
        }
    }

    /// Layout received: selects the main file and starts preloading.
    ///
    /// The largest file becomes the main file. Pieces the engine already
    /// holds are marked verified before the plan is applied.
    ///
    /// # Errors
    /// - `SessionError::InvalidTransition` - Session is not acquiring metadata
    /// - `SessionError::NoFiles` - Layout lists no files
    pub fn enter_active(&mut self, layout: ContentLayout) -> Result<(), SessionError> {
        if self.state != SessionState::AcquiringMetadata {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action: "enter active",
            });
        }

        let main_file = layout.largest_file().ok_or(SessionError::NoFiles)?;

        let mut piece_map = PieceMap::new(layout.piece_count);
        for &index in &layout.verified {
            if let Err(e) = piece_map.mark_verified(index) {
                tracing::warn!("{}: ignoring pre-verified piece: {}", self.display_name, e);
            }
        }

        let plan = PreloadPlan::for_piece_count(layout.piece_count);
        plan.apply(self.transfer.as_ref(), main_file);

        self.timers.metadata.cancel();
        self.content = Some(ActiveContent {
            layout,
            main_file,
            piece_map,
            plan,
        });
        self.state = SessionState::Active;
        Ok(())
    }

    /// Metadata timeout elapsed.
    ///
    /// # Errors
    /// - `SessionError::InvalidTransition` - Session is not acquiring metadata
    pub fn fail_metadata(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::AcquiringMetadata {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action: "fail metadata",
            });
        }
        self.state = SessionState::Failed;
        Ok(())
    }

    /// Engine reported idle. Returns true when the session finished.
    ///
    /// Idle while paused means the selection was withdrawn, not that the
    /// download completed.
    pub fn mark_idle(&mut self) -> bool {
        if self.state == SessionState::Active && !self.paused {
            self.state = SessionState::Finished;
            true
        } else {
            false
        }
    }

    /// Records a verified piece. Returns true when it was new.
    ///
    /// Verification events before the layout is known are dropped; the
    /// engine reports those pieces again in the layout.
    ///
    /// # Errors
    /// - `SessionError::PieceMap` - Piece index beyond the layout
    pub fn mark_verified(&mut self, index: PieceIndex) -> Result<bool, SessionError> {
        match self.content.as_mut() {
            Some(content) => Ok(content.piece_map.mark_verified(index)?),
            None => Ok(false),
        }
    }

    /// A request attached. Returns true when this resumed a paused transfer.
    ///
    /// Pending pause and remove timers are cancelled.
    pub fn connect(&mut self) -> bool {
        self.connections += 1;
        self.timers.cancel_idle();

        if !self.paused {
            return false;
        }

        self.paused = false;
        if let Some(content) = &self.content {
            self.transfer.select_file(content.main_file);
        }
        true
    }

    /// A request detached. Returns true when the count reached zero.
    pub fn disconnect(&mut self) -> bool {
        if self.connections == 0 {
            tracing::warn!("{}: disconnect without connection", self.display_name);
            return false;
        }
        self.connections -= 1;
        self.connections == 0
    }

    /// Pause timer elapsed. Returns true when the transfer was paused.
    ///
    /// Only active or finished sessions pause; the main file is deselected
    /// so the engine stops fetching.
    pub fn pause(&mut self) -> bool {
        if !self.state.is_streamable() || self.paused {
            return false;
        }

        if let Some(content) = &self.content {
            self.transfer.deselect_file(content.main_file);
        }
        self.paused = true;
        true
    }

    /// Latches the serving flag once `threshold` bytes have been streamed.
    ///
    /// Returns true only on the call that sets the latch.
    pub fn record_served(&mut self, threshold: u64) -> bool {
        if self.serving || self.served_bytes.load(Ordering::Relaxed) < threshold {
            return false;
        }
        self.serving = true;
        true
    }

    /// Sets the destroying latch. Returns false when already set.
    pub(crate) fn begin_destroy(&mut self) -> bool {
        if self.destroying {
            return false;
        }
        self.destroying = true;
        self.timers.cancel_all();
        true
    }

    /// Whether the preload window and the last piece are verified.
    pub fn is_ready(&self) -> bool {
        self.content
            .as_ref()
            .is_some_and(|content| content.plan.is_ready(&content.piece_map))
    }

    /// Status summary for the HTTP surface.
    pub fn status(&self) -> SessionStatus {
        let stats = self.transfer.stats();

        let content = self
            .content
            .as_ref()
            .filter(|_| self.state.is_streamable())
            .map(|content| ContentStatus {
                files: content
                    .layout
                    .files
                    .iter()
                    .enumerate()
                    .map(|(index, file)| FileStatus {
                        path: file.path.clone(),
                        size: file.length,
                        main: index == content.main_file,
                    })
                    .collect(),
                pieces: content.layout.piece_count,
                pieces_preload: content.plan.preload_pieces(),
                piece_length: content.layout.piece_length,
                piece_map: content.piece_map.render_rows(PIECE_MAP_ROW_LEN),
                video_ready: content.plan.is_ready(&content.piece_map),
            });

        SessionStatus {
            dn: self.display_name.clone(),
            info_hash: self.key.info_hash.to_string(),
            state: self.state,
            paused: self.paused,
            downloaded: stats.downloaded,
            uploaded: stats.uploaded,
            download_speed: stats.download_rate / 1024.0,
            upload_speed: stats.upload_rate / 1024.0,
            peers: stats.peers,
            connections: self.connections,
            content,
        }
    }
}

/// Status summary of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub dn: String,
    pub info_hash: String,
    pub state: SessionState,
    pub paused: bool,
    pub downloaded: u64,
    pub uploaded: u64,
    /// KiB/s
    pub download_speed: f64,
    /// KiB/s
    pub upload_speed: f64,
    pub peers: usize,
    pub connections: usize,
    #[serde(flatten)]
    pub content: Option<ContentStatus>,
}

/// Layout details, present once the session is streamable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentStatus {
    pub files: Vec<FileStatus>,
    pub pieces: u32,
    pub pieces_preload: u32,
    pub piece_length: u32,
    pub piece_map: Vec<String>,
    pub video_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub size: u64,
    pub main: bool,
}
