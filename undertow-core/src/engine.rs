//! Retrieval engine boundary
//!
//! Swarm discovery, the peer wire protocol, piece hashing and disk storage all
//! live behind these traits. The registry starts one [`Transfer`] per session
//! through a [`TransferFactory`] and hears back through [`TransferEvents`].

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::magnet::MagnetLink;
use crate::pieces::PieceIndex;

/// Stream of file bytes produced by a transfer.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Errors reported by retrieval engine implementations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to start transfer: {reason}")]
    StartFailed { reason: String },

    #[error("File {index} is not part of this content")]
    FileNotFound { index: usize },

    #[error("Range {start}..{end} is outside file of {length} bytes")]
    InvalidRange { start: u64, end: u64, length: u64 },

    #[error("Transfer has been shut down")]
    Stopped,

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// One file inside the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the content root
    pub path: String,
    /// File size in bytes
    pub length: u64,
}

/// Content layout, known once metadata has been acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLayout {
    /// Content name from the info dictionary
    pub name: String,
    /// Nominal piece size in bytes
    pub piece_length: u32,
    /// Number of pieces
    pub piece_count: u32,
    /// Files in engine order
    pub files: Vec<FileEntry>,
    /// Pieces already verified on disk when the layout was reported
    pub verified: Vec<PieceIndex>,
}

impl ContentLayout {
    /// Index of the largest file. Ties go to the file reported first.
    pub fn largest_file(&self) -> Option<usize> {
        let mut largest: Option<(usize, u64)> = None;
        for (index, file) in self.files.iter().enumerate() {
            match largest {
                Some((_, length)) if length >= file.length => {}
                _ => largest = Some((index, file.length)),
            }
        }
        largest.map(|(index, _)| index)
    }
}

/// Fetch priority for a piece range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Background download in file order
    Normal,
    /// Fetched before any normal-priority piece
    High,
}

/// Aggregate transfer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransferStats {
    /// Payload bytes downloaded
    pub downloaded: u64,
    /// Payload bytes uploaded
    pub uploaded: u64,
    /// Current download rate in bytes per second
    pub download_rate: f64,
    /// Current upload rate in bytes per second
    pub upload_rate: f64,
    /// Connected peers
    pub peers: usize,
}

/// Notifications from a transfer to the session that owns it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Metadata acquired; the layout is now known
    Ready(ContentLayout),
    /// A piece passed hash verification
    Verified(PieceIndex),
    /// Nothing left to fetch for the current selection
    Idle,
    /// Unrecoverable disk or network failure
    Failed { reason: String },
}

/// Identity of one session instance.
///
/// The serial distinguishes a destroyed session from a later session for the
/// same content, so late events from the old one are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub info_hash: crate::magnet::InfoHash,
    pub serial: u64,
}

/// Transfer event tagged with the session it belongs to.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session: SessionKey,
    pub event: TransferEvent,
}

/// Sender side handed to a transfer for reporting progress.
#[derive(Debug, Clone)]
pub struct TransferEvents {
    session: SessionKey,
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl TransferEvents {
    pub(crate) fn new(session: SessionKey, sender: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, sender }
    }

    /// Creates an event sink that is not attached to a registry.
    ///
    /// Lets engine implementations be exercised on their own.
    pub fn detached(
        info_hash: crate::magnet::InfoHash,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let session = SessionKey {
            info_hash,
            serial: 0,
        };
        (Self { session, sender }, receiver)
    }

    pub fn session(&self) -> SessionKey {
        self.session
    }

    /// Sends an event. Returns false once the registry has gone away.
    pub fn emit(&self, event: TransferEvent) -> bool {
        self.sender
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }

    pub fn ready(&self, layout: ContentLayout) -> bool {
        self.emit(TransferEvent::Ready(layout))
    }

    pub fn verified(&self, index: PieceIndex) -> bool {
        self.emit(TransferEvent::Verified(index))
    }

    pub fn idle(&self) -> bool {
        self.emit(TransferEvent::Idle)
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.emit(TransferEvent::Failed {
            reason: reason.into(),
        })
    }
}

/// Parameters for starting a transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub link: MagnetLink,
    pub download_dir: PathBuf,
}

/// A running background transfer for one content item.
///
/// Selection calls are fire-and-forget; the engine applies them on its own
/// schedule. Methods must not block.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Marks a file for download at normal priority.
    fn select_file(&self, file_index: usize);

    /// Stops downloading a file's pieces that were selected through it.
    fn deselect_file(&self, file_index: usize);

    /// Requests a piece range at the given priority.
    fn select_pieces(&self, pieces: Range<u32>, priority: Priority);

    /// Current transfer statistics.
    fn stats(&self) -> TransferStats;

    /// Streams a byte range of a file, waiting for pieces as needed.
    ///
    /// # Errors
    /// - `EngineError::FileNotFound` - Unknown file index
    /// - `EngineError::InvalidRange` - Range exceeds the file
    /// - `EngineError::Stopped` - Transfer already shut down
    fn read_file(&self, file_index: usize, range: Range<u64>) -> Result<ByteStream, EngineError>;

    /// Tears down the transfer. Downloaded data stays on disk.
    ///
    /// # Errors
    /// - `EngineError::Io` - Flushing or closing storage failed
    async fn shutdown(&self) -> Result<(), EngineError>;

    /// Deletes downloaded data. Called after `shutdown`.
    ///
    /// # Errors
    /// - `EngineError::Io` - Removing files failed
    async fn remove_data(&self) -> Result<(), EngineError>;
}

/// Starts transfers for new sessions.
pub trait TransferFactory: Send + Sync {
    /// Starts a transfer and returns a handle to it.
    ///
    /// # Errors
    /// - `EngineError::StartFailed` - Engine refused the content
    fn start(
        &self,
        request: TransferRequest,
        events: TransferEvents,
    ) -> Result<Arc<dyn Transfer>, EngineError>;
}
