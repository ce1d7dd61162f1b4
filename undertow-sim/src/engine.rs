//! Simulated swarm transfers backed by library files
//!
//! A [`LocalTransfer`] behaves like a swarm download of one library file.
//! It copies pieces into the download directory one at a time, reports each
//! one as verified, and serves reads from the copy once the pieces a read
//! covers have arrived.

use std::collections::BTreeSet;
use std::io::{self, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use undertow_core::{
    ByteStream, ContentLayout, EngineError, FileEntry, PieceIndex, PieceMap, Priority, Transfer,
    TransferEvents, TransferFactory, TransferRequest, TransferStats,
};

use crate::library::{LibraryFile, LocalLibrary};

const READ_CHUNK_SIZE: u64 = 64 * 1024;

/// Behaviour of the simulated swarm.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Delay before the layout is reported
    pub metadata_delay: Duration,
    /// Piece size used to split library files
    pub piece_length: u32,
    /// Copy throughput; zero copies as fast as the disk allows
    pub bytes_per_second: u64,
    /// Peer count reported while content is known
    pub simulated_peers: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            metadata_delay: Duration::from_secs(2),
            piece_length: 256 * 1024,
            bytes_per_second: 4 * 1024 * 1024,
            simulated_peers: 8,
        }
    }
}

impl SwarmConfig {
    fn transfer_delay(&self, bytes: u64) -> Duration {
        if self.bytes_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(bytes as f64 / self.bytes_per_second as f64)
        }
    }
}

/// Starts [`LocalTransfer`]s for content found in a [`LocalLibrary`].
///
/// Links for anything outside the library start fine but never produce
/// metadata, like a magnet link with no seeders.
pub struct LocalSwarmFactory {
    library: Arc<LocalLibrary>,
    config: SwarmConfig,
}

impl LocalSwarmFactory {
    pub fn new(library: LocalLibrary, config: SwarmConfig) -> Self {
        Self {
            library: Arc::new(library),
            config,
        }
    }

    pub fn library(&self) -> &LocalLibrary {
        &self.library
    }
}

impl TransferFactory for LocalSwarmFactory {
    fn start(
        &self,
        request: TransferRequest,
        events: TransferEvents,
    ) -> Result<Arc<dyn Transfer>, EngineError> {
        let link = &request.link;
        let source = self.library.get(link.info_hash).cloned();
        if source.is_none() {
            tracing::debug!(
                "{} is not in the local library, metadata will never arrive",
                link.uri
            );
        }
        if !link.trackers.is_empty() {
            tracing::debug!(
                "Local swarm ignores {} tracker(s) of {}",
                link.trackers.len(),
                link.info_hash
            );
        }

        Ok(Arc::new(LocalTransfer::start(
            source,
            request.download_dir,
            self.config.clone(),
            events,
        )))
    }
}

#[derive(Default)]
struct SwarmState {
    layout: Option<ContentLayout>,
    verified: PieceMap,
    selected: BTreeSet<usize>,
    /// High-priority pieces, including those a reader is waiting on
    urgent: BTreeSet<u32>,
    downloaded: u64,
    copying: bool,
    stopped: bool,
}

enum NextPiece {
    Fetch(u32),
    Paused,
    Complete,
    Stopped,
}

struct Shared {
    source: Option<LibraryFile>,
    destination: Option<PathBuf>,
    config: SwarmConfig,
    state: Mutex<SwarmState>,
    /// Fired on every verified piece and on shutdown
    progress: Notify,
    /// Wakes the copy task after selection changes
    schedule: Notify,
}

impl Shared {
    fn next_piece(&self) -> NextPiece {
        let mut state = self.state.lock();
        if state.stopped {
            state.copying = false;
            return NextPiece::Stopped;
        }

        let urgent = state
            .urgent
            .iter()
            .copied()
            .find(|&piece| {
                piece < state.verified.len() && !state.verified.is_verified(PieceIndex::new(piece))
            });
        let next = match urgent {
            Some(piece) => NextPiece::Fetch(piece),
            None if state.selected.is_empty() => NextPiece::Paused,
            None => match state.verified.first_missing() {
                Some(piece) => NextPiece::Fetch(piece.as_u32()),
                None => NextPiece::Complete,
            },
        };

        state.copying = matches!(next, NextPiece::Fetch(_));
        next
    }

    /// Records a copied piece. Returns false when the transfer stopped meanwhile.
    fn complete_piece(&self, piece: u32, bytes: u64) -> bool {
        let mut state = self.state.lock();
        if state.stopped {
            return false;
        }
        if let Err(e) = state.verified.mark_verified(PieceIndex::new(piece)) {
            tracing::warn!("Copied piece outside the layout: {e}");
        }
        state.urgent.remove(&piece);
        state.downloaded += bytes;
        true
    }

    async fn wait_for_piece(&self, piece: u32) -> io::Result<()> {
        loop {
            let progressed = self.progress.notified();
            tokio::pin!(progressed);
            progressed.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.stopped {
                    return Err(io::Error::other("transfer stopped"));
                }
                if state.verified.is_verified(PieceIndex::new(piece)) {
                    return Ok(());
                }
                state.urgent.insert(piece);
            }
            self.schedule.notify_one();

            progressed.await;
        }
    }
}

/// Simulated download of one library file.
pub struct LocalTransfer {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalTransfer {
    /// Starts the copy task. `source` of `None` models content nobody seeds.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        source: Option<LibraryFile>,
        download_dir: PathBuf,
        config: SwarmConfig,
        events: TransferEvents,
    ) -> Self {
        let destination = source
            .as_ref()
            .map(|file| download_dir.join(&file.file_name));
        let shared = Arc::new(Shared {
            source,
            destination,
            config,
            state: Mutex::new(SwarmState::default()),
            progress: Notify::new(),
            schedule: Notify::new(),
        });
        let task = tokio::spawn(run_swarm(Arc::clone(&shared), events));

        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    /// Where downloaded bytes are written, once the content is known.
    pub fn destination(&self) -> Option<&Path> {
        self.shared.destination.as_deref()
    }
}

#[async_trait]
impl Transfer for LocalTransfer {
    fn select_file(&self, file_index: usize) {
        self.shared.state.lock().selected.insert(file_index);
        self.shared.schedule.notify_one();
    }

    fn deselect_file(&self, file_index: usize) {
        self.shared.state.lock().selected.remove(&file_index);
    }

    fn select_pieces(&self, pieces: Range<u32>, priority: Priority) {
        {
            let mut state = self.shared.state.lock();
            match priority {
                Priority::High => state.urgent.extend(pieces),
                Priority::Normal => {
                    for piece in pieces {
                        state.urgent.remove(&piece);
                    }
                }
            }
        }
        self.shared.schedule.notify_one();
    }

    fn stats(&self) -> TransferStats {
        let state = self.shared.state.lock();
        let swarming = state.layout.is_some() && !state.stopped;

        TransferStats {
            downloaded: state.downloaded,
            uploaded: 0,
            download_rate: if state.copying {
                self.shared.config.bytes_per_second as f64
            } else {
                0.0
            },
            upload_rate: 0.0,
            peers: if swarming {
                self.shared.config.simulated_peers
            } else {
                0
            },
        }
    }

    fn read_file(&self, file_index: usize, range: Range<u64>) -> Result<ByteStream, EngineError> {
        let state = self.shared.state.lock();
        if state.stopped {
            return Err(EngineError::Stopped);
        }

        let not_found = EngineError::FileNotFound { index: file_index };
        let layout = state.layout.as_ref().ok_or(not_found)?;
        let file = layout
            .files
            .get(file_index)
            .ok_or(EngineError::FileNotFound { index: file_index })?;
        if range.start > range.end || range.end > file.length {
            return Err(EngineError::InvalidRange {
                start: range.start,
                end: range.end,
                length: file.length,
            });
        }
        let destination = self
            .shared
            .destination
            .clone()
            .ok_or(EngineError::FileNotFound { index: file_index })?;

        let cursor = ReadCursor {
            shared: Arc::clone(&self.shared),
            destination,
            piece_length: layout.piece_length as u64,
            position: range.start,
            end: range.end,
            file: None,
        };
        Ok(Box::pin(piece_reader(cursor)))
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.copying = false;
        }
        self.shared.progress.notify_waiters();
        self.shared.schedule.notify_one();

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        Ok(())
    }

    async fn remove_data(&self) -> Result<(), EngineError> {
        let Some(destination) = self.shared.destination.as_deref() else {
            return Ok(());
        };
        if let Some(source) = &self.shared.source
            && same_file(&source.path, destination).await
        {
            tracing::warn!(
                "Download target {} is the library file itself, not deleting",
                destination.display()
            );
            return Ok(());
        }

        match tokio::fs::remove_file(destination).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn run_swarm(shared: Arc<Shared>, events: TransferEvents) {
    tokio::time::sleep(shared.config.metadata_delay).await;

    let (Some(source), Some(destination)) = (shared.source.clone(), shared.destination.clone())
    else {
        return;
    };

    let piece_length = shared.config.piece_length;
    let piece_count = source.size.div_ceil(piece_length as u64) as u32;
    let present = match existing_pieces(&source, &destination, piece_length, piece_count).await {
        Ok(present) => present,
        Err(e) => {
            tracing::warn!("Could not check {} for existing pieces: {e}", destination.display());
            Vec::new()
        }
    };

    let layout = ContentLayout {
        name: source.file_name.clone(),
        piece_length,
        piece_count,
        files: vec![FileEntry {
            path: source.file_name.clone(),
            length: source.size,
        }],
        verified: present.iter().copied().map(PieceIndex::new).collect(),
    };

    {
        let mut state = shared.state.lock();
        if state.stopped {
            return;
        }
        state.verified = PieceMap::new(piece_count);
        for &piece in &present {
            // Indices come from the piece count above
            let _ = state.verified.mark_verified(PieceIndex::new(piece));
        }
        if state.verified.is_complete() {
            tracing::info!(
                "{} is already complete in {}",
                source.file_name,
                destination.display()
            );
        }
        state.layout = Some(layout.clone());
    }
    if !events.ready(layout) {
        return;
    }

    let mut reported_idle = false;
    loop {
        match shared.next_piece() {
            NextPiece::Stopped => return,
            NextPiece::Paused => shared.schedule.notified().await,
            NextPiece::Complete => {
                if !reported_idle {
                    reported_idle = true;
                    if !events.idle() {
                        return;
                    }
                }
                shared.schedule.notified().await;
            }
            NextPiece::Fetch(piece) => {
                let range = piece_range(piece, piece_length, source.size);
                tokio::time::sleep(shared.config.transfer_delay(range.end - range.start)).await;

                if let Err(e) = copy_piece(&source.path, &destination, range.clone()).await {
                    tracing::error!("Copying piece {piece} of {} failed: {e}", source.file_name);
                    events.failed(format!("piece {piece}: {e}"));
                    return;
                }
                if !shared.complete_piece(piece, range.end - range.start) {
                    return;
                }
                shared.progress.notify_waiters();
                if !events.verified(PieceIndex::new(piece)) {
                    return;
                }
            }
        }
    }
}

fn piece_range(piece: u32, piece_length: u32, size: u64) -> Range<u64> {
    let start = piece as u64 * piece_length as u64;
    start..(start + piece_length as u64).min(size)
}

async fn copy_piece(source: &Path, destination: &Path, range: Range<u64>) -> io::Result<()> {
    let mut buffer = vec![0u8; (range.end - range.start) as usize];
    let mut input = File::open(source).await?;
    input.seek(SeekFrom::Start(range.start)).await?;
    input.read_exact(&mut buffer).await?;

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut output = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(destination)
        .await?;
    output.seek(SeekFrom::Start(range.start)).await?;
    output.write_all(&buffer).await?;
    output.flush().await?;
    Ok(())
}

/// Pieces of an earlier download that already match the source.
async fn existing_pieces(
    source: &LibraryFile,
    destination: &Path,
    piece_length: u32,
    piece_count: u32,
) -> io::Result<Vec<u32>> {
    let existing_length = match tokio::fs::metadata(destination).await {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut original = File::open(&source.path).await?;
    let mut copy = File::open(destination).await?;
    let mut present = Vec::new();

    for piece in 0..piece_count {
        let range = piece_range(piece, piece_length, source.size);
        if range.end > existing_length {
            break;
        }
        if piece_hash(&mut original, range.clone()).await? == piece_hash(&mut copy, range).await? {
            present.push(piece);
        }
    }

    Ok(present)
}

async fn piece_hash(file: &mut File, range: Range<u64>) -> io::Result<[u8; 20]> {
    let mut buffer = vec![0u8; (range.end - range.start) as usize];
    file.seek(SeekFrom::Start(range.start)).await?;
    file.read_exact(&mut buffer).await?;

    let mut hasher = Sha1::new();
    hasher.update(&buffer);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&hasher.finalize()[..20]);
    Ok(hash)
}

async fn same_file(first: &Path, second: &Path) -> bool {
    match (
        tokio::fs::canonicalize(first).await,
        tokio::fs::canonicalize(second).await,
    ) {
        (Ok(first), Ok(second)) => first == second,
        _ => false,
    }
}

/// Read position within the downloaded copy.
struct ReadCursor {
    shared: Arc<Shared>,
    destination: PathBuf,
    piece_length: u64,
    position: u64,
    end: u64,
    file: Option<File>,
}

impl ReadCursor {
    async fn next_chunk(&mut self) -> io::Result<Bytes> {
        let piece = (self.position / self.piece_length) as u32;
        self.shared.wait_for_piece(piece).await?;

        let piece_end = (piece as u64 + 1) * self.piece_length;
        let chunk_end = self
            .end
            .min(piece_end)
            .min(self.position + READ_CHUNK_SIZE);

        let mut file = match self.file.take() {
            Some(file) => file,
            None => File::open(&self.destination).await?,
        };
        file.seek(SeekFrom::Start(self.position)).await?;
        let mut buffer = vec![0u8; (chunk_end - self.position) as usize];
        file.read_exact(&mut buffer).await?;
        self.file = Some(file);

        self.position = chunk_end;
        Ok(Bytes::from(buffer))
    }
}

/// Yields chunks only as the pieces under them are verified.
fn piece_reader(cursor: ReadCursor) -> impl futures::Stream<Item = io::Result<Bytes>> + Send {
    stream::unfold(Some(cursor), |cursor| async move {
        let mut cursor = cursor?;
        if cursor.position >= cursor.end {
            return None;
        }
        match cursor.next_chunk().await {
            Ok(chunk) => Some((Ok(chunk), Some(cursor))),
            Err(e) => Some((Err(e), None)),
        }
    })
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio::sync::mpsc::UnboundedReceiver;
    use undertow_core::InfoHash;
    use undertow_core::engine::{SessionEvent, TransferEvent};

    use super::*;

    const PIECE: u32 = 1024;
    const SIZE: usize = 10 * PIECE as usize - 100;

    fn fast_config() -> SwarmConfig {
        SwarmConfig {
            metadata_delay: Duration::from_millis(10),
            piece_length: PIECE,
            bytes_per_second: 0,
            simulated_peers: 3,
        }
    }

    fn source_bytes() -> Vec<u8> {
        (0..SIZE).map(|i| (i % 253) as u8).collect()
    }

    struct Fixture {
        _library_dir: tempfile::TempDir,
        download_dir: tempfile::TempDir,
        file: LibraryFile,
    }

    fn fixture() -> Fixture {
        let library_dir = tempfile::tempdir().unwrap();
        let download_dir = tempfile::tempdir().unwrap();
        let path = library_dir.path().join("clip.mp4");
        std::fs::write(&path, source_bytes()).unwrap();
        let file = LibraryFile::new(path, SIZE as u64);

        Fixture {
            _library_dir: library_dir,
            download_dir,
            file,
        }
    }

    fn start(fixture: &Fixture) -> (LocalTransfer, UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = TransferEvents::detached(fixture.file.info_hash);
        let transfer = LocalTransfer::start(
            Some(fixture.file.clone()),
            fixture.download_dir.path().to_path_buf(),
            fast_config(),
            events,
        );
        (transfer, receiver)
    }

    async fn next_event(receiver: &mut UnboundedReceiver<SessionEvent>) -> TransferEvent {
        tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open")
            .event
    }

    async fn expect_ready(receiver: &mut UnboundedReceiver<SessionEvent>) -> ContentLayout {
        match next_event(receiver).await {
            TransferEvent::Ready(layout) => layout,
            other => panic!("expected layout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_content_never_reports_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let (events, mut receiver) = TransferEvents::detached(InfoHash::new([9; 20]));
        let transfer = LocalTransfer::start(None, dir.path().to_path_buf(), fast_config(), events);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(receiver.try_recv().is_err());
        assert_eq!(transfer.stats().peers, 0);
        assert!(matches!(
            transfer.read_file(0, 0..1),
            Err(EngineError::FileNotFound { index: 0 })
        ));

        transfer.shutdown().await.unwrap();
        transfer.remove_data().await.unwrap();
    }

    #[tokio::test]
    async fn test_high_priority_pieces_come_first() {
        let fixture = fixture();
        let (transfer, mut receiver) = start(&fixture);

        let layout = expect_ready(&mut receiver).await;
        assert_eq!(layout.piece_count, 10);
        assert_eq!(layout.files[0].path, "clip.mp4");
        assert!(layout.verified.is_empty());

        transfer.select_pieces(9..10, Priority::High);
        transfer.select_file(0);

        let mut order = Vec::new();
        loop {
            match next_event(&mut receiver).await {
                TransferEvent::Verified(piece) => order.push(piece.as_u32()),
                TransferEvent::Idle => break,
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(order, vec![9, 0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(transfer.stats().downloaded, SIZE as u64);
        assert_eq!(transfer.stats().peers, 3);
        let copy = std::fs::read(transfer.destination().unwrap()).unwrap();
        assert_eq!(copy, source_bytes());
    }

    #[tokio::test]
    async fn test_read_waits_for_and_requests_pieces() {
        let fixture = fixture();
        let (transfer, mut receiver) = start(&fixture);
        expect_ready(&mut receiver).await;

        // Nothing selected: the read itself has to pull the piece in
        let mut stream = transfer.read_file(0, 2000..2040).unwrap();
        {
            let mut next = tokio_test::task::spawn(stream.next());
            tokio_test::assert_pending!(next.poll());
        }

        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(chunk.as_ref(), &source_bytes()[2000..2040]);
        assert!(stream.next().await.is_none());

        assert!(matches!(
            next_event(&mut receiver).await,
            TransferEvent::Verified(piece) if piece.as_u32() == 1
        ));
    }

    #[tokio::test]
    async fn test_read_spanning_pieces_is_split_at_boundaries() {
        let fixture = fixture();
        let (transfer, mut receiver) = start(&fixture);
        expect_ready(&mut receiver).await;
        transfer.select_file(0);

        let stream = transfer.read_file(0, 1000..3000).unwrap();
        let chunks: Vec<Bytes> = tokio::time::timeout(
            Duration::from_secs(5),
            stream.map(|chunk| chunk.unwrap()).collect::<Vec<_>>(),
        )
        .await
        .unwrap();

        let lengths: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(lengths, vec![24, 1024, 952]);
        assert_eq!(chunks.concat(), source_bytes()[1000..3000].to_vec());
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let fixture = fixture();
        let (transfer, mut receiver) = start(&fixture);
        expect_ready(&mut receiver).await;

        assert!(matches!(
            transfer.read_file(0, 0..SIZE as u64 + 1),
            Err(EngineError::InvalidRange { .. })
        ));
        assert!(matches!(
            transfer.read_file(1, 0..1),
            Err(EngineError::FileNotFound { index: 1 })
        ));
    }

    #[tokio::test]
    async fn test_existing_pieces_are_preverified() {
        let fixture = fixture();
        let mut partial = source_bytes()[..3 * PIECE as usize].to_vec();
        partial.extend(vec![0u8; PIECE as usize]);
        std::fs::write(fixture.download_dir.path().join("clip.mp4"), partial).unwrap();

        let (_transfer, mut receiver) = start(&fixture);
        let layout = expect_ready(&mut receiver).await;

        let verified: Vec<u32> = layout.verified.iter().map(|piece| piece.as_u32()).collect();
        assert_eq!(verified, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_reads_and_remove_deletes_copy() {
        let fixture = fixture();
        let (transfer, mut receiver) = start(&fixture);
        expect_ready(&mut receiver).await;
        transfer.select_file(0);
        while !matches!(next_event(&mut receiver).await, TransferEvent::Idle) {}

        let destination = transfer.destination().unwrap().to_path_buf();
        assert!(destination.exists());

        transfer.shutdown().await.unwrap();
        assert!(matches!(transfer.read_file(0, 0..1), Err(EngineError::Stopped)));
        assert_eq!(transfer.stats().peers, 0);

        transfer.remove_data().await.unwrap();
        assert!(!destination.exists());
        assert!(fixture.file.path.exists());
    }

    #[tokio::test]
    async fn test_pending_read_fails_on_shutdown() {
        let fixture = fixture();
        let (events, _receiver) = TransferEvents::detached(fixture.file.info_hash);
        let config = SwarmConfig {
            bytes_per_second: 1,
            ..fast_config()
        };
        let transfer = LocalTransfer::start(
            Some(fixture.file.clone()),
            fixture.download_dir.path().to_path_buf(),
            config,
            events,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut stream = transfer.read_file(0, 0..10).unwrap();
        let pending = tokio::spawn(async move { stream.next().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        transfer.shutdown().await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Some(Err(_))));
    }

    #[tokio::test]
    async fn test_factory_starts_library_content() {
        let fixture = fixture();
        let mut library = LocalLibrary::new();
        library.insert(fixture.file.clone());
        let factory = LocalSwarmFactory::new(library, fast_config());

        let link = undertow_core::MagnetLink::parse(&fixture.file.magnet_link()).unwrap();
        let (events, mut receiver) = TransferEvents::detached(link.info_hash);
        let request = TransferRequest {
            link,
            download_dir: fixture.download_dir.path().to_path_buf(),
        };
        let transfer = factory.start(request, events).unwrap();

        let layout = expect_ready(&mut receiver).await;
        assert_eq!(layout.name, "clip.mp4");
        assert_eq!(layout.files[0].length, SIZE as u64);
        transfer.shutdown().await.unwrap();
    }
}
