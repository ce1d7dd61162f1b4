//! Mock retrieval engine and telemetry for tests.
//!
//! Enabled for this crate's own tests and, through the `test-utils` feature,
//! for downstream crates that drive the registry without a real engine.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::engine::{
    ByteStream, ContentLayout, EngineError, FileEntry, Priority, Transfer, TransferEvents,
    TransferFactory, TransferRequest, TransferStats,
};
use crate::magnet::InfoHash;
use crate::pieces::PieceIndex;
use crate::telemetry::{Telemetry, TelemetryEvent, TelemetrySubject};

const MOCK_CHUNK_SIZE: usize = 16 * 1024;
const MOCK_PIECE_LENGTH: u32 = 16 * 1024;

/// Builds a layout with the given files and piece count.
pub fn layout_with_files(piece_count: u32, files: &[(&str, u64)]) -> ContentLayout {
    ContentLayout {
        name: files
            .first()
            .map(|(path, _)| path.to_string())
            .unwrap_or_default(),
        piece_length: MOCK_PIECE_LENGTH,
        piece_count,
        files: files
            .iter()
            .map(|(path, length)| FileEntry {
                path: path.to_string(),
                length: *length,
            })
            .collect(),
        verified: Vec::new(),
    }
}

/// Builds a single-file layout with pieces of `piece_length` bytes.
pub fn single_file_layout(path: &str, length: u64, piece_length: u32) -> ContentLayout {
    let piece_count = length.div_ceil(piece_length as u64) as u32;
    ContentLayout {
        name: path.to_string(),
        piece_length,
        piece_count,
        files: vec![FileEntry {
            path: path.to_string(),
            length,
        }],
        verified: Vec::new(),
    }
}

#[derive(Default)]
struct MockTransferState {
    selected: BTreeSet<usize>,
    priority_requests: Vec<(Range<u32>, Priority)>,
    files: BTreeMap<usize, Bytes>,
    stats: TransferStats,
    reads: Vec<(usize, Range<u64>)>,
    shutdown_count: usize,
    removal_count: usize,
}

/// Transfer that records every call and serves in-memory file content.
pub struct MockTransfer {
    info_hash: InfoHash,
    events: Option<TransferEvents>,
    state: Mutex<MockTransferState>,
}

impl MockTransfer {
    /// A transfer with no registry behind it.
    pub fn detached() -> Self {
        Self {
            info_hash: InfoHash::new([0u8; 20]),
            events: None,
            state: Mutex::new(MockTransferState::default()),
        }
    }

    fn with_events(info_hash: InfoHash, events: TransferEvents) -> Self {
        Self {
            info_hash,
            events: Some(events),
            state: Mutex::new(MockTransferState::default()),
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Makes `content` readable as file `file_index`.
    pub fn set_file_content(&self, file_index: usize, content: impl Into<Bytes>) {
        self.state.lock().files.insert(file_index, content.into());
    }

    pub fn set_stats(&self, stats: TransferStats) {
        self.state.lock().stats = stats;
    }

    pub fn emit_ready(&self, layout: ContentLayout) -> bool {
        self.events.as_ref().is_some_and(|events| events.ready(layout))
    }

    pub fn emit_verified(&self, index: u32) -> bool {
        self.events
            .as_ref()
            .is_some_and(|events| events.verified(PieceIndex::new(index)))
    }

    pub fn emit_idle(&self) -> bool {
        self.events.as_ref().is_some_and(|events| events.idle())
    }

    pub fn emit_failed(&self, reason: &str) -> bool {
        self.events
            .as_ref()
            .is_some_and(|events| events.failed(reason))
    }

    pub fn is_selected(&self, file_index: usize) -> bool {
        self.state.lock().selected.contains(&file_index)
    }

    pub fn priority_requests(&self) -> Vec<(Range<u32>, Priority)> {
        self.state.lock().priority_requests.clone()
    }

    pub fn reads(&self) -> Vec<(usize, Range<u64>)> {
        self.state.lock().reads.clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.state.lock().shutdown_count
    }

    pub fn removal_count(&self) -> usize {
        self.state.lock().removal_count
    }
}

#[async_trait]
impl Transfer for MockTransfer {
    fn select_file(&self, file_index: usize) {
        self.state.lock().selected.insert(file_index);
    }

    fn deselect_file(&self, file_index: usize) {
        self.state.lock().selected.remove(&file_index);
    }

    fn select_pieces(&self, pieces: Range<u32>, priority: Priority) {
        self.state.lock().priority_requests.push((pieces, priority));
    }

    fn stats(&self) -> TransferStats {
        self.state.lock().stats
    }

    fn read_file(&self, file_index: usize, range: Range<u64>) -> Result<ByteStream, EngineError> {
        let mut state = self.state.lock();
        if state.shutdown_count > 0 {
            return Err(EngineError::Stopped);
        }

        let content = state
            .files
            .get(&file_index)
            .cloned()
            .ok_or(EngineError::FileNotFound { index: file_index })?;
        let length = content.len() as u64;
        if range.start > range.end || range.end > length {
            return Err(EngineError::InvalidRange {
                start: range.start,
                end: range.end,
                length,
            });
        }
        state.reads.push((file_index, range.clone()));

        let slice = content.slice(range.start as usize..range.end as usize);
        let chunks: Vec<std::io::Result<Bytes>> = (0..slice.len())
            .step_by(MOCK_CHUNK_SIZE)
            .map(|offset| Ok(slice.slice(offset..(offset + MOCK_CHUNK_SIZE).min(slice.len()))))
            .collect();

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        self.state.lock().shutdown_count += 1;
        Ok(())
    }

    async fn remove_data(&self) -> Result<(), EngineError> {
        self.state.lock().removal_count += 1;
        Ok(())
    }
}

/// Canned content a factory hands to every transfer it starts.
#[derive(Clone)]
struct Preset {
    layout: ContentLayout,
    files: Vec<Bytes>,
}

#[derive(Default)]
struct FactoryState {
    transfers: Vec<Arc<MockTransfer>>,
    requests: Vec<TransferRequest>,
}

/// Factory producing [`MockTransfer`]s.
#[derive(Clone, Default)]
pub struct MockTransferFactory {
    state: Arc<Mutex<FactoryState>>,
    preset: Option<Preset>,
    fail_start: bool,
}

impl MockTransferFactory {
    /// Transfers stay in metadata acquisition until a test emits events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every start is refused.
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// Transfers report `layout` immediately and serve `files` by index.
    pub fn with_content(layout: ContentLayout, files: Vec<Bytes>) -> Self {
        Self {
            preset: Some(Preset { layout, files }),
            ..Self::default()
        }
    }

    pub fn started_count(&self) -> usize {
        self.state.lock().transfers.len()
    }

    /// Most recently started transfer for the content.
    pub fn transfer(&self, info_hash: InfoHash) -> Option<Arc<MockTransfer>> {
        self.state
            .lock()
            .transfers
            .iter()
            .rev()
            .find(|transfer| transfer.info_hash() == info_hash)
            .cloned()
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.state.lock().requests.clone()
    }
}

impl TransferFactory for MockTransferFactory {
    fn start(
        &self,
        request: TransferRequest,
        events: TransferEvents,
    ) -> Result<Arc<dyn Transfer>, EngineError> {
        if self.fail_start {
            return Err(EngineError::StartFailed {
                reason: "mock engine refuses all content".to_string(),
            });
        }

        let transfer = Arc::new(MockTransfer::with_events(request.link.info_hash, events));
        if let Some(preset) = &self.preset {
            for (index, content) in preset.files.iter().enumerate() {
                transfer.set_file_content(index, content.clone());
            }
            transfer.emit_ready(preset.layout.clone());
        }

        let mut state = self.state.lock();
        state.transfers.push(Arc::clone(&transfer));
        state.requests.push(request);
        Ok(transfer)
    }
}

/// Telemetry sink that remembers every event.
#[derive(Clone, Default)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<(TelemetryEvent, TelemetrySubject)>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().iter().map(|(event, _)| *event).collect()
    }

    pub fn count(&self, event: TelemetryEvent) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(recorded, _)| *recorded == event)
            .count()
    }

    pub fn subjects(&self) -> Vec<TelemetrySubject> {
        self.events
            .lock()
            .iter()
            .map(|(_, subject)| subject.clone())
            .collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn track(&self, event: TelemetryEvent, subject: &TelemetrySubject) {
        self.events.lock().push((event, subject.clone()));
    }
}
