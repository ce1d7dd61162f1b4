//! Preload window planning and the readiness predicate.
//!
//! Most containers keep header data at the start of the file and an index at
//! the end. Fetching both regions first lets a player open the stream and
//! seek without waiting for a sequential download.

use std::ops::Range;

use super::{PieceIndex, PieceMap};
use crate::engine::{Priority, Transfer};

/// Share of the content fetched eagerly from the start, in per-mille.
pub const PRELOAD_PER_MILLE: u64 = 5;

/// High-priority regions for one content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadPlan {
    piece_count: u32,
    preload_pieces: u32,
}

impl PreloadPlan {
    /// Plans the preload window for `piece_count` pieces.
    ///
    /// The window is `ceil(piece_count * 0.005)` pieces, never less than one
    /// while there is any content at all.
    pub fn for_piece_count(piece_count: u32) -> Self {
        let preload_pieces = if piece_count == 0 {
            0
        } else {
            ((piece_count as u64 * PRELOAD_PER_MILLE).div_ceil(1000) as u32).clamp(1, piece_count)
        };

        Self {
            piece_count,
            preload_pieces,
        }
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Number of pieces in the preload window.
    pub fn preload_pieces(&self) -> u32 {
        self.preload_pieces
    }

    /// Half-open piece range of the preload window.
    pub fn preload_window(&self) -> Range<u32> {
        0..self.preload_pieces
    }

    /// Final piece, if the content has any.
    pub fn last_piece(&self) -> Option<PieceIndex> {
        self.piece_count.checked_sub(1).map(PieceIndex::new)
    }

    /// Readiness: the whole preload window and the last piece are verified.
    ///
    /// Content without pieces is trivially ready.
    pub fn is_ready(&self, map: &PieceMap) -> bool {
        let window_ready = self
            .preload_window()
            .all(|index| map.is_verified(PieceIndex::new(index)));
        let tail_ready = self.last_piece().is_none_or(|last| map.is_verified(last));

        window_ready && tail_ready
    }

    /// Requests the plan from the engine.
    ///
    /// The main file is selected at normal priority, then the preload window
    /// and the last piece are raised to high priority.
    pub fn apply(&self, transfer: &dyn Transfer, main_file: usize) {
        transfer.select_file(main_file);

        if self.preload_pieces > 0 {
            transfer.select_pieces(self.preload_window(), Priority::High);
        }

        if let Some(last) = self.last_piece() {
            if last.as_u32() >= self.preload_pieces {
                transfer.select_pieces(last.as_u32()..last.as_u32() + 1, Priority::High);
            }
        }
    }
}
