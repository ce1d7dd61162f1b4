//! Piece bookkeeping for streaming readiness
//!
//! The piece map records which pieces the retrieval engine has verified, and
//! the preload plan decides which pieces must be fetched first so playback can
//! start before the whole content is on disk.

mod map;
mod preload;

use std::fmt;

pub use map::{PieceMap, PieceMapError};
pub use preload::{PRELOAD_PER_MILLE, PreloadPlan};

/// Zero-based index of a piece within the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
