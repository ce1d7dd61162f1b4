//! Fixed-length verified/unverified flags, one per piece.

use super::PieceIndex;

const VERIFIED_MARK: char = '*';
const MISSING_MARK: char = '.';

/// Errors raised by piece map updates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PieceMapError {
    #[error("Piece {index} is outside the piece map ({piece_count} pieces)")]
    OutOfRange { index: PieceIndex, piece_count: u32 },
}

/// Verified-piece state for one content item.
///
/// Length is fixed when metadata arrives. Entries only ever move from
/// unverified to verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PieceMap {
    verified: Vec<bool>,
    verified_count: u32,
}

impl PieceMap {
    /// Creates an all-unverified map.
    pub fn new(piece_count: u32) -> Self {
        Self {
            verified: vec![false; piece_count as usize],
            verified_count: 0,
        }
    }

    /// Total number of pieces.
    pub fn len(&self) -> u32 {
        self.verified.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.verified.is_empty()
    }

    /// Records a verification event.
    ///
    /// Returns true when the piece was not verified before. Repeated events
    /// for the same piece are accepted and leave the map unchanged.
    ///
    /// # Errors
    /// - `PieceMapError::OutOfRange` - Index beyond the piece count
    pub fn mark_verified(&mut self, index: PieceIndex) -> Result<bool, PieceMapError> {
        let piece_count = self.len();
        let slot = self
            .verified
            .get_mut(index.as_u32() as usize)
            .ok_or(PieceMapError::OutOfRange { index, piece_count })?;

        if *slot {
            return Ok(false);
        }

        *slot = true;
        self.verified_count += 1;
        Ok(true)
    }

    /// Whether the piece has been verified. Out of range reads as false.
    pub fn is_verified(&self, index: PieceIndex) -> bool {
        self.verified
            .get(index.as_u32() as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn verified_count(&self) -> u32 {
        self.verified_count
    }

    /// True once every piece has been verified.
    pub fn is_complete(&self) -> bool {
        self.verified_count == self.len()
    }

    /// Lowest piece not yet verified.
    pub fn first_missing(&self) -> Option<PieceIndex> {
        self.verified
            .iter()
            .position(|verified| !verified)
            .map(|index| PieceIndex::new(index as u32))
    }

    /// Renders the map as rows of `*` (verified) and `.` (missing).
    ///
    /// Every row holds `row_len` pieces except possibly the last one.
    pub fn render_rows(&self, row_len: usize) -> Vec<String> {
        let row_len = row_len.max(1);
        self.verified
            .chunks(row_len)
            .map(|row| {
                row.iter()
                    .map(|&verified| if verified { VERIFIED_MARK } else { MISSING_MARK })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_new_map_is_unverified() {
        let map = PieceMap::new(10);
        assert_eq!(map.len(), 10);
        assert_eq!(map.verified_count(), 0);
        assert!(!map.is_complete());
        assert!((0..10).all(|i| !map.is_verified(PieceIndex::new(i))));
    }

    #[test]
    fn test_mark_verified_once() {
        let mut map = PieceMap::new(4);
        assert_eq!(map.mark_verified(PieceIndex::new(2)), Ok(true));
        assert_eq!(map.mark_verified(PieceIndex::new(2)), Ok(false));
        assert_eq!(map.verified_count(), 1);
        assert!(map.is_verified(PieceIndex::new(2)));
    }

    #[test]
    fn test_mark_verified_out_of_range() {
        let mut map = PieceMap::new(4);
        assert_eq!(
            map.mark_verified(PieceIndex::new(4)),
            Err(PieceMapError::OutOfRange {
                index: PieceIndex::new(4),
                piece_count: 4
            })
        );
        assert!(!map.is_verified(PieceIndex::new(4)));
    }

    #[test]
    fn test_first_missing_skips_verified_prefix() {
        let mut map = PieceMap::new(3);
        assert_eq!(map.first_missing(), Some(PieceIndex::new(0)));

        map.mark_verified(PieceIndex::new(0)).unwrap();
        map.mark_verified(PieceIndex::new(2)).unwrap();
        assert_eq!(map.first_missing(), Some(PieceIndex::new(1)));

        map.mark_verified(PieceIndex::new(1)).unwrap();
        assert!(map.is_complete());
        assert_eq!(map.first_missing(), None);
    }

    #[test]
    fn test_render_rows_chunks_by_hundred() {
        let mut map = PieceMap::new(205);
        map.mark_verified(PieceIndex::new(0)).unwrap();
        map.mark_verified(PieceIndex::new(204)).unwrap();

        let rows = map.render_rows(100);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), 100);
        assert_eq!(rows[2], "....*");
        assert!(rows[0].starts_with("*."));
    }

    #[test]
    fn test_empty_map_renders_nothing() {
        let map = PieceMap::new(0);
        assert!(map.is_empty());
        assert!(map.is_complete());
        assert!(map.render_rows(100).is_empty());
    }

    proptest! {
        #[test]
        fn verified_pieces_never_revert(events in proptest::collection::vec(0u32..64, 0..256)) {
            let mut map = PieceMap::new(48);
            let mut seen = std::collections::HashSet::new();

            for index in events {
                let before: Vec<bool> = (0..48).map(|i| map.is_verified(PieceIndex::new(i))).collect();
                let result = map.mark_verified(PieceIndex::new(index));

                if index < 48 {
                    prop_assert_eq!(result, Ok(seen.insert(index)));
                } else {
                    prop_assert!(result.is_err());
                }

                for (i, was_verified) in before.into_iter().enumerate() {
                    if was_verified {
                        prop_assert!(map.is_verified(PieceIndex::new(i as u32)));
                    }
                }
                prop_assert_eq!(map.verified_count() as usize, seen.len());
            }
        }
    }
}
