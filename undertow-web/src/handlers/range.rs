//! HTTP Range request handling for video streaming
//!
//! Only the first range of a `Range` header is honoured. Players seek with
//! single ranges; multipart responses are never produced.

use std::ops::Range;

use axum::http::{HeaderMap, header};

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range covering a whole file of `length` bytes, or `None` when empty.
    pub fn full(length: u64) -> Option<Self> {
        (length > 0).then(|| Self {
            start: 0,
            end: length - 1,
        })
    }

    /// Number of bytes in the range.
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Half-open form used by the engine's read API.
    pub fn as_read_range(&self) -> Range<u64> {
        self.start..self.end + 1
    }

    /// `Content-Range` value for a file of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Range headers that cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("Malformed range header: {header}")]
    Malformed { header: String, length: u64 },

    #[error("Range {header} not satisfiable for {length} bytes")]
    Unsatisfiable { header: String, length: u64 },
}

impl RangeError {
    /// Size of the file the range was checked against.
    pub fn length(&self) -> u64 {
        match self {
            RangeError::Malformed { length, .. } | RangeError::Unsatisfiable { length, .. } => {
                *length
            }
        }
    }
}

/// Parses the first range of a `Range` header against a file of `length` bytes.
///
/// Accepts `bytes=start-end`, `bytes=start-` and the suffix form `bytes=-n`.
/// An end past the file is clamped to the last byte.
///
/// # Errors
/// - `RangeError::Malformed` - Unknown unit, missing bounds or non-numeric values
/// - `RangeError::Unsatisfiable` - Start beyond the file or an empty suffix
///
/// # Examples
/// ```
/// use undertow_web::handlers::range::{ByteRange, parse_range};
/// let range = parse_range("bytes=100-199", 1000).unwrap();
/// assert_eq!(range, ByteRange { start: 100, end: 199 });
/// assert_eq!(range.content_length(), 100);
/// ```
pub fn parse_range(header: &str, length: u64) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed {
        header: header.to_string(),
        length,
    };
    let unsatisfiable = || RangeError::Unsatisfiable {
        header: header.to_string(),
        length,
    };

    let specs = header.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
    let first = specs.split(',').next().unwrap_or_default().trim();
    let (start_str, end_str) = first.split_once('-').ok_or_else(malformed)?;
    let parse = |value: &str| value.trim().parse::<u64>().map_err(|_| malformed());

    match (start_str.trim().is_empty(), end_str.trim().is_empty()) {
        (true, true) => Err(malformed()),
        // Suffix: last n bytes
        (true, false) => {
            let suffix = parse(end_str)?;
            if suffix == 0 || length == 0 {
                return Err(unsatisfiable());
            }
            Ok(ByteRange {
                start: length.saturating_sub(suffix),
                end: length - 1,
            })
        }
        (false, open_ended) => {
            let start = parse(start_str)?;
            let end = if open_ended {
                u64::MAX
            } else {
                parse(end_str)?
            };
            if end < start {
                return Err(malformed());
            }
            if start >= length {
                return Err(unsatisfiable());
            }
            Ok(ByteRange {
                start,
                end: end.min(length - 1),
            })
        }
    }
}

/// Raw `Range` header value, if present.
///
/// A header that is not valid UTF-8 is returned as an empty string so it
/// fails parsing instead of silently serving the whole file.
pub fn extract_range_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::RANGE)
        .map(|value| value.to_str().unwrap_or_default())
}
