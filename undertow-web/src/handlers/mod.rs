//! HTTP request handlers organized by functionality

pub mod api;
pub mod range;
pub mod video;

pub use api::{ContentQuery, PrettyJson, add_content, shutdown_server, status_all};
pub use range::{ByteRange, RangeError, parse_range};
pub use video::stream_video;
